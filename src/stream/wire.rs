//! Messages exchanged with the classification service.
//!
//! Two inbound shapes are accepted on the same link: the streaming frame
//! message (`frame` + `emotions[]`) and the older request/response detection
//! envelope (`success` + `detection`). Both normalise into a [`WireReading`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One tracked subject in a streaming frame message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectDetection {
    #[serde(default)]
    pub id: i64,
    /// Bounding box `[x1, y1, x2, y2]` in frame pixels
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    /// Wire label, absent while the subject's face is not classified
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub has_face: bool,
}

/// Streaming frame message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Annotated frame (base64 JPEG), passed through untouched
    #[serde(default)]
    pub frame: Option<String>,
    pub emotions: Vec<SubjectDetection>,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub active_tracks: Option<u32>,
    #[serde(default)]
    pub total_clients: Option<u32>,
}

/// Detection payload of the request/response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeDetection {
    #[serde(default)]
    pub face_detected: bool,
    #[serde(default)]
    pub clase: Option<String>,
    #[serde(default)]
    pub confianza: f64,
    #[serde(default)]
    pub scores: HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    #[serde(default)]
    pub message: String,
}

/// Request/response detection envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEnvelope {
    pub success: bool,
    #[serde(default)]
    pub detection: Option<EnvelopeDetection>,
    #[serde(default)]
    pub error: Option<EnvelopeError>,
}

/// Any inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    Frame(FrameMessage),
    Envelope(DetectionEnvelope),
}

/// The primary (label, confidence) pair of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryDetection {
    pub label: String,
    pub confidence: f64,
}

/// A message reduced to what the client acts on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WireReading {
    pub primary: Option<PrimaryDetection>,
    pub annotated_frame: Option<String>,
    /// Service-side reason when nothing was detected
    pub note: Option<String>,
}

impl WireMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Reduce to the primary detection.
    ///
    /// For frame messages the first subject with a label and non-zero
    /// confidence wins; other subjects are ignored.
    pub fn into_reading(self) -> WireReading {
        match self {
            WireMessage::Frame(msg) => {
                let primary = msg
                    .emotions
                    .into_iter()
                    .find_map(|s| match s.emotion {
                        Some(label) if s.confidence != 0.0 => Some(PrimaryDetection {
                            label,
                            confidence: s.confidence,
                        }),
                        _ => None,
                    });
                WireReading {
                    primary,
                    annotated_frame: msg.frame.filter(|f| !f.is_empty()),
                    note: None,
                }
            }
            WireMessage::Envelope(env) => {
                let primary = env.detection.as_ref().and_then(|d| match &d.clase {
                    Some(label) if env.success && d.face_detected && d.confianza != 0.0 => {
                        Some(PrimaryDetection {
                            label: label.clone(),
                            confidence: d.confianza,
                        })
                    }
                    _ => None,
                });
                WireReading {
                    primary,
                    annotated_frame: None,
                    note: env.error.map(|e| e.message),
                }
            }
        }
    }
}
