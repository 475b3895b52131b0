//! Mapping from the classifier's wire vocabulary to canonical classes.
//!
//! The whole vocabulary mismatch lives in [`WIRE_LABELS`]. Lookups are
//! case-sensitive; anything not listed decodes to [`DEFAULT_CLASS`].

use crate::core::emotion::{CanonicalResult, EmotionClass};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Class used for any wire label absent from the table.
pub const DEFAULT_CLASS: EmotionClass = EmotionClass::Neutral;

/// Wire label (as emitted by the classifier) to canonical class.
pub const WIRE_LABELS: [(&str, EmotionClass); 7] = [
    ("Happy", EmotionClass::Happy),
    ("Sad", EmotionClass::Sad),
    ("Angry", EmotionClass::Angry),
    ("Surprise", EmotionClass::Surprised),
    ("Disgust", EmotionClass::Disgusted),
    ("Fear", EmotionClass::Afraid),
    ("Neutral", EmotionClass::Neutral),
];

/// Look up a wire label, falling back to [`DEFAULT_CLASS`].
pub fn lookup(raw_label: &str) -> EmotionClass {
    WIRE_LABELS
        .iter()
        .find(|(label, _)| *label == raw_label)
        .map(|(_, class)| *class)
        .unwrap_or(DEFAULT_CLASS)
}

/// Whether a wire label is part of the known vocabulary.
pub fn is_known(raw_label: &str) -> bool {
    WIRE_LABELS.iter().any(|(label, _)| *label == raw_label)
}

/// Decode a wire reading observed now.
///
/// Never fails: unknown labels map to the default class and confidence is
/// passed through untouched.
pub fn decode(raw_label: &str, confidence: f64) -> CanonicalResult {
    decode_at(raw_label, confidence, Utc::now())
}

/// Decode a wire reading with an explicit observation time.
pub fn decode_at(raw_label: &str, confidence: f64, observed_at: DateTime<Utc>) -> CanonicalResult {
    CanonicalResult::new(lookup(raw_label), confidence, observed_at)
}

/// Confidence outside [0, 1] (or NaN) is a decode failure for the consumer.
pub fn confidence_in_range(confidence: f64) -> bool {
    (0.0..=1.0).contains(&confidence)
}

/// Settings for history de-duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    /// Minimum time before the same class may be recorded again
    #[serde(with = "crate::config::duration_ms")]
    pub min_interval: std::time::Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval: std::time::Duration::from_millis(1000),
        }
    }
}

/// Change-based gate with a minimum interval.
///
/// A result is recorded unless it repeats the last recorded class within
/// `min_interval` of when that class was last recorded. The "current state"
/// slot is updated regardless; this only governs history appends.
#[derive(Debug, Clone)]
pub struct DedupPolicy {
    config: DedupConfig,
    last_recorded: Option<(EmotionClass, DateTime<Utc>)>,
}

impl DedupPolicy {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            last_recorded: None,
        }
    }

    /// Decide whether `result` goes into history, updating the gate.
    pub fn should_record(&mut self, result: &CanonicalResult) -> bool {
        if !self.config.enabled {
            self.last_recorded = Some((result.emotion, result.observed_at));
            return true;
        }

        let min_interval = Duration::from_std(self.config.min_interval).unwrap_or(Duration::MAX);
        if let Some((class, at)) = self.last_recorded {
            if class == result.emotion && result.observed_at - at < min_interval {
                return false;
            }
        }

        self.last_recorded = Some((result.emotion, result.observed_at));
        true
    }

    /// Forget the last recorded class.
    pub fn reset(&mut self) {
        self.last_recorded = None;
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }
}
