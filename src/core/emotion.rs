//! Canonical emotion vocabulary shared by every consumer of the stream.
//!
//! The remote classifier speaks its own label set; everything past the
//! decoder speaks [`EmotionClass`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of canonical emotion classes.
///
/// Serialized with the canonical ids used by the dashboard (`feliz`,
/// `triste`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmotionClass {
    #[serde(rename = "feliz")]
    Happy,
    #[serde(rename = "triste")]
    Sad,
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "enojado")]
    Angry,
    #[serde(rename = "sorprendido")]
    Surprised,
    #[serde(rename = "disgusto")]
    Disgusted,
    #[serde(rename = "miedo")]
    Afraid,
}

impl EmotionClass {
    /// Every member of the vocabulary, in declaration order.
    pub const ALL: [EmotionClass; 7] = [
        EmotionClass::Happy,
        EmotionClass::Sad,
        EmotionClass::Neutral,
        EmotionClass::Angry,
        EmotionClass::Surprised,
        EmotionClass::Disgusted,
        EmotionClass::Afraid,
    ];

    /// Canonical id of this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionClass::Happy => "feliz",
            EmotionClass::Sad => "triste",
            EmotionClass::Neutral => "neutral",
            EmotionClass::Angry => "enojado",
            EmotionClass::Surprised => "sorprendido",
            EmotionClass::Disgusted => "disgusto",
            EmotionClass::Afraid => "miedo",
        }
    }

    /// Key understood by the playlist service.
    pub fn playlist_key(&self) -> &'static str {
        match self {
            EmotionClass::Happy => "happy",
            EmotionClass::Sad => "sad",
            EmotionClass::Neutral => "neutral",
            EmotionClass::Angry => "angry",
            EmotionClass::Surprised => "surprise",
            EmotionClass::Disgusted => "disgust",
            EmotionClass::Afraid => "fear",
        }
    }
}

impl fmt::Display for EmotionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a canonical id fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown emotion class: {0}")]
pub struct UnknownClass(pub String);

impl FromStr for EmotionClass {
    type Err = UnknownClass;

    /// Accepts canonical ids and playlist keys, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        EmotionClass::ALL
            .into_iter()
            .find(|c| c.as_str() == needle || c.playlist_key() == needle)
            .ok_or_else(|| UnknownClass(s.to_string()))
    }
}

/// A single classified reading in the canonical vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResult {
    /// Canonical class
    pub emotion: EmotionClass,
    /// Classifier confidence in [0, 1]
    pub confidence: f64,
    /// When the reading was accepted by this process
    pub observed_at: DateTime<Utc>,
}

impl CanonicalResult {
    pub fn new(emotion: EmotionClass, confidence: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            emotion,
            confidence,
            observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_ids_round_trip_through_serde() {
        let json = serde_json::to_string(&EmotionClass::Surprised).unwrap();
        assert_eq!(json, "\"sorprendido\"");

        let parsed: EmotionClass = serde_json::from_str("\"miedo\"").unwrap();
        assert_eq!(parsed, EmotionClass::Afraid);
    }

    #[test]
    fn test_from_str_accepts_ids_and_playlist_keys() {
        assert_eq!("feliz".parse::<EmotionClass>().unwrap(), EmotionClass::Happy);
        assert_eq!("Surprise".parse::<EmotionClass>().unwrap(), EmotionClass::Surprised);
        assert!("love".parse::<EmotionClass>().is_err());
    }

    #[test]
    fn test_all_ids_unique() {
        let mut ids: Vec<&str> = EmotionClass::ALL.iter().map(|c| c.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), EmotionClass::ALL.len());
    }
}
