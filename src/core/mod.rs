//! Core domain for the EmotiPlay agent.
//!
//! This module contains:
//! - The canonical emotion vocabulary
//! - The wire-label decoder and history de-duplication gate
//! - The bounded history aggregator and its statistics

pub mod decoder;
pub mod emotion;
pub mod history;
pub mod stats;

// Re-export commonly used types
pub use decoder::{decode, decode_at, DedupConfig, DedupPolicy, DEFAULT_CLASS, WIRE_LABELS};
pub use emotion::{CanonicalResult, EmotionClass};
pub use history::{
    create_shared_history, HistoryAggregator, HistoryConfig, HistoryRecord, SharedHistory,
    DEFAULT_CAPACITY,
};
pub use stats::{compute_stats, ClassShare, HistoryStats};
