//! Bounded, insertion-ordered history of canonical results.
//!
//! Records are kept in a ring of fixed capacity; when full the oldest record
//! is evicted. Insertion order is the only ordering: timestamps are never
//! used to reorder.

use crate::core::emotion::{CanonicalResult, EmotionClass};
use crate::core::stats::{compute_stats, HistoryStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default number of records retained.
pub const DEFAULT_CAPACITY: usize = 500;

/// A stored result plus its position in the append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Monotonic append sequence number (survives eviction of older records)
    pub seq: u64,
    #[serde(flatten)]
    pub result: CanonicalResult,
}

/// History settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    pub dedup: crate::core::decoder::DedupConfig,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            dedup: Default::default(),
        }
    }
}

/// Bounded FIFO log of results with on-demand statistics.
#[derive(Debug)]
pub struct HistoryAggregator {
    capacity: usize,
    records: VecDeque<HistoryRecord>,
    next_seq: u64,
}

impl HistoryAggregator {
    /// Create an aggregator holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
            next_seq: 0,
        }
    }

    /// Append a result, evicting the oldest record when full.
    ///
    /// Returns the sequence number assigned to the record.
    pub fn add(&mut self, result: CanonicalResult) -> u64 {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push_back(HistoryRecord { seq, result });
        seq
    }

    /// Remove every record. Sequence numbers keep increasing.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Distribution, dominant class and confidence summary.
    pub fn stats(&self) -> HistoryStats {
        compute_stats(self.records.iter().map(|r| &r.result))
    }

    /// The last `n` records in insertion order (`n` clamped to the size).
    pub fn recent(&self, n: usize) -> Vec<HistoryRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Records of a single class, in insertion order.
    pub fn filter_by_class(&self, class: EmotionClass) -> Vec<HistoryRecord> {
        self.records
            .iter()
            .filter(|r| r.result.emotion == class)
            .cloned()
            .collect()
    }

    /// Records observed within `[start, end]` (inclusive), in insertion order.
    pub fn filter_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<HistoryRecord> {
        self.records
            .iter()
            .filter(|r| r.result.observed_at >= start && r.result.observed_at <= end)
            .cloned()
            .collect()
    }

    /// Most recently appended record.
    pub fn last(&self) -> Option<&HistoryRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// History shared between the detection pipeline and readers.
///
/// The mutex serializes appends so eviction stays FIFO with several producers.
pub type SharedHistory = Arc<Mutex<HistoryAggregator>>;

/// Create a new shared history.
pub fn create_shared_history(capacity: usize) -> SharedHistory {
    Arc::new(Mutex::new(HistoryAggregator::new(capacity)))
}
