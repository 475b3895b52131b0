//! Atomic session counters with optional persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Counters for the current session.
#[derive(Debug)]
pub struct SessionTelemetry {
    frames_sent: AtomicU64,
    /// Ticks dropped because a send was still pending
    frames_skipped: AtomicU64,
    messages_received: AtomicU64,
    detections: AtomicU64,
    no_detections: AtomicU64,
    decode_failures: AtomicU64,
    send_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    history_appends: AtomicU64,
    /// Detections kept out of history by the dedup gate
    dedup_suppressed: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl SessionTelemetry {
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            no_detections: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            history_appends: AtomicU64::new(0),
            dedup_suppressed: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create telemetry that continues the totals stored at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut telemetry = Self::new();
        telemetry.persist_path = Some(path);

        if let Err(e) = telemetry.load() {
            warn!(error = %e, "Could not load previous telemetry");
        }

        telemetry
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a detection and whether it went into history.
    pub fn record_detection(&self, appended: bool) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.detections.fetch_add(1, Ordering::Relaxed);
        if appended {
            self.history_appends.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dedup_suppressed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_no_detection(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.no_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            no_detections: self.no_detections.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            history_appends: self.history_appends.load(Ordering::Relaxed),
            dedup_suppressed: self.dedup_suppressed.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Telemetry:\n\
             - Frames sent: {}\n\
             - Frames skipped (send pending): {}\n\
             - Messages received: {}\n\
             - Detections: {} ({} recorded, {} deduplicated)\n\
             - No detection: {}\n\
             - Decode failures: {}\n\
             - Send failures: {}\n\
             - Reconnect attempts: {}\n\
             - Session duration: {} seconds",
            stats.frames_sent,
            stats.frames_skipped,
            stats.messages_received,
            stats.detections,
            stats.history_appends,
            stats.dedup_suppressed,
            stats.no_detections,
            stats.decode_failures,
            stats.send_failures,
            stats.reconnect_attempts,
            stats.session_duration_secs
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedTelemetry {
                counters: self.stats(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
            debug!(path = %path.display(), "Telemetry saved");
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedTelemetry =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                let c = persisted.counters;

                self.frames_sent.store(c.frames_sent, Ordering::Relaxed);
                self.frames_skipped.store(c.frames_skipped, Ordering::Relaxed);
                self.messages_received.store(c.messages_received, Ordering::Relaxed);
                self.detections.store(c.detections, Ordering::Relaxed);
                self.no_detections.store(c.no_detections, Ordering::Relaxed);
                self.decode_failures.store(c.decode_failures, Ordering::Relaxed);
                self.send_failures.store(c.send_failures, Ordering::Relaxed);
                self.reconnect_attempts.store(c.reconnect_attempts, Ordering::Relaxed);
                self.history_appends.store(c.history_appends, Ordering::Relaxed);
                self.dedup_suppressed.store(c.dedup_suppressed, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Read persisted counters without creating a live session.
    pub fn read_persisted(path: &std::path::Path) -> Result<Option<TelemetryStats>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedTelemetry =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(Some(persisted.counters))
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.frames_skipped,
            &self.messages_received,
            &self.detections,
            &self.no_detections,
            &self.decode_failures,
            &self.send_failures,
            &self.reconnect_attempts,
            &self.history_appends,
            &self.dedup_suppressed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for SessionTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of session counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub messages_received: u64,
    pub detections: u64,
    pub no_detections: u64,
    pub decode_failures: u64,
    pub send_failures: u64,
    pub reconnect_attempts: u64,
    pub history_appends: u64,
    pub dedup_suppressed: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTelemetry {
    counters: TelemetryStats,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared telemetry.
pub type SharedTelemetry = Arc<SessionTelemetry>;

pub fn create_shared_telemetry() -> SharedTelemetry {
    Arc::new(SessionTelemetry::new())
}

pub fn create_shared_telemetry_with_persistence(path: PathBuf) -> SharedTelemetry {
    Arc::new(SessionTelemetry::with_persistence(path))
}
