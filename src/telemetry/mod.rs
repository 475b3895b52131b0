//! Session telemetry for the EmotiPlay agent.
//!
//! Counts what the detection loop did so a session can be summarised and
//! compared across runs. Nothing here stores frames or results.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_telemetry, create_shared_telemetry_with_persistence, SessionTelemetry,
    SharedTelemetry, TelemetryStats,
};
