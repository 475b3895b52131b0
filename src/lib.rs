//! EmotiPlay Agent - real-time emotion detection streaming core.
//!
//! Captures camera frames, streams them to a remote classification service
//! over a resilient link, maps the service's labels onto a fixed set of
//! emotion classes and keeps a bounded, queryable history of results.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         EmotiPlay Agent                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐            │
//! │  │   Capture   │──▶│  Streaming  │──▶│   Decoder   │            │
//! │  │   Source    │   │   Client    │   │ (label map) │            │
//! │  └─────────────┘   └─────────────┘   └─────────────┘            │
//! │                          │                  │                    │
//! │                          ▼                  ▼                    │
//! │                   ┌─────────────┐   ┌─────────────┐             │
//! │                   │  Telemetry  │   │   History   │──▶ stats    │
//! │                   └─────────────┘   └─────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use emotiplay_agent::{capture, config::Config, pipeline::DetectionPipeline, stream};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//!
//! let mut camera = capture::CaptureSource::new(capture::SyntheticDevice::new(), config.capture.clone());
//! camera.start()?;
//!
//! let mut pipeline = DetectionPipeline::new(&config, stream::WsConnector::default());
//! pipeline.start(Arc::new(camera.frame_tap()));
//!
//! // Events can be received from pipeline.subscribe()
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod stream;
pub mod telemetry;

#[cfg(feature = "playlist")]
pub mod playlist;

// Re-export key types at crate root for convenience
pub use capture::{CaptureError, CaptureSource, EncodedFrame, FrameProvider};
pub use config::{Config, ConfigError};
pub use core::{
    create_shared_history, decode, CanonicalResult, EmotionClass, HistoryAggregator, HistoryStats,
    SharedHistory,
};
pub use pipeline::{DetectionPipeline, PipelineEvent};
pub use stream::{ConnectionState, StreamConfig, StreamError, StreamEvent, StreamingClient};
pub use telemetry::{SessionTelemetry, SharedTelemetry, TelemetryStats};

// Playlist re-exports (when enabled)
#[cfg(feature = "playlist")]
pub use playlist::{PlaybackDevice, PlaylistClient, PlaylistError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
