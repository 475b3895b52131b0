//! Frame capture for the EmotiPlay agent.
//!
//! A [`CaptureSource`] owns a [`VideoDevice`], renders frames on a background
//! thread, and hands out the latest frame as an encoded still on demand.

pub mod source;
pub mod still;
pub mod synthetic;
pub mod types;

// Re-export commonly used types
pub use source::{encode_jpeg, CaptureSource, FrameTap};
pub use still::StillImageDevice;
pub use synthetic::SyntheticDevice;
pub use types::{
    strip_scheme, CaptureConfig, CaptureError, EncodedFrame, FrameProvider, Resolution,
    VideoDevice,
};
