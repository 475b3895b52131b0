//! Types shared by capture sources and video devices.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Requested frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target resolution requested from the device
    pub resolution: Resolution,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Pause between device reads when no frame is ready
    #[serde(with = "crate::config::duration_ms")]
    pub frame_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            jpeg_quality: 80,
            frame_interval: Duration::from_millis(33),
        }
    }
}

/// Errors that can occur while capturing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// Access to the device was refused by the user or the OS
    #[error("camera permission denied")]
    PermissionDenied,
    /// No usable device, or it was lost
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture source is already running")]
    AlreadyRunning,
    #[error("frame encoding failed: {0}")]
    Encode(String),
}

impl CaptureError {
    /// Errors that end the current session and need explicit user action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureError::PermissionDenied | CaptureError::DeviceUnavailable(_)
        )
    }
}

/// A local video device.
///
/// Implementations are driven from a dedicated render thread: `read_frame`
/// may block until the next frame is available.
pub trait VideoDevice: Send + 'static {
    /// Acquire exclusive access at the requested resolution.
    fn open(&mut self, resolution: Resolution) -> Result<(), CaptureError>;

    /// Read the next frame, or `Ok(None)` if none is ready yet.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError>;

    /// Release the device. Must be safe to call when not open.
    fn close(&mut self);
}

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// A still image encoded as a JPEG data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    data_url: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl EncodedFrame {
    /// Wrap JPEG bytes.
    pub fn from_jpeg(jpeg: &[u8], width: u32, height: u32) -> Self {
        Self {
            data_url: format!("{DATA_URL_PREFIX}{}", BASE64.encode(jpeg)),
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    /// Wrap an already encoded string (data URL or bare base64).
    pub fn from_data_url(data_url: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
            width: 0,
            height: 0,
            captured_at: Utc::now(),
        }
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    /// The raw base64 payload with any `data:...,` scheme prefix removed.
    pub fn payload(&self) -> &str {
        strip_scheme(&self.data_url)
    }
}

/// Strip a `data:<mime>;base64,` prefix if present.
pub fn strip_scheme(encoded: &str) -> &str {
    match encoded.split_once(',') {
        Some((scheme, payload)) if scheme.starts_with("data:") => payload,
        _ => encoded,
    }
}

/// Anything that can hand out the most recent frame without blocking.
pub trait FrameProvider: Send + Sync {
    fn capture_frame(&self) -> Option<EncodedFrame>;
}

impl<F> FrameProvider for F
where
    F: Fn() -> Option<EncodedFrame> + Send + Sync,
{
    fn capture_frame(&self) -> Option<EncodedFrame> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_strips_data_url_prefix() {
        let frame = EncodedFrame::from_jpeg(&[0xff, 0xd8, 0xff], 1, 1);
        assert!(frame.data_url().starts_with("data:image/jpeg;base64,"));
        assert_eq!(frame.payload(), "/9j/");
    }

    #[test]
    fn test_strip_scheme_leaves_bare_payload() {
        assert_eq!(strip_scheme("QUJD"), "QUJD");
        assert_eq!(strip_scheme("data:image/png;base64,QUJD"), "QUJD");
    }

    #[test]
    fn test_terminal_errors() {
        assert!(CaptureError::PermissionDenied.is_terminal());
        assert!(CaptureError::DeviceUnavailable("gone".into()).is_terminal());
        assert!(!CaptureError::AlreadyRunning.is_terminal());
    }
}
