//! Synthetic video device producing a moving test pattern.
//!
//! Used when no camera is attached, and in tests to script permission
//! failures.

use crate::capture::types::{CaptureError, Resolution, VideoDevice};
use image::{Rgb, RgbImage};
use std::thread;
use std::time::Duration;

/// A device that renders a scrolling gradient at a fixed frame rate.
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    resolution: Option<Resolution>,
    frame_delay: Duration,
    frame_index: u64,
    deny_permission: bool,
    unavailable: bool,
    revoke_after: Option<u64>,
}

impl SyntheticDevice {
    pub fn new() -> Self {
        Self {
            resolution: None,
            frame_delay: Duration::from_millis(1),
            frame_index: 0,
            deny_permission: false,
            unavailable: false,
            revoke_after: None,
        }
    }

    /// Delay applied before each rendered frame.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Refuse access on open.
    pub fn deny_permission(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    /// Behave as if no camera is attached.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Revoke access after `frames` frames have been rendered.
    pub fn revoke_after(mut self, frames: u64) -> Self {
        self.revoke_after = Some(frames);
        self
    }

    fn render(&self, resolution: Resolution) -> RgbImage {
        let shift = (self.frame_index % 256) as u32;
        RgbImage::from_fn(resolution.width, resolution.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                (((x + y) / 2) % 256) as u8,
            ])
        })
    }
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDevice for SyntheticDevice {
    fn open(&mut self, resolution: Resolution) -> Result<(), CaptureError> {
        if self.deny_permission {
            return Err(CaptureError::PermissionDenied);
        }
        if self.unavailable {
            return Err(CaptureError::DeviceUnavailable(
                "no synthetic device attached".to_string(),
            ));
        }
        if matches!(self.revoke_after, Some(limit) if self.frame_index >= limit) {
            return Err(CaptureError::PermissionDenied);
        }
        self.resolution = Some(resolution);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<image::RgbImage>, CaptureError> {
        let resolution = self
            .resolution
            .ok_or_else(|| CaptureError::DeviceUnavailable("device not open".to_string()))?;

        if matches!(self.revoke_after, Some(limit) if self.frame_index >= limit) {
            return Err(CaptureError::PermissionDenied);
        }

        thread::sleep(self.frame_delay);
        let frame = self.render(resolution);
        self.frame_index += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.resolution = None;
    }
}
