//! Device that replays a still image file as a video feed.

use crate::capture::types::{CaptureError, Resolution, VideoDevice};
use image::imageops::FilterType;
use image::RgbImage;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Decodes an image from disk on open and serves it as every frame.
#[derive(Debug)]
pub struct StillImageDevice {
    path: PathBuf,
    frame: Option<RgbImage>,
    frame_delay: Duration,
}

impl StillImageDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame: None,
            frame_delay: Duration::from_millis(33),
        }
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }
}

impl VideoDevice for StillImageDevice {
    fn open(&mut self, resolution: Resolution) -> Result<(), CaptureError> {
        let image = image::open(&self.path).map_err(|e| match e {
            image::ImageError::IoError(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                CaptureError::PermissionDenied
            }
            other => CaptureError::DeviceUnavailable(format!("{}: {other}", self.path.display())),
        })?;

        let rgb = image.to_rgb8();
        let frame = if rgb.dimensions() == (resolution.width, resolution.height) {
            rgb
        } else {
            image::imageops::resize(&rgb, resolution.width, resolution.height, FilterType::Triangle)
        };
        self.frame = Some(frame);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        let frame = self
            .frame
            .clone()
            .ok_or_else(|| CaptureError::DeviceUnavailable("device not open".to_string()))?;
        thread::sleep(self.frame_delay);
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_unavailable() {
        let mut device = StillImageDevice::new("/definitely/not/here.png");
        assert!(matches!(
            device.open(Resolution::default()),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_replays_resized_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        RgbImage::from_pixel(20, 10, image::Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();

        let mut device = StillImageDevice::new(&path).with_frame_delay(Duration::ZERO);
        device.open(Resolution { width: 10, height: 5 }).unwrap();

        let frame = device.read_frame().unwrap().unwrap();
        assert_eq!(frame.dimensions(), (10, 5));

        device.close();
        assert!(device.read_frame().is_err());
    }
}
