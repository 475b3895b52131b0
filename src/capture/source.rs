//! Capture source driving a [`VideoDevice`] on a background render thread.
//!
//! The render thread keeps the latest frame in a shared slot; encoding
//! happens on demand when a frame is requested, so `capture_frame` never
//! waits on the device.

use crate::capture::types::{
    CaptureConfig, CaptureError, EncodedFrame, FrameProvider, VideoDevice,
};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct FrameSlot {
    latest: Option<RgbImage>,
    frames_rendered: u64,
    error: Option<CaptureError>,
}

fn lock(slot: &Mutex<FrameSlot>) -> MutexGuard<'_, FrameSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap handle that reads the latest frame from a running source.
#[derive(Clone)]
pub struct FrameTap {
    slot: Arc<Mutex<FrameSlot>>,
    running: Arc<AtomicBool>,
    jpeg_quality: u8,
}

impl FrameTap {
    /// Encode the most recent frame, or `None` if inactive or nothing rendered yet.
    pub fn capture_frame(&self) -> Option<EncodedFrame> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }

        let image = lock(&self.slot).latest.clone()?;
        match encode_jpeg(&image, self.jpeg_quality) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "Failed to encode frame");
                None
            }
        }
    }
}

impl FrameProvider for FrameTap {
    fn capture_frame(&self) -> Option<EncodedFrame> {
        FrameTap::capture_frame(self)
    }
}

/// Owns a video device and renders frames from it while active.
pub struct CaptureSource<D: VideoDevice> {
    config: CaptureConfig,
    device: Option<D>,
    slot: Arc<Mutex<FrameSlot>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<D>>,
}

impl<D: VideoDevice> CaptureSource<D> {
    /// Create a source for the given device. Nothing is opened yet.
    pub fn new(device: D, config: CaptureConfig) -> Self {
        Self {
            config,
            device: Some(device),
            slot: Arc::new(Mutex::new(FrameSlot::default())),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Open the device and start rendering frames.
    ///
    /// Returns an error if:
    /// - The source is already running
    /// - The device refuses access (`PermissionDenied`)
    /// - The device cannot be opened or was lost (`DeviceUnavailable`)
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.is_active() {
            return Err(CaptureError::AlreadyRunning);
        }
        // A render thread that stopped on its own still holds the device.
        self.reclaim_device();

        let mut device = self.device.take().ok_or_else(|| {
            CaptureError::DeviceUnavailable("device was lost by a previous session".to_string())
        })?;

        if let Err(e) = device.open(self.config.resolution) {
            device.close();
            self.device = Some(device);
            lock(&self.slot).error = Some(e.clone());
            return Err(e);
        }

        *lock(&self.slot) = FrameSlot::default();
        self.running.store(true, Ordering::SeqCst);

        let slot = self.slot.clone();
        let running = self.running.clone();
        let frame_interval = self.config.frame_interval;

        let handle = thread::spawn(move || {
            render_loop(&mut device, &slot, &running, frame_interval);
            running.store(false, Ordering::SeqCst);
            device.close();
            device
        });

        self.thread_handle = Some(handle);
        info!(
            width = self.config.resolution.width,
            height = self.config.resolution.height,
            "Capture source started"
        );
        Ok(())
    }

    /// Release the device. Idempotent; succeeds even if never started.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.reclaim_device();
        lock(&self.slot).latest = None;
        if was_running {
            info!("Capture source stopped");
        }
    }

    /// React to the hosting context becoming (in)active.
    ///
    /// Going inactive stops the source; coming back does not restart it.
    pub fn set_host_active(&mut self, active: bool) {
        if !active && self.is_active() {
            info!("Host context inactive, releasing camera");
            self.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Encode the most recent frame; see [`FrameTap::capture_frame`].
    pub fn capture_frame(&self) -> Option<EncodedFrame> {
        self.frame_tap().capture_frame()
    }

    /// Handle for reading frames from other threads or tasks.
    pub fn frame_tap(&self) -> FrameTap {
        FrameTap {
            slot: self.slot.clone(),
            running: self.running.clone(),
            jpeg_quality: self.config.jpeg_quality,
        }
    }

    /// Number of frames rendered since the last start.
    pub fn frames_rendered(&self) -> u64 {
        lock(&self.slot).frames_rendered
    }

    /// Last terminal error seen by the source, if any.
    pub fn last_error(&self) -> Option<CaptureError> {
        lock(&self.slot).error.clone()
    }

    fn reclaim_device(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            match handle.join() {
                Ok(device) => self.device = Some(device),
                Err(_) => warn!("Render thread panicked, device lost"),
            }
        }
    }
}

impl<D: VideoDevice> Drop for CaptureSource<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_loop<D: VideoDevice>(
    device: &mut D,
    slot: &Mutex<FrameSlot>,
    running: &AtomicBool,
    frame_interval: std::time::Duration,
) {
    while running.load(Ordering::SeqCst) {
        match device.read_frame() {
            Ok(Some(frame)) => {
                let mut slot = lock(slot);
                slot.latest = Some(frame);
                slot.frames_rendered += 1;
            }
            Ok(None) => thread::sleep(frame_interval),
            Err(e) if e.is_terminal() => {
                warn!(error = %e, "Camera lost mid-session, stopping capture");
                let mut slot = lock(slot);
                slot.latest = None;
                slot.error = Some(e);
                return;
            }
            Err(e) => {
                debug!(error = %e, "Transient frame read failure");
                thread::sleep(frame_interval);
            }
        }
    }
}

/// Encode an RGB frame as a JPEG data URL.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<EncodedFrame, CaptureError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder
        .encode_image(image)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(EncodedFrame::from_jpeg(&buf, image.width(), image.height()))
}
