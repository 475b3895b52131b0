//! Demonstration of the EmotiPlay detection loop without a real service.
//!
//! This example shows how to:
//! 1. Start a synthetic camera
//! 2. Answer dials with an in-process classifier that cycles through labels
//! 3. Run the detection pipeline and receive its events
//! 4. Print history statistics at the end
//!
//! Run with: cargo run --example capture_demo

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use emotiplay_agent::{
    capture::{CaptureSource, SyntheticDevice},
    config::Config,
    pipeline::{DetectionPipeline, PipelineEvent},
    stream::{transport::memory, StreamEvent},
};

const LABELS: [(&str, f64); 6] = [
    ("Happy", 0.91),
    ("Happy", 0.88),
    ("Surprise", 0.67),
    ("Neutral", 0.74),
    ("Sad", 0.58),
    ("Contempt", 0.41),
];

fn main() {
    println!("EmotiPlay Agent - Capture Demo");
    println!("==============================");
    println!();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            return;
        }
    };
    let _guard = runtime.enter();

    let mut config = Config::default();
    config.stream.send_interval = Duration::from_millis(500);

    let mut camera = CaptureSource::new(
        SyntheticDevice::new().with_frame_delay(Duration::from_millis(33)),
        config.capture.clone(),
    );
    if let Err(e) = camera.start() {
        eprintln!("Error starting camera: {e}");
        return;
    }

    // Simulated classifier: one reply per received frame.
    let (connector, mut server) = memory::pair();
    runtime.spawn(async move {
        while let Some(dial) = server.next_dial().await {
            let mut peer = dial.accept();
            let mut turn = 0usize;
            while let Some(frame) = peer.next_sent().await {
                let (label, confidence) = LABELS[turn % LABELS.len()];
                turn += 1;
                println!("  classifier: got {} bytes, answering {label}", frame.len());
                peer.send_text(format!(
                    r#"{{"emotions": [{{"id": 1, "emotion": "{label}", "confidence": {confidence}, "has_face": true}}], "active_tracks": 1}}"#
                ));
            }
        }
    });

    let mut pipeline = DetectionPipeline::new(&config, connector);
    let events = pipeline.subscribe();
    pipeline.start(Arc::new(camera.frame_tap()));

    // Set up stop flag
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }

    println!("Running for 10 seconds...");
    println!();

    let start = std::time::Instant::now();
    while running.load(Ordering::SeqCst) && start.elapsed() < Duration::from_secs(10) {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(PipelineEvent::Stream(StreamEvent::StateChanged(state))) => {
                println!("Connection: {state}");
            }
            Ok(PipelineEvent::Stream(StreamEvent::Detection(detection))) => {
                println!(
                    "Detected {} ({:.0}%){}",
                    detection.result.emotion,
                    detection.result.confidence * 100.0,
                    if detection.record { "" } else { " [repeat]" }
                );
            }
            Ok(_) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    println!();
    println!("Stopping...");
    runtime.block_on(pipeline.stop_and_wait());
    camera.stop();

    let stats = pipeline.stats();
    println!();
    println!("=== History ===");
    println!("  Records: {}", stats.total);
    for share in &stats.distribution {
        println!("  {}: {} ({:.2}%)", share.emotion, share.count, share.percentage);
    }
    if let Some(dominant) = stats.dominant {
        println!("  Dominant: {dominant}");
    }
    println!("  Mean confidence: {:.2}", stats.average_confidence);
    println!();
    println!("{}", pipeline.telemetry().summary());
}
