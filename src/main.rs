//! EmotiPlay Agent CLI
//!
//! Streams camera frames to an emotion classifier and keeps a session history.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use emotiplay_agent::{
    capture::{CaptureSource, StillImageDevice, SyntheticDevice, VideoDevice},
    config::Config,
    core::{EmotionClass, WIRE_LABELS},
    pipeline::{DetectionPipeline, PipelineEvent},
    stream::{StreamEvent, WsConnector},
    telemetry::{create_shared_telemetry_with_persistence, SessionTelemetry},
    create_shared_history, VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "emotiplay")]
#[command(author = "EmotiPlay")]
#[command(version = VERSION)]
#[command(about = "Real-time emotion detection agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start streaming frames for detection
    Start {
        /// Classification service URL (ws:// or wss://)
        #[arg(long)]
        url: Option<String>,

        /// Replay a still image instead of the synthetic camera
        #[arg(long)]
        image: Option<PathBuf>,

        /// Interval between frame sends in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Record every detection, including repeats of the same class
        #[arg(long)]
        no_dedup: bool,

        /// Switch playlists when the detected class changes (requires playlist feature)
        #[arg(long)]
        playlist: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Show configuration and cumulative statistics
    Status,

    /// Show configuration
    Config,

    /// Show the classifier label table
    Labels,

    /// Start the playlist for an emotion class
    Play {
        /// Class id (e.g. feliz) or English name (e.g. happy)
        class: String,
    },

    /// Pause playback
    Pause,

    /// List playback devices
    Devices,
}

fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start {
            url,
            image,
            interval_ms,
            no_dedup,
            playlist,
            duration_secs,
        } => cmd_start(StartOptions {
            url,
            image,
            interval_ms,
            no_dedup,
            playlist,
            duration: duration_secs.map(Duration::from_secs),
        }),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        Commands::Labels => {
            cmd_labels();
            Ok(())
        }
        Commands::Play { class } => cmd_play(&class),
        Commands::Pause => cmd_pause(),
        Commands::Devices => cmd_devices(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Initialise logging. `RUST_LOG` filters; `EMOTIPLAY_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("emotiplay_agent=info,emotiplay=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let json = std::env::var("EMOTIPLAY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("Warning: Could not initialise logging: {e}");
    }
}

struct StartOptions {
    url: Option<String>,
    image: Option<PathBuf>,
    interval_ms: Option<u64>,
    no_dedup: bool,
    playlist: bool,
    duration: Option<Duration>,
}

fn cmd_start(options: StartOptions) -> anyhow::Result<()> {
    println!("EmotiPlay Agent v{VERSION}");
    println!();

    let mut config = Config::load().context("loading configuration")?;
    if let Some(url) = options.url.clone() {
        config.stream.url = url;
    }
    if let Some(ms) = options.interval_ms {
        config.stream.send_interval = Duration::from_millis(ms);
    }
    if options.no_dedup {
        config.history.dedup.enabled = false;
    }
    if options.playlist {
        config.playlist.enabled = true;
    }
    #[cfg(not(feature = "playlist"))]
    if config.playlist.enabled {
        eprintln!("Warning: playlist actuation ignored (playlist feature not enabled at compile time)");
        config.playlist.enabled = false;
    }
    config.validate()?;

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    match options.image.clone() {
        Some(path) => {
            println!("  Camera: still image {path:?}");
            run_session(StillImageDevice::new(path), config, options.duration)
        }
        None => {
            println!("  Camera: synthetic test pattern");
            run_session(SyntheticDevice::new(), config, options.duration)
        }
    }
}

fn run_session<D: VideoDevice>(
    device: D,
    config: Config,
    duration: Option<Duration>,
) -> anyhow::Result<()> {
    println!("  Service: {}", config.stream.url);
    println!(
        "  Send interval: {}ms",
        config.stream.send_interval.as_millis()
    );
    println!(
        "  Resolution: {}x{} (JPEG quality {})",
        config.capture.resolution.width,
        config.capture.resolution.height,
        config.capture.jpeg_quality
    );
    println!(
        "  History: {} records, dedup {}",
        config.history.capacity,
        if config.history.dedup.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  Playlist: {}",
        if config.playlist.enabled {
            config.playlist.base_url.as_str()
        } else {
            "disabled"
        }
    );
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    let _guard = runtime.enter();

    let mut capture = CaptureSource::new(device, config.capture.clone());
    capture.start().context("starting camera")?;

    let history = create_shared_history(config.history.capacity);
    let telemetry = create_shared_telemetry_with_persistence(config.data_path.join("telemetry.json"));
    let connector = WsConnector::new(config.stream.connect_timeout);
    let mut pipeline =
        DetectionPipeline::with_parts(&config, connector, history.clone(), telemetry.clone());
    let events = pipeline.subscribe();

    let session_id = uuid::Uuid::new_v4();
    let started_at = Utc::now();
    tracing::info!(%session_id, url = %config.stream.url, "Session starting");
    pipeline.start(Arc::new(capture.frame_tap()));

    println!("Press Ctrl+C to stop");
    println!();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let deadline = duration.map(|d| Instant::now() + d);

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            println!("Duration elapsed.");
            break;
        }

        if let Some(e) = capture.last_error() {
            eprintln!("[Camera] {e}");
            break;
        }

        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                if !print_event(&event) {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                eprintln!("Event stream disconnected unexpectedly");
                break;
            }
        }
    }

    println!();
    println!("Stopping...");
    runtime.block_on(pipeline.stop_and_wait());
    capture.stop();

    if let Err(e) = telemetry.save() {
        eprintln!("Warning: Could not save telemetry: {e}");
    }

    let stats = pipeline.stats();
    println!();
    println!("Session Summary:");
    println!("  Records: {}", stats.total);
    for share in &stats.distribution {
        println!(
            "  {:<12} {:>4} ({:.2}%)",
            share.emotion.to_string(),
            share.count,
            share.percentage
        );
    }
    if let Some(dominant) = stats.dominant {
        println!("  Dominant: {dominant}");
    }
    println!("  Mean confidence: {:.2}", stats.average_confidence);

    if stats.total > 0 {
        let export_path = config.export_path.join(format!(
            "session_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let records: Vec<_> = history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        let export = serde_json::json!({
            "session_id": session_id,
            "started_at": started_at,
            "ended_at": Utc::now(),
            "service_url": config.stream.url,
            "stats": stats,
            "records": records,
        });

        match serde_json::to_string_pretty(&export) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&export_path, json) {
                    eprintln!("Error writing session export: {e}");
                } else {
                    println!();
                    println!("Exported {} records to {:?}", records.len(), export_path);
                }
            }
            Err(e) => eprintln!("Error serializing session: {e}"),
        }
    }

    println!();
    println!("{}", telemetry.summary());
    Ok(())
}

/// Print one event. Returns false when the session cannot continue.
fn print_event(event: &PipelineEvent) -> bool {
    let now = Utc::now().format("%H:%M:%S");
    match event {
        PipelineEvent::Stream(StreamEvent::StateChanged(state)) => {
            println!("[{now}] Connection: {state}");
        }
        PipelineEvent::Stream(StreamEvent::Detection(detection)) => {
            let result = &detection.result;
            println!(
                "[{now}] {} ({:.0}%){}",
                result.emotion,
                result.confidence * 100.0,
                if detection.record { "" } else { " [repeat]" }
            );
        }
        PipelineEvent::Stream(StreamEvent::Reconnecting { attempt, delay }) => {
            println!(
                "[{now}] Reconnecting in {:.1}s (attempt {attempt})",
                delay.as_secs_f64()
            );
        }
        PipelineEvent::Stream(StreamEvent::Error(e)) if e.is_terminal() => {
            eprintln!("[{now}] {e}");
            eprintln!("Run 'emotiplay start' again once the service is reachable.");
            return false;
        }
        PipelineEvent::Stream(StreamEvent::Error(e)) => {
            eprintln!("[{now}] {e}");
        }
        PipelineEvent::Actuated { class, ok } => {
            if *ok {
                println!("[{now}] Playlist: {}", class.playlist_key());
            } else {
                eprintln!("[{now}] Playlist switch to {} failed", class.playlist_key());
            }
        }
        _ => {}
    }
    true
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    println!("EmotiPlay Agent Status");
    println!("======================");
    println!();
    println!("Configuration:");
    println!("  Service: {}", config.stream.url);
    println!(
        "  Send interval: {}ms",
        config.stream.send_interval.as_millis()
    );
    println!("  History capacity: {}", config.history.capacity);
    println!(
        "  Playlist: {}",
        if config.playlist.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();

    match SessionTelemetry::read_persisted(&config.data_path.join("telemetry.json")) {
        Ok(Some(stats)) => {
            println!("Cumulative Statistics:");
            println!("  Frames sent: {}", stats.frames_sent);
            println!("  Detections: {}", stats.detections);
            println!("  Recorded: {}", stats.history_appends);
            println!("  Decode failures: {}", stats.decode_failures);
            println!("  Reconnect attempts: {}", stats.reconnect_attempts);
        }
        Ok(None) => println!("No previous session data found."),
        Err(e) => eprintln!("Warning: Could not read telemetry: {e}"),
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_labels() {
    println!("{:<10} {:<12} Playlist", "Wire", "Class");
    for (label, class) in WIRE_LABELS {
        println!("{label:<10} {:<12} {}", class.as_str(), class.playlist_key());
    }
    println!();
    println!(
        "Unlisted labels decode to '{}'.",
        emotiplay_agent::core::DEFAULT_CLASS
    );
}

#[cfg(feature = "playlist")]
fn playlist_client() -> anyhow::Result<(tokio::runtime::Runtime, emotiplay_agent::playlist::PlaylistClient)> {
    let config = Config::load().context("loading configuration")?;
    let client = emotiplay_agent::playlist::PlaylistClient::new(&config.playlist)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    Ok((runtime, client))
}

#[cfg(feature = "playlist")]
fn cmd_play(class: &str) -> anyhow::Result<()> {
    let class: EmotionClass = class.parse()?;
    let (runtime, client) = playlist_client()?;
    let ack = runtime.block_on(client.play(class))?;
    println!(
        "Playing {}: {}",
        class.playlist_key(),
        ack.message.unwrap_or_else(|| "ok".to_string())
    );
    Ok(())
}

#[cfg(feature = "playlist")]
fn cmd_pause() -> anyhow::Result<()> {
    let (runtime, client) = playlist_client()?;
    let ack = runtime.block_on(client.pause())?;
    println!(
        "Paused: {}",
        ack.message.unwrap_or_else(|| "ok".to_string())
    );
    Ok(())
}

#[cfg(feature = "playlist")]
fn cmd_devices() -> anyhow::Result<()> {
    let (runtime, client) = playlist_client()?;
    let devices = runtime.block_on(client.devices())?;
    if devices.is_empty() {
        println!("No playback devices found.");
    }
    for device in devices {
        println!(
            "{} {} ({})",
            if device.is_active { "*" } else { " " },
            device.name,
            device.kind.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

#[cfg(not(feature = "playlist"))]
fn cmd_play(class: &str) -> anyhow::Result<()> {
    let _: EmotionClass = class.parse()?;
    anyhow::bail!("playlist feature not enabled at compile time")
}

#[cfg(not(feature = "playlist"))]
fn cmd_pause() -> anyhow::Result<()> {
    anyhow::bail!("playlist feature not enabled at compile time")
}

#[cfg(not(feature = "playlist"))]
fn cmd_devices() -> anyhow::Result<()> {
    anyhow::bail!("playlist feature not enabled at compile time")
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
