//! Detection pipeline: capture → streaming client → decoder → history.
//!
//! The pipeline owns the history and telemetry so they outlive any number of
//! client start/stop cycles. Events are fanned out to subscribers over a
//! bounded channel; a slow subscriber loses events rather than stalling the
//! stream.

use crate::capture::FrameProvider;
use crate::config::Config;
use crate::core::{create_shared_history, CanonicalResult, EmotionClass, HistoryRecord, HistoryStats, SharedHistory};
use crate::stream::{ConnectionState, Connector, StreamError, StreamEvent, StreamingClient};
use crate::telemetry::{create_shared_telemetry, SharedTelemetry};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::{Arc, PoisonError};
use tracing::{debug, info};

#[cfg(feature = "playlist")]
use crate::playlist::PlaylistClient;

const EVENT_QUEUE: usize = 256;

/// What subscribers see.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Stream(StreamEvent),
    /// A result was appended to history
    Recorded(HistoryRecord),
    /// Playback was switched to a new class
    Actuated { class: EmotionClass, ok: bool },
}

/// Wires a [`StreamingClient`] to a shared history and telemetry.
pub struct DetectionPipeline<C: Connector> {
    client: StreamingClient<C>,
    history: SharedHistory,
    telemetry: SharedTelemetry,
    events: Receiver<PipelineEvent>,
    #[cfg(feature = "playlist")]
    actuator: Option<Actuator>,
}

impl<C: Connector> DetectionPipeline<C> {
    /// Build a pipeline from `config`.
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: &Config, connector: C) -> Self {
        Self::with_parts(
            config,
            connector,
            create_shared_history(config.history.capacity),
            create_shared_telemetry(),
        )
    }

    /// Build a pipeline around an existing history and telemetry.
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn with_parts(
        config: &Config,
        connector: C,
        history: SharedHistory,
        telemetry: SharedTelemetry,
    ) -> Self {
        let mut client = StreamingClient::new(config.stream.clone(), connector)
            .with_dedup(config.history.dedup.clone());
        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE);
        #[cfg(feature = "playlist")]
        let actuator = Actuator::from_config(config);

        let sink = EventSink {
            history: Arc::clone(&history),
            telemetry: Arc::clone(&telemetry),
            tx,
            #[cfg(feature = "playlist")]
            actuator: actuator.clone(),
        };
        client.set_event_handler(move |event| sink.handle(event));

        Self {
            client,
            history,
            telemetry,
            events: rx,
            #[cfg(feature = "playlist")]
            actuator,
        }
    }

    /// A receiver for pipeline events. All receivers share one queue.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.events.clone()
    }

    /// Start detecting on frames from `provider`.
    pub fn start(&mut self, provider: Arc<dyn FrameProvider>) -> bool {
        self.client.start(provider)
    }

    /// Stop detecting. The next detection after a restart re-asserts playback.
    pub fn stop(&mut self) {
        self.client.stop();
        self.forget_playback();
    }

    pub async fn stop_and_wait(&mut self) {
        self.client.stop_and_wait().await;
        self.forget_playback();
    }

    #[cfg(feature = "playlist")]
    fn forget_playback(&self) {
        if let Some(actuator) = &self.actuator {
            actuator.forget();
        }
    }

    #[cfg(not(feature = "playlist"))]
    fn forget_playback(&self) {}

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn is_detecting(&self) -> bool {
        self.client.is_detecting()
    }

    pub fn current(&self) -> Option<CanonicalResult> {
        self.client.current()
    }

    pub fn last_error(&self) -> Option<StreamError> {
        self.client.last_error()
    }

    pub fn history(&self) -> SharedHistory {
        Arc::clone(&self.history)
    }

    pub fn stats(&self) -> HistoryStats {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }

    pub fn telemetry(&self) -> SharedTelemetry {
        Arc::clone(&self.telemetry)
    }

    /// Clear history. The only way records leave history besides eviction.
    pub fn reset_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("History cleared");
    }
}

/// Handler state moved into the client's event callback.
struct EventSink {
    history: SharedHistory,
    telemetry: SharedTelemetry,
    tx: Sender<PipelineEvent>,
    #[cfg(feature = "playlist")]
    actuator: Option<Actuator>,
}

impl EventSink {
    fn handle(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Detection(detection) => {
                self.telemetry.record_detection(detection.record);
                if detection.record {
                    let seq = self
                        .history
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .add(detection.result.clone());
                    self.publish(PipelineEvent::Recorded(HistoryRecord {
                        seq,
                        result: detection.result.clone(),
                    }));
                }
                self.actuate(detection.result.emotion);
            }
            StreamEvent::NoDetection { .. } => self.telemetry.record_no_detection(),
            StreamEvent::FrameSent { .. } => self.telemetry.record_frame_sent(),
            StreamEvent::FrameSkipped => self.telemetry.record_frame_skipped(),
            StreamEvent::Reconnecting { .. } => self.telemetry.record_reconnect_attempt(),
            StreamEvent::Error(StreamError::DecodeFailed(_)) => self.telemetry.record_decode_failure(),
            StreamEvent::Error(StreamError::SendFailed(_)) => self.telemetry.record_send_failure(),
            _ => {}
        }
        self.publish(PipelineEvent::Stream(event.clone()));
    }

    fn publish(&self, event: PipelineEvent) {
        publish(&self.tx, event);
    }

    #[cfg(feature = "playlist")]
    fn actuate(&self, class: EmotionClass) {
        if let Some(actuator) = &self.actuator {
            actuator.observe(class, self.tx.clone());
        }
    }

    #[cfg(not(feature = "playlist"))]
    fn actuate(&self, _class: EmotionClass) {}
}

fn publish(tx: &Sender<PipelineEvent>, event: PipelineEvent) {
    match tx.try_send(event) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(_)) => debug!("Event queue full, dropping event"),
    }
}

/// Switches playback when the detected class changes.
#[cfg(feature = "playlist")]
#[derive(Clone)]
struct Actuator {
    client: Arc<PlaylistClient>,
    playing: Arc<std::sync::Mutex<Option<EmotionClass>>>,
    runtime: tokio::runtime::Handle,
}

#[cfg(feature = "playlist")]
impl Actuator {
    fn from_config(config: &Config) -> Option<Self> {
        if !config.playlist.enabled {
            return None;
        }
        match PlaylistClient::new(&config.playlist) {
            Ok(client) => Some(Self {
                client: Arc::new(client),
                playing: Arc::new(std::sync::Mutex::new(None)),
                runtime: tokio::runtime::Handle::current(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Playlist actuation disabled");
                None
            }
        }
    }

    fn forget(&self) {
        *self.playing.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn observe(&self, class: EmotionClass, tx: Sender<PipelineEvent>) {
        {
            let mut playing = self.playing.lock().unwrap_or_else(PoisonError::into_inner);
            if *playing == Some(class) {
                return;
            }
            *playing = Some(class);
        }

        let client = Arc::clone(&self.client);
        let playing = Arc::clone(&self.playing);
        self.runtime.spawn(async move {
            let ok = match client.play(class).await {
                Ok(ack) => {
                    info!(class = %class, message = ?ack.message, "Playlist switched");
                    true
                }
                Err(e) => {
                    tracing::warn!(class = %class, error = %e, "Playlist switch failed");
                    // Allow the next detection of this class to retry.
                    let mut playing = playing.lock().unwrap_or_else(PoisonError::into_inner);
                    if *playing == Some(class) {
                        *playing = None;
                    }
                    false
                }
            };
            publish(&tx, PipelineEvent::Actuated { class, ok });
        });
    }
}
