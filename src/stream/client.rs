//! Streaming client: pushes frames to the classification service and turns
//! its replies into canonical results.
//!
//! One background task owns the link for each `start()`. Every write to the
//! shared slots and every callback is gated on the session epoch, so once
//! [`StreamingClient::stop`] returns nothing from an older session can touch
//! the client or reach the event handler.

use crate::capture::FrameProvider;
use crate::core::decoder::{self, confidence_in_range, DedupConfig, DedupPolicy};
use crate::core::CanonicalResult;
use crate::stream::backoff::{Backoff, BackoffConfig};
use crate::stream::state::{transition, ConnectionState, LinkEvent};
use crate::stream::transport::{Connection, Connector, Inbound, OutboundSink};
use crate::stream::wire::WireMessage;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default classification endpoint.
pub const DEFAULT_STREAM_URL: &str = "ws://localhost:8000/api/ws/emotions/detect";

/// Streaming client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    /// Interval between frame sends while the link is open
    #[serde(with = "crate::config::duration_ms")]
    pub send_interval: Duration,
    /// Upper bound for a single frame send or a close handshake
    #[serde(with = "crate::config::duration_ms")]
    pub send_timeout: Duration,
    /// Dial timeout
    #[serde(with = "crate::config::duration_ms")]
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            send_interval: Duration::from_millis(2000),
            send_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Streaming failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("gave up after {attempts} reconnect attempts")]
    MaxAttemptsExceeded { attempts: u32 },
}

impl StreamError {
    /// Terminal errors end the session until the next explicit `start()`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamError::MaxAttemptsExceeded { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::ConnectFailed(_) => "connect_failed",
            StreamError::SendFailed(_) => "send_failed",
            StreamError::DecodeFailed(_) => "decode_failed",
            StreamError::MaxAttemptsExceeded { .. } => "max_attempts_exceeded",
        }
    }
}

/// An accepted detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub result: CanonicalResult,
    /// Whether the dedup gate lets this result into history
    pub record: bool,
}

/// Everything the client reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    StateChanged(ConnectionState),
    Detection(Detection),
    /// A well-formed message without a usable subject
    NoDetection { note: Option<String> },
    /// Annotated frame returned by the service (base64 JPEG)
    AnnotatedFrame(String),
    FrameSent { bytes: usize },
    /// A tick was dropped because the previous frame was still in flight
    FrameSkipped,
    Reconnecting { attempt: u32, delay: Duration },
    Error(StreamError),
}

pub type EventHandler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

struct Slots {
    state: ConnectionState,
    detecting: bool,
    manual_stop: bool,
    current: Option<CanonicalResult>,
    last_error: Option<StreamError>,
    dedup: DedupPolicy,
}

struct Shared {
    epoch: AtomicU64,
    slots: Mutex<Slots>,
    /// Held for the duration of every handler call
    dispatch: Mutex<()>,
    handler: Mutex<Option<EventHandler>>,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self) -> Option<EventHandler> {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Client for the classification stream.
///
/// The event handler runs on a runtime worker and must not block for long.
/// It must not call back into the client it is registered on.
pub struct StreamingClient<C: Connector> {
    config: Arc<StreamConfig>,
    connector: Arc<C>,
    runtime: Handle,
    shared: Arc<Shared>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    retired: Option<JoinHandle<()>>,
}

impl<C: Connector> StreamingClient<C> {
    /// Create a client bound to the current Tokio runtime.
    ///
    /// Panics when called outside a runtime; use [`Self::with_runtime`] there.
    pub fn new(config: StreamConfig, connector: C) -> Self {
        Self::with_runtime(config, connector, Handle::current())
    }

    pub fn with_runtime(config: StreamConfig, connector: C, runtime: Handle) -> Self {
        Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            runtime,
            shared: Arc::new(Shared {
                epoch: AtomicU64::new(0),
                slots: Mutex::new(Slots {
                    state: ConnectionState::Idle,
                    detecting: false,
                    manual_stop: false,
                    current: None,
                    last_error: None,
                    dedup: DedupPolicy::new(DedupConfig::default()),
                }),
                dispatch: Mutex::new(()),
                handler: Mutex::new(None),
            }),
            cancel: None,
            task: None,
            retired: None,
        }
    }

    /// Replace the dedup policy used to flag results for history.
    pub fn with_dedup(self, config: DedupConfig) -> Self {
        self.shared.slots().dedup = DedupPolicy::new(config);
        self
    }

    pub fn set_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        *self
            .shared
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Begin detecting. Returns `false` (and does nothing) if already detecting.
    pub fn start(&mut self, provider: Arc<dyn FrameProvider>) -> bool {
        let running = self.task.as_ref().is_some_and(|task| !task.is_finished());

        let epoch = {
            let mut slots = self.shared.slots();
            if slots.detecting && running {
                debug!("Streaming client already detecting, ignoring start");
                return false;
            }
            slots.detecting = true;
            slots.manual_stop = false;
            slots.last_error = None;
            slots.current = None;
            slots.state = ConnectionState::Idle;
            slots.dedup.reset();
            self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        if let Some(old) = self.cancel.take() {
            old.cancel();
        }
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let session = Session {
            shared: Arc::clone(&self.shared),
            epoch,
            cancel,
        };

        info!(url = %self.config.url, "Starting detection stream");
        let task = self.runtime.spawn(run_session(
            session,
            Arc::clone(&self.connector),
            provider,
            Arc::clone(&self.config),
        ));
        if let Some(old) = self.task.replace(task) {
            self.retired = Some(old);
        }
        true
    }

    /// Stop detecting and tear the link down. Safe from any state.
    ///
    /// No event is delivered to the handler after this returns.
    pub fn stop(&mut self) {
        let was_detecting = {
            let mut slots = self.shared.slots();
            slots.manual_stop = true;
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            let was_detecting = slots.detecting;
            slots.detecting = false;
            slots.current = None;
            slots.state = transition(&slots.state, LinkEvent::Stop).unwrap_or(ConnectionState::Idle);
            slots.dedup.reset();
            was_detecting
        };

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        // Wait out a handler call that began before the epoch moved.
        drop(
            self.shared
                .dispatch
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        if let Some(task) = self.task.take() {
            self.retired = Some(task);
        }
        if was_detecting {
            info!("Detection stream stopped");
        }
    }

    /// [`Self::stop`], then wait for the background task to close the link.
    pub async fn stop_and_wait(&mut self) {
        self.stop();
        if let Some(task) = self.retired.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Streaming task ended abnormally");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.slots().state.clone()
    }

    pub fn is_detecting(&self) -> bool {
        self.shared.slots().detecting
    }

    /// True after a stop requested by the owner, until the next start.
    pub fn is_manually_stopped(&self) -> bool {
        self.shared.slots().manual_stop
    }

    /// The latest accepted result of this session.
    pub fn current(&self) -> Option<CanonicalResult> {
        self.shared.slots().current.clone()
    }

    pub fn last_error(&self) -> Option<StreamError> {
        self.shared.slots().last_error.clone()
    }

    /// Whether the session ended on a terminal error.
    pub fn is_failed(&self) -> bool {
        let slots = self.shared.slots();
        !slots.detecting && slots.last_error.as_ref().is_some_and(StreamError::is_terminal)
    }
}

impl<C: Connector> Drop for StreamingClient<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle one background task uses to reach the client.
#[derive(Clone)]
struct Session {
    shared: Arc<Shared>,
    epoch: u64,
    cancel: CancellationToken,
}

enum LinkEnd {
    Cancelled,
    Dropped(String),
}

impl Session {
    fn is_current(&self) -> bool {
        !self.cancel.is_cancelled() && self.shared.epoch.load(Ordering::SeqCst) == self.epoch
    }

    /// Mutate the shared slots if this session is still the live one.
    fn update<R>(&self, f: impl FnOnce(&mut Slots) -> R) -> Option<R> {
        let mut slots = self.shared.slots();
        if !self.is_current() {
            return None;
        }
        Some(f(&mut slots))
    }

    /// Apply a lifecycle event and report the new state.
    fn apply(&self, event: LinkEvent) -> bool {
        let next = self.update(|slots| match transition(&slots.state, event) {
            Ok(next) => {
                slots.state = next.clone();
                Some(next)
            }
            Err(e) => {
                warn!(error = %e, "Ignoring lifecycle event");
                None
            }
        });

        match next {
            Some(Some(state)) => {
                debug!(state = %state, "Connection state changed");
                self.emit(StreamEvent::StateChanged(state));
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    fn emit(&self, event: StreamEvent) {
        let Some(handler) = self.shared.handler() else {
            return;
        };
        let _gate = self
            .shared
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.is_current() {
            return;
        }
        handler(&event);
    }

    /// Record a non-terminal error and report it.
    fn fail_soft(&self, err: StreamError) {
        if self
            .update(|slots| slots.last_error = Some(err.clone()))
            .is_some()
        {
            self.emit(StreamEvent::Error(err));
        }
    }

    fn handle_message(&self, text: &str) {
        let reading = match WireMessage::parse(text) {
            Ok(message) => message.into_reading(),
            Err(e) => {
                warn!(error = %e, "Discarding malformed message");
                self.fail_soft(StreamError::DecodeFailed(e.to_string()));
                return;
            }
        };

        if let Some(frame) = reading.annotated_frame {
            self.emit(StreamEvent::AnnotatedFrame(frame));
        }

        let Some(primary) = reading.primary else {
            debug!("No subject detected");
            self.emit(StreamEvent::NoDetection { note: reading.note });
            return;
        };

        if !confidence_in_range(primary.confidence) {
            warn!(confidence = primary.confidence, "Confidence out of range");
            self.fail_soft(StreamError::DecodeFailed(format!(
                "confidence {} outside [0, 1]",
                primary.confidence
            )));
            return;
        }

        if !decoder::is_known(&primary.label) {
            debug!(label = %primary.label, "Unknown label, using default class");
        }
        let result = decoder::decode(&primary.label, primary.confidence);

        let record = self.update(|slots| {
            slots.current = Some(result.clone());
            slots.dedup.should_record(&result)
        });
        if let Some(record) = record {
            debug!(emotion = %result.emotion, confidence = result.confidence, record, "Detection");
            self.emit(StreamEvent::Detection(Detection { result, record }));
        }
    }

    /// One send-interval tick. Skips the tick if a frame is still in flight.
    fn tick(&self, provider: &dyn FrameProvider, frames: &mpsc::Sender<String>, in_flight: &AtomicBool) {
        if in_flight.load(Ordering::SeqCst) {
            debug!("Previous frame still in flight, skipping tick");
            self.emit(StreamEvent::FrameSkipped);
            return;
        }

        let Some(frame) = provider.capture_frame() else {
            debug!("No frame available");
            return;
        };

        in_flight.store(true, Ordering::SeqCst);
        if frames.try_send(frame.payload().to_string()).is_err() {
            in_flight.store(false, Ordering::SeqCst);
            self.emit(StreamEvent::FrameSkipped);
        }
    }
}

async fn run_session<C: Connector>(
    session: Session,
    connector: Arc<C>,
    provider: Arc<dyn FrameProvider>,
    config: Arc<StreamConfig>,
) {
    let mut backoff = Backoff::new(config.backoff.clone());

    loop {
        let attempt = backoff.attempts() + 1;
        if !session.apply(LinkEvent::Dial { attempt }) {
            return;
        }
        debug!(url = %config.url, attempt, "Connecting to classification service");

        let dialed = tokio::select! {
            _ = session.cancel.cancelled() => return,
            dialed = connector.connect(&config.url) => dialed,
        };

        match dialed {
            Ok(connection) => {
                backoff.reset();
                session.update(|slots| slots.last_error = None);
                if !session.apply(LinkEvent::Opened { at: Utc::now() }) {
                    return;
                }
                info!(url = %config.url, "Connected to classification service");

                match run_open(&session, connection, provider.as_ref(), &config).await {
                    LinkEnd::Cancelled => return,
                    LinkEnd::Dropped(reason) => {
                        warn!(reason = %reason, "Connection lost");
                        if !session.apply(LinkEvent::Dropped) {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, attempt, "Connection attempt failed");
                session.fail_soft(StreamError::ConnectFailed(e.to_string()));
                if !session.apply(LinkEvent::DialFailed) {
                    return;
                }
            }
        }

        match backoff.next_delay() {
            Some(delay) => {
                info!(delay_ms = delay.as_millis() as u64, attempt = backoff.attempts(), "Reconnecting after backoff");
                session.emit(StreamEvent::Reconnecting {
                    attempt: backoff.attempts(),
                    delay,
                });
                tokio::select! {
                    _ = session.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                let err = StreamError::MaxAttemptsExceeded {
                    attempts: backoff.attempts(),
                };
                error!(error = %err, "Giving up on classification service");
                let recorded = session.update(|slots| {
                    slots.detecting = false;
                    slots.current = None;
                    slots.last_error = Some(err.clone());
                });
                if recorded.is_some() {
                    session.emit(StreamEvent::Error(err));
                }
                return;
            }
        }
    }
}

async fn run_open(
    session: &Session,
    connection: Connection,
    provider: &dyn FrameProvider,
    config: &StreamConfig,
) -> LinkEnd {
    let Connection { sink, mut stream } = connection;

    let (frames_tx, frames_rx) = mpsc::channel::<String>(1);
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut writer = tokio::spawn(write_frames(
        sink,
        frames_rx,
        session.clone(),
        Arc::clone(&in_flight),
        config.send_timeout,
    ));

    // First tick completes immediately.
    let mut ticker = tokio::time::interval(config.send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // No frames go out once the remote has started closing.
    let mut closing = false;

    let end = loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break LinkEnd::Cancelled,
            _ = ticker.tick(), if !closing => session.tick(provider, &frames_tx, &in_flight),
            inbound = stream.next() => match inbound {
                Some(Ok(Inbound::Text(text))) => session.handle_message(&text),
                Some(Ok(Inbound::Close { code, reason })) => {
                    debug!(?code, reason = %reason, "Remote closing");
                    closing = true;
                    session.apply(LinkEvent::RemoteClosing);
                }
                Some(Err(e)) => break LinkEnd::Dropped(e.to_string()),
                None => break LinkEnd::Dropped("stream ended".to_string()),
            },
        }
    };

    // Closing the queue makes the writer close the sink.
    drop(frames_tx);
    match tokio::time::timeout(config.send_timeout, &mut writer).await {
        Ok(Err(e)) => warn!(error = %e, "Frame writer failed"),
        Err(_) => {
            warn!("Frame writer did not finish, aborting");
            writer.abort();
        }
        Ok(Ok(())) => {}
    }

    end
}

async fn write_frames(
    mut sink: OutboundSink,
    mut frames: mpsc::Receiver<String>,
    session: Session,
    in_flight: Arc<AtomicBool>,
    send_timeout: Duration,
) {
    while let Some(payload) = frames.recv().await {
        let bytes = payload.len();
        let sent = tokio::time::timeout(send_timeout, sink.send(payload)).await;
        in_flight.store(false, Ordering::SeqCst);

        match sent {
            Ok(Ok(())) => session.emit(StreamEvent::FrameSent { bytes }),
            Ok(Err(e)) => {
                warn!(error = %e, "Frame send failed");
                session.fail_soft(StreamError::SendFailed(e.to_string()));
            }
            Err(_) => {
                warn!(timeout_ms = send_timeout.as_millis() as u64, "Frame send timed out");
                session.fail_soft(StreamError::SendFailed("timed out".to_string()));
            }
        }
    }

    if let Ok(Err(e)) = tokio::time::timeout(send_timeout, sink.close()).await {
        debug!(error = %e, "Error closing link");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::EncodedFrame;
    use crate::core::EmotionClass;
    use crate::stream::transport::memory::{self, MemoryPeer, MemoryServer};
    use std::sync::atomic::AtomicUsize;

    fn provider() -> Arc<dyn FrameProvider> {
        Arc::new(|| Some(EncodedFrame::from_data_url("data:image/jpeg;base64,QUJD")))
    }

    fn recorder() -> (Arc<Mutex<Vec<StreamEvent>>>, impl Fn(&StreamEvent) + Send + Sync + 'static) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |event: &StreamEvent| {
            sink.lock().unwrap().push(event.clone());
        })
    }

    fn client(config: StreamConfig) -> (StreamingClient<memory::MemoryConnector>, MemoryServer) {
        let (connector, server) = memory::pair();
        (StreamingClient::new(config, connector), server)
    }

    async fn open(server: &mut MemoryServer) -> MemoryPeer {
        server.next_dial().await.unwrap().accept()
    }

    /// Let spawned tasks run without advancing the clock.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn happy(confidence: f64) -> String {
        format!(r#"{{"emotions": [{{"id": 1, "emotion": "Happy", "confidence": {confidence}, "has_face": true}}]}}"#)
    }

    fn detections(events: &[StreamEvent]) -> Vec<Detection> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Detection(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_and_sends_first_frame_immediately() {
        let (mut client, mut server) = client(StreamConfig::default());
        assert!(client.start(provider()));

        let dial = server.next_dial().await.unwrap();
        assert_eq!(dial.url, DEFAULT_STREAM_URL);
        let mut peer = dial.accept();

        let started = tokio::time::Instant::now();
        assert_eq!(peer.next_sent().await.as_deref(), Some("QUJD"));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(client.state().is_open());
        assert!(client.is_detecting());

        assert_eq!(peer.next_sent().await.as_deref(), Some("QUJD"));
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_class_flagged_once() {
        let (mut client, mut server) = client(StreamConfig::default());
        let (events, handler) = recorder();
        client.set_event_handler(handler);
        client.start(provider());
        let peer = open(&mut server).await;

        peer.send_text(happy(0.9));
        settle().await;
        let first = client.current().unwrap();

        tokio::time::advance(Duration::from_millis(300)).await;
        peer.send_text(happy(0.8));
        settle().await;

        let found = detections(&events.lock().unwrap());
        assert_eq!(found.len(), 2);
        assert!(found[0].record);
        assert!(!found[1].record);

        let current = client.current().unwrap();
        assert_eq!(current.emotion, EmotionClass::Happy);
        assert_eq!(current.confidence, 0.8);
        assert!(current.observed_at >= first.observed_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_keeps_link_open() {
        let (mut client, mut server) = client(StreamConfig::default());
        let (events, handler) = recorder();
        client.set_event_handler(handler);
        client.start(provider());
        let peer = open(&mut server).await;

        peer.send_text("{not json");
        settle().await;

        assert!(client.state().is_open());
        assert!(matches!(client.last_error(), Some(StreamError::DecodeFailed(_))));
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, StreamEvent::Error(StreamError::DecodeFailed(_)))));

        peer.send_text(happy(0.9));
        settle().await;
        assert_eq!(client.current().unwrap().emotion, EmotionClass::Happy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_confidence_is_decode_error() {
        let (mut client, mut server) = client(StreamConfig::default());
        client.start(provider());
        let peer = open(&mut server).await;

        peer.send_text(happy(1.5));
        settle().await;

        assert!(client.current().is_none());
        assert!(matches!(client.last_error(), Some(StreamError::DecodeFailed(_))));
        assert!(client.state().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_detection_leaves_current_untouched() {
        let (mut client, mut server) = client(StreamConfig::default());
        let (events, handler) = recorder();
        client.set_event_handler(handler);
        client.start(provider());
        let peer = open(&mut server).await;

        peer.send_text(happy(0.9));
        settle().await;
        peer.send_text(r#"{"frame": "QUJD", "emotions": []}"#);
        settle().await;

        assert_eq!(client.current().unwrap().confidence, 0.9);
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, StreamEvent::NoDetection { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::AnnotatedFrame(f) if f == "QUJD")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_label_decodes_to_default() {
        let (mut client, mut server) = client(StreamConfig::default());
        client.start(provider());
        let peer = open(&mut server).await;

        peer.send_text(r#"{"emotions": [{"emotion": "Contempt", "confidence": 0.6}]}"#);
        settle().await;

        assert_eq!(client.current().unwrap().emotion, decoder::DEFAULT_CLASS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_noop() {
        let (mut client, mut server) = client(StreamConfig::default());
        assert!(client.start(provider()));
        let _peer = open(&mut server).await;
        settle().await;

        assert!(!client.start(provider()));
        settle().await;
        assert!(server.try_next_dial().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_doubles_and_caps() {
        let config = StreamConfig {
            backoff: BackoffConfig {
                max_attempts: None,
                ..BackoffConfig::default()
            },
            ..StreamConfig::default()
        };
        let (mut client, mut server) = client(config);
        client.start(provider());

        let mut dialed_at = Vec::new();
        for _ in 0..6 {
            let dial = server.next_dial().await.unwrap();
            dialed_at.push(tokio::time::Instant::now());
            dial.refuse("connection refused");
        }

        let gaps: Vec<u64> = dialed_at
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect();
        assert_eq!(gaps, vec![1, 2, 4, 8, 10]);
        assert!(matches!(client.last_error(), Some(StreamError::ConnectFailed(_))));
        assert!(client.is_detecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_successful_open() {
        let (mut client, mut server) = client(StreamConfig::default());
        client.start(provider());

        server.next_dial().await.unwrap().refuse("down");
        server.next_dial().await.unwrap().refuse("down");
        let peer = open(&mut server).await;
        settle().await;
        assert!(client.last_error().is_none());

        peer.fail("reset by peer");
        let lost_at = tokio::time::Instant::now();
        let _dial = server.next_dial().await.unwrap();
        assert_eq!(lost_at.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_is_terminal() {
        let config = StreamConfig {
            backoff: BackoffConfig {
                max_attempts: Some(2),
                ..BackoffConfig::default()
            },
            ..StreamConfig::default()
        };
        let (mut client, mut server) = client(config);
        let (events, handler) = recorder();
        client.set_event_handler(handler);
        client.start(provider());

        for _ in 0..3 {
            server.next_dial().await.unwrap().refuse("down");
        }
        settle().await;

        assert_eq!(
            client.last_error(),
            Some(StreamError::MaxAttemptsExceeded { attempts: 2 })
        );
        assert!(client.is_failed());
        assert!(!client.is_detecting());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, StreamEvent::Error(err) if err.is_terminal())));

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(server.try_next_dial().is_none());

        // Explicit start retries.
        assert!(client.start(provider()));
        assert!(server.next_dial().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_reconnects() {
        let (mut client, mut server) = client(StreamConfig::default());
        let (events, handler) = recorder();
        client.set_event_handler(handler);
        client.start(provider());

        let peer = open(&mut server).await;
        peer.close();
        let _second = open(&mut server).await;
        settle().await;

        assert!(client.state().is_open());
        let states: Vec<&'static str> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                StreamEvent::StateChanged(s) => Some(s.name()),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec!["connecting", "open", "closing", "closed", "connecting", "open"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_frames_sent_while_closing() {
        let (mut client, mut server) = client(StreamConfig::default());
        let (events, handler) = recorder();
        client.set_event_handler(handler);
        client.start(provider());

        let mut peer = open(&mut server).await;
        assert_eq!(peer.next_sent().await.as_deref(), Some("QUJD"));
        settle().await;

        peer.begin_close();
        settle().await;
        assert_eq!(client.state().name(), "closing");

        tokio::time::advance(Duration::from_millis(4500)).await;
        settle().await;
        assert!(peer.try_next_sent().is_none());
        assert!(client.last_error().is_none());

        let sent = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, StreamEvent::FrameSent { .. }))
            .count();
        assert_eq!(sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_after_stop() {
        let (mut client, mut server) = client(StreamConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        client.set_event_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        client.start(provider());
        let peer = open(&mut server).await;
        peer.send_text(happy(0.9));
        settle().await;

        client.stop();
        let after_stop = count.load(Ordering::SeqCst);

        peer.send_text(happy(0.7));
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), after_stop);
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(client.current().is_none());
        assert!(!client.is_detecting());
        assert!(client.is_manually_stopped());
        assert!(server.try_next_dial().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_reconnect() {
        let (mut client, mut server) = client(StreamConfig::default());
        client.start(provider());
        server.next_dial().await.unwrap().refuse("down");
        settle().await;

        client.stop_and_wait().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;

        assert!(server.try_next_dial().is_none());
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_link() {
        let (mut client, mut server) = client(StreamConfig::default());
        client.start(provider());
        let mut peer = open(&mut server).await;
        assert!(peer.next_sent().await.is_some());

        client.stop_and_wait().await;
        assert!(peer.next_sent().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (mut client, _server) = client(StreamConfig::default());
        client.stop();
        client.stop();
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let (mut client, mut server) = client(StreamConfig::default());
        client.start(provider());
        let peer = open(&mut server).await;
        peer.send_text(happy(0.9));
        settle().await;
        client.stop();

        assert!(client.start(provider()));
        let _peer = open(&mut server).await;
        settle().await;
        assert!(client.state().is_open());
        assert!(client.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_tick_while_send_pending() {
        let (mut client, _server) = client(StreamConfig::default());
        let (events, handler) = recorder();
        client.set_event_handler(handler);
        let session = Session {
            shared: Arc::clone(&client.shared),
            epoch: client.shared.epoch.load(Ordering::SeqCst),
            cancel: CancellationToken::new(),
        };

        let in_flight = AtomicBool::new(true);
        let (tx, mut rx) = mpsc::channel::<String>(1);
        session.tick(provider().as_ref(), &tx, &in_flight);

        assert!(rx.try_recv().is_err());
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, StreamEvent::FrameSkipped)));

        in_flight.store(false, Ordering::SeqCst);
        session.tick(provider().as_ref(), &tx, &in_flight);
        assert_eq!(rx.try_recv().unwrap(), "QUJD");
        assert!(in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_frame_skips_send() {
        let (mut client, mut server) = client(StreamConfig::default());
        client.start(Arc::new(|| None::<EncodedFrame>));
        let mut peer = open(&mut server).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(peer.try_next_sent().is_none());
        assert!(client.state().is_open());
    }

    #[test]
    fn test_error_kinds() {
        assert!(StreamError::MaxAttemptsExceeded { attempts: 5 }.is_terminal());
        assert!(!StreamError::SendFailed("x".into()).is_terminal());
        assert_eq!(StreamError::DecodeFailed("x".into()).kind(), "decode_failed");
    }
}
