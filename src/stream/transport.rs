//! Duplex text transport to the classification service.
//!
//! [`Connector`] is the seam between the streaming client and the network.
//! [`WsConnector`] speaks WebSocket; [`memory`] provides an in-process
//! connector whose far end is driven by the caller.

use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect error: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("send error: {0}")]
    Send(String),
    #[error("receive error: {0}")]
    Receive(String),
}

/// An inbound item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// The remote side started a close handshake
    Close { code: Option<u16>, reason: String },
}

pub type OutboundSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<Inbound, TransportError>> + Send>>;

/// An established duplex link.
pub struct Connection {
    pub sink: OutboundSink,
    pub stream: InboundStream,
}

/// Dials the classification service.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, TransportError>>;
}

/// WebSocket connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let url = url.to_string();
        let connect_timeout = self.connect_timeout;

        Box::pin(async move {
            let (ws, _response) =
                tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                    .await
                    .map_err(|_| TransportError::Timeout(connect_timeout))?
                    .map_err(|e| TransportError::Connect(e.to_string()))?;

            let (write, read) = ws.split();

            let sink = write
                .with(|text: String| future::ready(Ok::<_, WsError>(Message::Text(text))))
                .sink_map_err(|e| TransportError::Send(e.to_string()));

            let stream = read.filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text))),
                    Ok(Message::Binary(bytes)) => {
                        Some(Ok(Inbound::Text(String::from_utf8_lossy(&bytes).into_owned())))
                    }
                    Ok(Message::Close(frame)) => Some(Ok(Inbound::Close {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
                    })),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
                })
            });

            Ok(Connection {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

/// In-process connector for simulations and tests.
pub mod memory {
    use super::*;
    use futures::channel::{mpsc, oneshot};

    /// A pending dial, to be accepted or refused by the far end.
    pub struct DialRequest {
        pub url: String,
        respond: oneshot::Sender<Result<Connection, TransportError>>,
    }

    impl DialRequest {
        /// Complete the dial and return the far end of the link.
        pub fn accept(self) -> MemoryPeer {
            let (out_tx, out_rx) = mpsc::unbounded::<String>();
            let (in_tx, in_rx) = mpsc::unbounded::<Result<Inbound, TransportError>>();

            let connection = Connection {
                sink: Box::pin(out_tx.sink_map_err(|e| TransportError::Send(e.to_string()))),
                stream: Box::pin(in_rx),
            };
            let _ = self.respond.send(Ok(connection));

            MemoryPeer {
                sent: out_rx,
                inbound: in_tx,
            }
        }

        /// Fail the dial.
        pub fn refuse(self, reason: &str) {
            let _ = self
                .respond
                .send(Err(TransportError::Connect(reason.to_string())));
        }
    }

    /// Far end of an accepted in-memory link.
    pub struct MemoryPeer {
        sent: mpsc::UnboundedReceiver<String>,
        inbound: mpsc::UnboundedSender<Result<Inbound, TransportError>>,
    }

    impl MemoryPeer {
        /// Deliver a text message to the client.
        pub fn send_text(&self, text: impl Into<String>) {
            let _ = self.inbound.unbounded_send(Ok(Inbound::Text(text.into())));
        }

        /// Deliver a transport error, which ends the link.
        pub fn fail(&self, reason: &str) {
            let _ = self
                .inbound
                .unbounded_send(Err(TransportError::Receive(reason.to_string())));
        }

        /// Send a close frame but keep the link up.
        pub fn begin_close(&self) {
            let _ = self.inbound.unbounded_send(Ok(Inbound::Close {
                code: Some(1000),
                reason: String::new(),
            }));
        }

        /// Start a close handshake and hang up.
        pub fn close(self) {
            self.begin_close();
        }

        /// Next frame payload sent by the client, or `None` once it hung up.
        pub async fn next_sent(&mut self) -> Option<String> {
            self.sent.next().await
        }

        /// Frame payload already sent by the client, without waiting.
        pub fn try_next_sent(&mut self) -> Option<String> {
            self.sent.try_next().ok().flatten()
        }
    }

    /// Connector whose dials are answered by a [`MemoryServer`].
    pub struct MemoryConnector {
        dials: mpsc::UnboundedSender<DialRequest>,
    }

    /// Receives dial requests from a [`MemoryConnector`].
    pub struct MemoryServer {
        dials: mpsc::UnboundedReceiver<DialRequest>,
    }

    /// Create a connected connector/server pair.
    pub fn pair() -> (MemoryConnector, MemoryServer) {
        let (tx, rx) = mpsc::unbounded();
        (
            MemoryConnector { dials: tx },
            MemoryServer { dials: rx },
        )
    }

    impl Connector for MemoryConnector {
        fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, TransportError>> {
            let (respond, response) = oneshot::channel();
            let request = DialRequest {
                url: url.to_string(),
                respond,
            };
            let queued = self.dials.unbounded_send(request).is_ok();

            Box::pin(async move {
                if !queued {
                    return Err(TransportError::Connect("server gone".to_string()));
                }
                response
                    .await
                    .unwrap_or_else(|_| Err(TransportError::Connect("dial dropped".to_string())))
            })
        }
    }

    impl MemoryServer {
        /// Wait for the next dial.
        pub async fn next_dial(&mut self) -> Option<DialRequest> {
            self.dials.next().await
        }

        /// A dial that is already queued, without waiting.
        pub fn try_next_dial(&mut self) -> Option<DialRequest> {
            self.dials.try_next().ok().flatten()
        }
    }
}
