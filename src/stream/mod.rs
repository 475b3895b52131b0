//! Resilient link to the remote classification service.
//!
//! The [`StreamingClient`] dials through a [`Connector`], sends the latest
//! captured frame on a fixed interval, decodes replies into canonical results
//! and reconnects with exponential backoff when the link drops.

pub mod backoff;
pub mod client;
pub mod state;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use backoff::{Backoff, BackoffConfig};
pub use client::{
    Detection, EventHandler, StreamConfig, StreamError, StreamEvent, StreamingClient,
    DEFAULT_STREAM_URL,
};
pub use state::{transition, ConnectionState, IllegalTransition, LinkEvent};
pub use transport::{Connection, Connector, Inbound, TransportError, WsConnector};
pub use wire::{WireMessage, WireReading};
