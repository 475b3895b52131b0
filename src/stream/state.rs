//! Connection lifecycle state machine.
//!
//! All state changes go through [`transition`]; any pair not listed there is
//! rejected as an [`IllegalTransition`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle of the link to the classification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session; only reached through an explicit stop
    Idle,
    /// Dial in flight
    Connecting { attempt: u32 },
    /// Link established
    Open { since: DateTime<Utc> },
    /// Remote side started a close handshake
    Closing,
    /// Link gone; a reconnect may be pending
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Open { .. } => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open { .. })
    }

    /// Whether a connection is live or being established.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting { .. } | ConnectionState::Open { .. } | ConnectionState::Closing
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            ConnectionState::Open { since } => write!(f, "open since {}", since.format("%H:%M:%S")),
            other => f.write_str(other.name()),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Begin a dial; `attempt` counts consecutive failures so far plus one
    Dial { attempt: u32 },
    /// Dial succeeded
    Opened { at: DateTime<Utc> },
    /// Dial failed
    DialFailed,
    /// Remote sent a close frame
    RemoteClosing,
    /// Link ended (cleanly or not)
    Dropped,
    /// Explicit stop from the owner
    Stop,
}

/// A transition not allowed by the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition from {from} on {event:?}")]
pub struct IllegalTransition {
    pub from: &'static str,
    pub event: LinkEvent,
}

/// Compute the next state.
pub fn transition(
    current: &ConnectionState,
    event: LinkEvent,
) -> Result<ConnectionState, IllegalTransition> {
    use ConnectionState as S;

    let next = match (current, &event) {
        (_, LinkEvent::Stop) => S::Idle,
        (S::Idle | S::Closed, LinkEvent::Dial { attempt }) => S::Connecting { attempt: *attempt },
        (S::Connecting { .. }, LinkEvent::Opened { at }) => S::Open { since: *at },
        (S::Connecting { .. }, LinkEvent::DialFailed) => S::Closed,
        (S::Open { .. }, LinkEvent::RemoteClosing) => S::Closing,
        (S::Open { .. } | S::Closing, LinkEvent::Dropped) => S::Closed,
        _ => {
            return Err(IllegalTransition {
                from: current.name(),
                event,
            })
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let now = Utc::now();
        let s = ConnectionState::Idle;
        let s = transition(&s, LinkEvent::Dial { attempt: 1 }).unwrap();
        assert_eq!(s, ConnectionState::Connecting { attempt: 1 });
        let s = transition(&s, LinkEvent::Opened { at: now }).unwrap();
        assert!(s.is_open());
        let s = transition(&s, LinkEvent::RemoteClosing).unwrap();
        assert_eq!(s, ConnectionState::Closing);
        let s = transition(&s, LinkEvent::Dropped).unwrap();
        assert_eq!(s, ConnectionState::Closed);
        let s = transition(&s, LinkEvent::Dial { attempt: 1 }).unwrap();
        assert_eq!(s, ConnectionState::Connecting { attempt: 1 });
    }

    #[test]
    fn test_stop_from_any_state() {
        let states = [
            ConnectionState::Idle,
            ConnectionState::Connecting { attempt: 3 },
            ConnectionState::Open { since: Utc::now() },
            ConnectionState::Closing,
            ConnectionState::Closed,
        ];
        for state in states {
            assert_eq!(transition(&state, LinkEvent::Stop).unwrap(), ConnectionState::Idle);
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let open = ConnectionState::Open { since: Utc::now() };
        assert!(transition(&open, LinkEvent::Dial { attempt: 1 }).is_err());
        assert!(transition(&ConnectionState::Idle, LinkEvent::Opened { at: Utc::now() }).is_err());
        assert!(transition(&ConnectionState::Closed, LinkEvent::Dropped).is_err());

        let err = transition(&ConnectionState::Idle, LinkEvent::DialFailed).unwrap_err();
        assert_eq!(err.from, "idle");
    }
}
