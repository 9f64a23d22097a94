use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Lifecycle state of one logical stream's connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// The stream is open and delivering frames.
    Connected,
    /// The connection was lost after having been established.
    Disconnected,
    /// A failure was recorded and a re-attempt is scheduled.
    Retrying,
    /// Externally paused; no connection and no retries until resume.
    Suspended,
    /// Retries are exhausted (or the cause was not retryable); an explicit
    /// resume is required to re-arm the stream.
    Failed,
    /// Planned close (pause teardown or client shutdown).
    Closed,
    /// No connection attempt has been made yet.
    Unknown,
}

impl ConnectionState {
    /// States that end a connection generation and stop automatic retries.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// Transition validator for one stream's connection lifecycle.
///
/// Exactly one current state per stream; every candidate transition is
/// checked against the edge table before it is committed, so an out-of-order
/// signal can never be applied.
#[derive(Debug, Clone)]
pub struct StreamStateMachine {
    state: ConnectionState,
}

impl Default for StreamStateMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Unknown,
        }
    }
}

impl StreamStateMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Commit a transition to `next`, or reject it with a stable error.
    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState, FeedError> {
        if !allows(self.state, next) {
            return Err(FeedError::invalid_transition(self.state, next));
        }
        self.state = next;
        Ok(next)
    }
}

fn allows(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    match from {
        Unknown => matches!(to, Connecting | Suspended | Closed),
        Connecting => matches!(to, Connected | Retrying | Failed | Suspended | Closed),
        Connected => matches!(to, Disconnected | Failed | Closed | Suspended),
        Disconnected => matches!(to, Retrying | Failed | Suspended | Closed),
        Retrying => matches!(to, Connecting | Failed | Suspended | Closed),
        // Failed and Closed are terminal for the generation; leaving them is
        // only legal through an explicit external resume (or final close).
        Failed => matches!(to, Connecting | Suspended | Closed),
        Suspended => matches!(to, Connecting | Closed),
        Closed => matches!(to, Connecting),
    }
}
