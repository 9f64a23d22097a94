use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::FeedError, state::ConnectionState};

/// Stable identifier of one logical stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One subscribable channel: a stable identifier plus its endpoint path.
///
/// The set of endpoints is fixed at startup and immutable for the process
/// lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamEndpoint {
    /// Logical stream identifier.
    pub id: StreamId,
    /// Endpoint path understood by the streaming transport.
    pub path: String,
}

impl StreamEndpoint {
    pub fn new(id: impl Into<StreamId>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Kind of synchronization announced by network-sync events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Complete re-synchronization.
    Full,
    /// Delta synchronization on top of prior state.
    Incremental,
}

/// Discriminant of a [`DomainEvent`], used to key consumer registrations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    LogBroadcast,
    PreSync,
    PostSync,
    PreNetworkSync,
    PostNetworkSync,
    CustomMessage,
    ConnectionStateChanged,
}

impl EventKind {
    /// Resolve a wire frame name against the known event-name table.
    ///
    /// `ConnectionStateChanged` is synthesized locally and has no wire name.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "log_broadcast" => Some(EventKind::LogBroadcast),
            "pre_sync" => Some(EventKind::PreSync),
            "post_sync" => Some(EventKind::PostSync),
            "pre_network_sync" => Some(EventKind::PreNetworkSync),
            "post_network_sync" => Some(EventKind::PostNetworkSync),
            "custom_message" => Some(EventKind::CustomMessage),
            _ => None,
        }
    }

    /// Wire frame name for kinds that arrive over a stream.
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            EventKind::LogBroadcast => Some("log_broadcast"),
            EventKind::PreSync => Some("pre_sync"),
            EventKind::PostSync => Some("post_sync"),
            EventKind::PreNetworkSync => Some("pre_network_sync"),
            EventKind::PostNetworkSync => Some("post_network_sync"),
            EventKind::CustomMessage => Some("custom_message"),
            EventKind::ConnectionStateChanged => None,
        }
    }
}

/// Decoded domain event fanned out to registered consumers.
///
/// Events are immutable: constructed once by the frame decoder (or, for
/// `ConnectionStateChanged`, by the state-change dispatcher) and shared
/// read-only with every consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DomainEvent {
    /// Free-form log line broadcast by the remote service.
    LogBroadcast {
        /// Broadcast message body.
        message: String,
    },
    /// A synchronization run is about to start.
    PreSync {
        /// Server-reported cause of the run.
        cause: String,
    },
    /// A synchronization run finished.
    PostSync {
        /// Server-reported cause of the run.
        cause: String,
        /// Whether the run actually changed anything.
        did_sync_occur: bool,
    },
    /// A network-wide synchronization is about to start.
    PreNetworkSync {
        /// Server-assigned identifier of the sync run.
        sync_id: String,
        /// Kind of synchronization.
        sync_type: SyncType,
    },
    /// A network-wide synchronization finished.
    PostNetworkSync {
        /// Server-assigned identifier of the sync run.
        sync_id: String,
        /// Kind of synchronization.
        sync_type: SyncType,
        /// Whether the run actually changed anything.
        did_sync_occur: bool,
    },
    /// Application-defined message on a named channel.
    CustomMessage {
        /// Logical channel name.
        channel: String,
        /// Message body.
        message: String,
    },
    /// A stream's connection lifecycle changed.
    ConnectionStateChanged {
        /// Stream whose connection transitioned.
        stream: StreamId,
        /// State entered by the transition.
        state: ConnectionState,
        /// Human-readable transition context.
        message: String,
        /// Failure that triggered the transition, when there was one.
        error: Option<FeedError>,
    },
}

impl DomainEvent {
    /// Discriminant used for consumer registration lookup.
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::LogBroadcast { .. } => EventKind::LogBroadcast,
            DomainEvent::PreSync { .. } => EventKind::PreSync,
            DomainEvent::PostSync { .. } => EventKind::PostSync,
            DomainEvent::PreNetworkSync { .. } => EventKind::PreNetworkSync,
            DomainEvent::PostNetworkSync { .. } => EventKind::PostNetworkSync,
            DomainEvent::CustomMessage { .. } => EventKind::CustomMessage,
            DomainEvent::ConnectionStateChanged { .. } => EventKind::ConnectionStateChanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_name_table_roundtrips() {
        for kind in [
            EventKind::LogBroadcast,
            EventKind::PreSync,
            EventKind::PostSync,
            EventKind::PreNetworkSync,
            EventKind::PostNetworkSync,
            EventKind::CustomMessage,
        ] {
            let name = kind.wire_name().expect("stream kinds have wire names");
            assert_eq!(EventKind::from_wire_name(name), Some(kind));
        }
    }

    #[test]
    fn state_change_has_no_wire_name() {
        assert_eq!(EventKind::ConnectionStateChanged.wire_name(), None);
        assert_eq!(EventKind::from_wire_name("connection_state_changed"), None);
    }

    #[test]
    fn event_kind_matches_variant() {
        let event = DomainEvent::CustomMessage {
            channel: "ops".into(),
            message: "ping".into(),
        };
        assert_eq!(event.kind(), EventKind::CustomMessage);
    }
}
