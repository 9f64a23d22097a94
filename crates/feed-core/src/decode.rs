use serde::Deserialize;
use thiserror::Error;

use crate::events::{DomainEvent, EventKind, SyncType};

/// Why a frame could not be turned into a domain event.
///
/// Decode failures are never connection-fatal: the stream worker logs the
/// frame and drops it.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    /// The frame name is not in the known event-name table.
    #[error("unknown event name '{name}'")]
    UnknownEvent { name: String },
    /// The frame name is known but the payload failed structural decoding.
    #[error("malformed payload for '{name}': {source}")]
    Payload {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogBroadcastWire {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreSyncWire {
    cause: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostSyncWire {
    cause: String,
    did_sync_occur: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreNetworkSyncWire {
    sync_id: String,
    sync_type: SyncType,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostNetworkSyncWire {
    sync_id: String,
    sync_type: SyncType,
    did_sync_occur: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomMessageWire {
    channel: String,
    message: String,
}

/// Decode one `(name, payload)` frame into a domain event.
///
/// Pure: resolves `name` against the event-name table, then decodes the JSON
/// payload for that kind. Unknown fields in payloads are tolerated.
pub fn decode_frame(name: &str, payload: &[u8]) -> Result<DomainEvent, FrameDecodeError> {
    let kind = EventKind::from_wire_name(name).ok_or_else(|| FrameDecodeError::UnknownEvent {
        name: name.to_owned(),
    })?;

    let payload_error = |source| FrameDecodeError::Payload {
        name: name.to_owned(),
        source,
    };

    let event = match kind {
        EventKind::LogBroadcast => {
            let wire: LogBroadcastWire = serde_json::from_slice(payload).map_err(payload_error)?;
            DomainEvent::LogBroadcast {
                message: wire.message,
            }
        }
        EventKind::PreSync => {
            let wire: PreSyncWire = serde_json::from_slice(payload).map_err(payload_error)?;
            DomainEvent::PreSync { cause: wire.cause }
        }
        EventKind::PostSync => {
            let wire: PostSyncWire = serde_json::from_slice(payload).map_err(payload_error)?;
            DomainEvent::PostSync {
                cause: wire.cause,
                did_sync_occur: wire.did_sync_occur,
            }
        }
        EventKind::PreNetworkSync => {
            let wire: PreNetworkSyncWire =
                serde_json::from_slice(payload).map_err(payload_error)?;
            DomainEvent::PreNetworkSync {
                sync_id: wire.sync_id,
                sync_type: wire.sync_type,
            }
        }
        EventKind::PostNetworkSync => {
            let wire: PostNetworkSyncWire =
                serde_json::from_slice(payload).map_err(payload_error)?;
            DomainEvent::PostNetworkSync {
                sync_id: wire.sync_id,
                sync_type: wire.sync_type,
                did_sync_occur: wire.did_sync_occur,
            }
        }
        EventKind::CustomMessage => {
            let wire: CustomMessageWire = serde_json::from_slice(payload).map_err(payload_error)?;
            DomainEvent::CustomMessage {
                channel: wire.channel,
                message: wire.message,
            }
        }
        // Synthesized locally, never present in the wire-name table.
        EventKind::ConnectionStateChanged => unreachable!("no wire name maps to this kind"),
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_log_broadcast() {
        let event = decode_frame("log_broadcast", br#"{"message":"cache flushed"}"#)
            .expect("valid frame");
        assert_eq!(
            event,
            DomainEvent::LogBroadcast {
                message: "cache flushed".into()
            }
        );
    }

    #[test]
    fn decodes_post_network_sync_with_camel_case_fields() {
        let payload = br#"{"syncId":"run-42","syncType":"incremental","didSyncOccur":true}"#;
        let event = decode_frame("post_network_sync", payload).expect("valid frame");
        assert_eq!(
            event,
            DomainEvent::PostNetworkSync {
                sync_id: "run-42".into(),
                sync_type: SyncType::Incremental,
                did_sync_occur: true,
            }
        );
    }

    #[test]
    fn tolerates_unknown_payload_fields() {
        let payload = br#"{"cause":"scheduled","extra":"ignored"}"#;
        let event = decode_frame("pre_sync", payload).expect("extra fields are not an error");
        assert_eq!(
            event,
            DomainEvent::PreSync {
                cause: "scheduled".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_event_name() {
        let err = decode_frame("mystery_event", b"{}").expect_err("unknown name must fail");
        match err {
            FrameDecodeError::UnknownEvent { name } => assert_eq!(name, "mystery_event"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_payload() {
        let err = decode_frame("custom_message", b"{\"channel\":42}")
            .expect_err("wrong field type must fail");
        match err {
            FrameDecodeError::Payload { name, .. } => assert_eq!(name, "custom_message"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
