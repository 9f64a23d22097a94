//! Capability seams consumed by the stream runtime.
//!
//! Two collaborator capabilities are defined here: a streaming transport
//! that opens one long-lived connection per logical stream and reports the
//! four listener signals (opened / frame / closed / failed), and a one-shot
//! health probe. The crate ships a deterministic in-memory implementation of
//! both for tests and demos, plus a production HTTP implementation behind
//! the `http` feature.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use feed_core::{FeedError, StreamEndpoint};

/// In-memory scripted implementations of both capabilities.
pub mod scripted;

/// HTTP implementations: streaming GET with server-sent-event framing and a
/// one-shot JSON health endpoint.
#[cfg(feature = "http")]
pub mod http;

/// One listener signal reported by an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// The connection was established.
    Opened,
    /// One named frame arrived.
    Frame { name: String, payload: Vec<u8> },
    /// The remote side ended the stream without a transport error.
    Closed,
    /// The connection failed.
    Failed { error: FeedError },
}

/// A signal tagged with the connection generation it originated from.
///
/// The stream worker discards any signal whose generation is not current, so
/// a superseded connection can never influence newer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedSignal {
    pub generation: u64,
    pub signal: StreamSignal,
}

/// Generation-tagged sender handed to a transport on open.
///
/// The four methods are the listener contract; each send is best-effort
/// (a dropped receiver means the worker is gone and the signal is moot).
#[derive(Debug, Clone)]
pub struct SignalSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedSignal>,
}

impl SignalSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedSignal>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a successful open.
    pub fn opened(&self) {
        self.send(StreamSignal::Opened);
    }

    /// Report one inbound frame. Frames must be reported in receipt order.
    pub fn frame(&self, name: impl Into<String>, payload: Vec<u8>) {
        self.send(StreamSignal::Frame {
            name: name.into(),
            payload,
        });
    }

    /// Report a clean end of stream.
    pub fn closed(&self) {
        self.send(StreamSignal::Closed);
    }

    /// Report a connection failure.
    pub fn failed(&self, error: FeedError) {
        self.send(StreamSignal::Failed { error });
    }

    fn send(&self, signal: StreamSignal) {
        let _ = self.tx.send(TaggedSignal {
            generation: self.generation,
            signal,
        });
    }
}

/// Live handle to one open streaming connection.
///
/// Exclusively owned by the stream worker that opened it and replaced on
/// every reconnect; cancelling releases the underlying connection task.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Release the underlying connection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Capability to open a streaming connection to a named endpoint.
///
/// Implementations deliver signals through the sink from their own tasks;
/// the returned handle must stop delivery promptly once cancelled.
pub trait StreamTransport: Send + Sync + 'static {
    fn open(&self, endpoint: &StreamEndpoint, sink: SignalSink) -> StreamHandle;
}

/// Target of the one-shot health probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Display name used in logs and issue reports.
    pub name: String,
    /// Endpoint path understood by the probe capability.
    pub path: String,
}

impl ProbeTarget {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Result of one health probe call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeReport {
    /// Whether the probe request itself completed.
    pub success: bool,
    /// Application-level healthy flag from the response body.
    pub healthy: bool,
    /// Probe round-trip time in milliseconds.
    pub response_time_ms: u64,
    /// Human-readable issues reported by the target or the transport.
    pub issues: Vec<String>,
}

impl ProbeReport {
    /// A fully healthy probe outcome.
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            success: true,
            healthy: true,
            response_time_ms,
            issues: Vec::new(),
        }
    }

    /// The probe completed but the target reported itself unhealthy.
    pub fn unhealthy(response_time_ms: u64, issues: Vec<String>) -> Self {
        Self {
            success: true,
            healthy: false,
            response_time_ms,
            issues,
        }
    }

    /// The probe request itself failed.
    pub fn transport_failure(response_time_ms: u64, issue: impl Into<String>) -> Self {
        Self {
            success: false,
            healthy: false,
            response_time_ms,
            issues: vec![issue.into()],
        }
    }
}

/// Capability to issue a one-shot health probe.
pub trait HealthProbe: Send + Sync + 'static {
    fn probe(&self, target: &ProbeTarget) -> impl Future<Output = ProbeReport> + Send;
}
