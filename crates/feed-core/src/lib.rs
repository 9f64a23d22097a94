//! Core contract shared between the stream runtime and telemetry consumers.
//!
//! This crate defines the domain event model, frame decoding, backoff
//! policies, the connection lifecycle state machine, and the connection and
//! health telemetry stores. It performs no I/O.

/// Backoff policy value objects used by retry loops.
pub mod backoff;
/// Pure frame-to-event decoding.
pub mod decode;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Domain events, event kinds, and stream identity types.
pub mod events;
/// Health-probe telemetry store.
pub mod health;
/// Connection lifecycle states and transition validation.
pub mod state;
/// Per-stream connection telemetry store.
pub mod stats;

pub use backoff::BackoffPolicy;
pub use decode::{FrameDecodeError, decode_frame};
pub use error::{ErrorCategory, FeedError, classify_http_status};
pub use events::{DomainEvent, EventKind, StreamEndpoint, StreamId, SyncType};
pub use health::{HealthRecorder, HealthStatus};
pub use state::{ConnectionState, StreamStateMachine};
pub use stats::{ConnectionStats, StatsRecorder, now_wall_ms};
