//! Tokio runtime for the syncfeed stream client.
//!
//! One worker task per logical stream drives connection opens, frame decode
//! and fan-out, retries through the configured backoff policy, and
//! pause/resume. A single process-wide dispatcher task serializes
//! `ConnectionStateChanged` notices across all streams, and an independent
//! timer task runs the active health prober. [`client::FeedClient`] is the
//! facade over all of it.

/// Client facade: startup, administration, telemetry access.
pub mod client;
/// Typed runtime configuration.
pub mod config;
/// Per-kind consumer registry with ordered, isolated dispatch.
pub mod consumers;
mod dispatcher;
mod prober;
mod worker;

pub use client::FeedClient;
pub use config::{ConfigError, FeedConfig, ProbeConfig};
pub use consumers::{ConsumerId, ConsumerRegistry};
