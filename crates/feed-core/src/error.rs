use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ConnectionState;

/// Broad error category used for retry decisions and telemetry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or other configuration issue.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Request or connection timed out.
    Timeout,
    /// Rate-limited by the remote service.
    RateLimited,
    /// The remote service violated the stream protocol.
    Protocol,
    /// A frame payload failed structural decoding.
    Decode,
    /// A registered consumer callback failed.
    Consumer,
    /// The connection was closed on purpose (pause/shutdown).
    Cancelled,
    /// Internal bug or unclassified failure.
    Internal,
}

impl ErrorCategory {
    /// Whether a connection failure of this category should be retried.
    ///
    /// Classification is by category, never by concrete type, and unknown
    /// failures (`Internal`) default to retryable so they are not silently
    /// swallowed. `Config` is retryable on purpose: an unreachable target at
    /// startup follows the same retry path as any steady-state outage.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorCategory::Auth
                | ErrorCategory::Cancelled
                | ErrorCategory::Decode
                | ErrorCategory::Consumer
        )
    }
}

/// Stable error payload emitted across the event/telemetry boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct FeedError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl FeedError {
    /// Construct a new error.
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_transition(current: ConnectionState, requested: ConnectionState) -> Self {
        Self::new(
            ErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot transition from {current:?} to {requested:?}"),
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        408 => ErrorCategory::Timeout,
        429 => ErrorCategory::RateLimited,
        400..=499 => ErrorCategory::Config,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}
