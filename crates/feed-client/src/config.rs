use std::{collections::HashSet, time::Duration};

use thiserror::Error;

use feed_core::{BackoffPolicy, StreamEndpoint};
use feed_transport::ProbeTarget;

const DEFAULT_PROBE_PERIOD: Duration = Duration::from_secs(30);

/// Runtime configuration for [`crate::FeedClient`].
///
/// The stream set is fixed at startup and immutable for the process
/// lifetime; one backoff policy value is shared read-only by every stream
/// worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    /// Streams to subscribe, one worker each.
    pub streams: Vec<StreamEndpoint>,
    /// Retry schedule applied to every stream connection.
    pub stream_backoff: BackoffPolicy,
    /// Active health prober settings.
    pub probe: ProbeConfig,
}

/// Settings for the active health prober.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    /// Endpoint probed once per period.
    pub target: ProbeTarget,
    /// Fixed schedule period; cycles never overlap.
    pub period: Duration,
    /// Internal per-cycle retry schedule. Unlike stream backoff, exhaustion
    /// here only ends the cycle; the next period always probes again.
    pub backoff: BackoffPolicy,
}

impl ProbeConfig {
    pub fn new(target: ProbeTarget) -> Self {
        Self {
            target,
            period: DEFAULT_PROBE_PERIOD,
            backoff: BackoffPolicy::fixed(Duration::from_secs(2), 3),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no streams configured")]
    NoStreams,
    #[error("duplicate stream id '{id}'")]
    DuplicateStream { id: String },
    #[error("probe period must be greater than zero")]
    ZeroProbePeriod,
}

impl FeedConfig {
    pub fn new(streams: Vec<StreamEndpoint>, probe: ProbeConfig) -> Self {
        Self {
            streams,
            stream_backoff: BackoffPolicy::default(),
            probe,
        }
    }

    pub fn with_stream_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.stream_backoff = backoff;
        self
    }

    /// Check the configuration before any task is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::NoStreams);
        }

        let mut seen = HashSet::new();
        for endpoint in &self.streams {
            if !seen.insert(&endpoint.id) {
                return Err(ConfigError::DuplicateStream {
                    id: endpoint.id.to_string(),
                });
            }
        }

        if self.probe.period.is_zero() {
            return Err(ConfigError::ZeroProbePeriod);
        }

        Ok(())
    }
}
