use std::{
    sync::{PoisonError, RwLock},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::state::ConnectionState;

/// Per-stream connection telemetry snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Current connection state.
    pub state: ConnectionState,
    /// Consecutive re-attempts since the last successful open.
    pub retry_count: u32,
    /// Wall-clock time of the last successful open, epoch milliseconds.
    pub last_success_ms: Option<u64>,
    /// Wall-clock time of the last failure, epoch milliseconds.
    pub last_failure_ms: Option<u64>,
    /// Accumulated milliseconds spent `Connected`.
    pub uptime_ms: u64,
    /// Accumulated milliseconds spent in any other state.
    pub downtime_ms: u64,
    /// Latency of the last successful connection establishment.
    pub last_response_time_ms: Option<u64>,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self {
            state: ConnectionState::Unknown,
            retry_count: 0,
            last_success_ms: None,
            last_failure_ms: None,
            uptime_ms: 0,
            downtime_ms: 0,
            last_response_time_ms: None,
        }
    }
}

/// Single-writer statistics store for one stream.
///
/// `update` is driven exclusively by that stream's worker on committed state
/// transitions; `snapshot` is a short read-lock clone safe from any thread.
/// Uptime and downtime accumulate the wall-clock delta from the previous
/// state-entry timestamp, so `uptime_ms + downtime_ms` tracks elapsed time
/// since creation for any interleaving of transitions.
#[derive(Debug)]
pub struct StatsRecorder {
    inner: RwLock<RecorderInner>,
}

#[derive(Debug)]
struct RecorderInner {
    stats: ConnectionStats,
    entered_at: Instant,
    connect_started_at: Option<Instant>,
}

impl StatsRecorder {
    /// Create a recorder whose accumulation base starts at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            inner: RwLock::new(RecorderInner {
                stats: ConnectionStats::default(),
                entered_at: now,
                connect_started_at: None,
            }),
        }
    }

    /// Record a committed transition to `state` at monotonic time `now` and
    /// wall-clock time `wall_ms` (epoch milliseconds).
    pub fn update(&self, state: ConnectionState, now: Instant, wall_ms: u64) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let elapsed = now.saturating_duration_since(inner.entered_at).as_millis() as u64;
        if inner.stats.state == ConnectionState::Connected {
            inner.stats.uptime_ms += elapsed;
        } else {
            inner.stats.downtime_ms += elapsed;
        }
        inner.entered_at = now;

        let connect_started_at = inner.connect_started_at.take();
        match state {
            ConnectionState::Connecting => {
                inner.connect_started_at = Some(now);
            }
            ConnectionState::Connected => {
                inner.stats.last_success_ms = Some(wall_ms);
                inner.stats.retry_count = 0;
                if let Some(started) = connect_started_at {
                    inner.stats.last_response_time_ms =
                        Some(now.saturating_duration_since(started).as_millis() as u64);
                }
            }
            ConnectionState::Retrying => {
                inner.stats.retry_count += 1;
                inner.stats.last_failure_ms = Some(wall_ms);
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                inner.stats.last_failure_ms = Some(wall_ms);
            }
            ConnectionState::Suspended | ConnectionState::Closed | ConnectionState::Unknown => {}
        }

        inner.stats.state = state;
    }

    /// Clone the current statistics.
    pub fn snapshot(&self) -> ConnectionStats {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .stats
            .clone()
    }
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
