use std::{
    sync::{PoisonError, RwLock},
    time::Instant,
};

use serde::{Deserialize, Serialize};

/// Liveness summary maintained by the active health prober.
///
/// Independent of per-stream connection statistics: this reflects the
/// one-shot probe endpoint, not the event streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// Whether the last completed probe cycle was healthy.
    pub is_healthy: bool,
    /// Wall-clock time of the last completed cycle, epoch milliseconds.
    pub last_check_ms: Option<u64>,
    /// Probe round-trip latency from the last completed cycle.
    pub last_response_time_ms: Option<u64>,
    /// Consecutive failed cycles (one per cycle, not per internal attempt).
    pub consecutive_failures: u32,
    /// Wall-clock time of the last failed cycle, epoch milliseconds.
    pub last_failure_ms: Option<u64>,
    /// Accumulated milliseconds spent unhealthy.
    pub downtime_ms: u64,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            // Optimistic until the first probe completes, so no downtime is
            // charged before the prober has run at all.
            is_healthy: true,
            last_check_ms: None,
            last_response_time_ms: None,
            consecutive_failures: 0,
            last_failure_ms: None,
            downtime_ms: 0,
        }
    }
}

/// Single-writer health store with guarded read-modify-write updates.
///
/// The prober is the only writer; updates hold the write lock for the whole
/// read-modify-write so overlapping ticks cannot corrupt the counters.
#[derive(Debug, Default)]
pub struct HealthRecorder {
    inner: RwLock<HealthInner>,
}

#[derive(Debug, Default)]
struct HealthInner {
    status: HealthStatus,
    unhealthy_since: Option<Instant>,
}

impl HealthRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a healthy probe cycle.
    pub fn record_healthy(&self, response_time_ms: u64, now: Instant, wall_ms: u64) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(since) = inner.unhealthy_since.take() {
            inner.status.downtime_ms += now.saturating_duration_since(since).as_millis() as u64;
        }
        inner.status.is_healthy = true;
        inner.status.consecutive_failures = 0;
        inner.status.last_check_ms = Some(wall_ms);
        inner.status.last_response_time_ms = Some(response_time_ms);
    }

    /// Record a failed probe cycle (counted once per cycle regardless of how
    /// many internal attempts the cycle made).
    pub fn record_unhealthy(&self, response_time_ms: Option<u64>, now: Instant, wall_ms: u64) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match inner.unhealthy_since {
            Some(since) => {
                inner.status.downtime_ms +=
                    now.saturating_duration_since(since).as_millis() as u64;
                inner.unhealthy_since = Some(now);
            }
            None => inner.unhealthy_since = Some(now),
        }
        inner.status.is_healthy = false;
        inner.status.consecutive_failures += 1;
        inner.status.last_check_ms = Some(wall_ms);
        inner.status.last_failure_ms = Some(wall_ms);
        if let Some(response_time_ms) = response_time_ms {
            inner.status.last_response_time_ms = Some(response_time_ms);
        }
    }

    /// Clone the current health status.
    pub fn snapshot(&self) -> HealthStatus {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
            .clone()
    }
}
