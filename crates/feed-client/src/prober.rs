use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use feed_core::{BackoffPolicy, HealthRecorder, now_wall_ms};
use feed_transport::{HealthProbe, ProbeTarget};

/// Periodic liveness check against the one-shot probe capability.
///
/// One cycle per period, cycles never overlap (a long cycle makes the
/// scheduler skip missed ticks rather than stack them). A cycle retries
/// internally per its backoff policy; exhaustion records exactly one failed
/// cycle and the next period probes again regardless, so there is no
/// terminal failed state here.
pub(crate) struct HealthProber<P> {
    probe: Arc<P>,
    target: ProbeTarget,
    backoff: BackoffPolicy,
    recorder: Arc<HealthRecorder>,
    cancel: CancellationToken,
}

impl<P: HealthProbe> HealthProber<P> {
    pub(crate) fn new(
        probe: Arc<P>,
        target: ProbeTarget,
        backoff: BackoffPolicy,
        recorder: Arc<HealthRecorder>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            probe,
            target,
            backoff,
            recorder,
            cancel,
        }
    }

    pub(crate) async fn run(self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.run_cycle().await,
            }
        }
    }

    async fn run_cycle(&self) {
        let mut last_response_time_ms = None;

        for attempt in 0..self.backoff.max_attempts() {
            if self.cancel.is_cancelled() {
                return;
            }

            let report = self.probe.probe(&self.target).await;
            if report.success && report.healthy {
                self.recorder.record_healthy(
                    report.response_time_ms,
                    Instant::now(),
                    now_wall_ms(),
                );
                return;
            }

            debug!(
                target = %self.target.name,
                attempt,
                success = report.success,
                healthy = report.healthy,
                issues = ?report.issues,
                "health probe attempt failed"
            );
            last_response_time_ms = Some(report.response_time_ms);

            if attempt + 1 < self.backoff.max_attempts() {
                let delay = self.backoff.delay_for_attempt(attempt);
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = sleep(delay) => {}
                }
            }
        }

        warn!(
            target = %self.target.name,
            attempts = self.backoff.max_attempts(),
            "health probe cycle exhausted its attempts"
        );
        self.recorder
            .record_unhealthy(last_response_time_ms, Instant::now(), now_wall_ms());
    }
}
