use std::time::Duration;

use crate::error::ErrorCategory;

/// Retry schedule for one stream or the health prober.
///
/// Policies are immutable value objects: a single instance is freely shared
/// between streams and never carries process-wide mutable state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    max_attempts: u32,
    kind: BackoffKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BackoffKind {
    Fixed {
        interval_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
}

impl BackoffPolicy {
    /// Constant delay between attempts.
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            kind: BackoffKind::Fixed {
                interval_ms: interval.as_millis() as u64,
            },
        }
    }

    /// Exponentially growing delay, capped at `max_interval`.
    ///
    /// `multiplier` values below 1.0 are clamped to 1.0 so the schedule is
    /// always non-decreasing in the attempt number.
    pub fn exponential(
        initial: Duration,
        multiplier: f64,
        max_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            kind: BackoffKind::Exponential {
                initial_ms: initial.as_millis() as u64,
                multiplier: if multiplier.is_finite() {
                    multiplier.max(1.0)
                } else {
                    1.0
                },
                max_ms: max_interval.as_millis() as u64,
            },
        }
    }

    /// Consecutive failures tolerated before a stream is marked `Failed`.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait before retry number `attempt` (zero-based).
    ///
    /// Pure and total for every `attempt`; the exponential form clamps to its
    /// configured maximum before returning and cannot overflow.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed { interval_ms } => Duration::from_millis(interval_ms),
            BackoffKind::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                let exponent = attempt.min(64) as i32;
                let raw = initial_ms as f64 * multiplier.powi(exponent);
                let clamped = if raw.is_finite() {
                    raw.min(max_ms as f64)
                } else {
                    max_ms as f64
                };
                Duration::from_millis(clamped.max(0.0) as u64)
            }
        }
    }

    /// Whether a failure of `category` should be retried under this policy.
    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        category.is_retryable()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(30),
            10,
        )
    }
}
