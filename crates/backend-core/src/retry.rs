use std::time::Duration;

use crate::error::BackendError;

/// Exponential backoff with a cap, honouring server retry hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
        }
    }

    /// Backoff for a thread poller: start at one poll interval, cap at two
    /// minutes.
    pub fn for_poll_interval(interval: Duration) -> Self {
        let base = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        Self::new(base, base.saturating_mul(24).max(120_000))
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let shift = attempt.min(20);
        let calculated = self.base_delay_ms.saturating_mul(1_u64 << shift);
        let hinted = retry_after_hint_ms.unwrap_or(0);
        Duration::from_millis(calculated.max(hinted).min(self.max_delay_ms))
    }

    /// Delay before retrying after `error`, or `None` when retrying cannot help.
    pub fn delay_for_error(&self, attempt: u32, error: &BackendError) -> Option<Duration> {
        error
            .is_transient()
            .then(|| self.delay_for_attempt(attempt, error.retry_after_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}
