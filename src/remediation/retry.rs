use crate::backend::BackendError;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);
const BACKOFF_STEP_UNITS: u32 = 3;
const MAX_BACKOFF_UNITS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Linear back-off: retry `n` (1-based) sleeps `min(3n, 10)` units.
pub fn retry_delay(retry: usize, unit: Duration) -> Duration {
    let retry = u32::try_from(retry).unwrap_or(u32::MAX);
    let units = retry
        .saturating_mul(BACKOFF_STEP_UNITS)
        .min(MAX_BACKOFF_UNITS);
    unit.saturating_mul(units)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF_UNIT)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, backoff_unit: Duration) -> Self {
        Self {
            max_retries,
            backoff_unit,
        }
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: usize) -> Duration {
        retry_delay(retry, self.backoff_unit)
    }

    /// Decides whether a failed attempt (`attempts_made` so far) gets another go.
    pub(crate) fn classify(&self, attempts_made: usize, error: &BackendError) -> RetryDisposition {
        if error.is_transient() && attempts_made < self.max_attempts() {
            RetryDisposition::Retry
        } else {
            RetryDisposition::Abort
        }
    }
}
