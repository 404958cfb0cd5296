//! Configuration for the sync engine.

use std::time::{Duration, Instant, SystemTime};

/// Configuration for one synchronized collection.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Collection name; also the cursor key.
    pub collection: String,
    /// Records requested per pull page.
    pub page_size: usize,
    /// Records pushed concurrently.
    pub push_concurrency: usize,
    /// Deadline applied to each remote call.
    pub request_timeout: Option<Duration>,
    /// Abort the cycle on the first per-record failure.
    pub fail_fast: bool,
    /// Retry configuration for [`sync_with_retry`](crate::SyncEngine::sync_with_retry).
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with defaults for `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            page_size: 100,
            push_concurrency: 1,
            request_timeout: Some(Duration::from_secs(30)),
            fail_fast: false,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the pull page size. Zero is treated as one.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets how many records are pushed at once. Zero is treated as one.
    pub fn with_push_concurrency(mut self, concurrency: usize) -> Self {
        self.push_concurrency = concurrency.max(1);
        self
    }

    /// Sets the per-call deadline; `None` disables it.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets whether the first per-record failure aborts the cycle.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the deadline for a remote call starting now.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.request_timeout.map(|timeout| Instant::now() + timeout)
    }
}

/// Backoff policy of [`sync_with_retry`](crate::SyncEngine::sync_with_retry).
///
/// The delay doubles with every retry, starting at `base_delay` and
/// capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Cycles attempted in total, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
    /// Stretch each delay by up to a quarter so clients do not retry in step.
    pub jitter: bool,
}

impl RetryConfig {
    /// Retries up to `max_attempts - 1` times, starting at 100 ms.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Gives up after the first failure.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the first and the largest delay.
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Makes delays exact.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Returns the pause before `attempt`; attempt 0 is the first cycle.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retry) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter {
            delay + delay.mul_f64(0.25 * jitter_fraction())
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// A value in `[0, 1)` taken from the sub-second part of the wall clock.
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1024) / 1024.0
}
