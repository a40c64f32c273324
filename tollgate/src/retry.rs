//! Retry driver with exponential backoff for ledger-facing calls.
//!
//! Every network-touching component runs its RPC calls through one
//! [`RetryPolicy`]. Only errors whose [`Retryable`] classification says so
//! are retried; terminal errors surface on the first attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Retryable;

/// Exponential backoff policy with jitter.
///
/// Delays grow as `base_delay * 2^(attempt-1)`, capped at `max_delay`, with
/// ±25% jitter applied to the capped value to avoid synchronized retries
/// across concurrent verification tasks.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one.
    max_attempts: u32,
    /// Delay before the first retry.
    base_delay: Duration,
    /// Upper bound on any single delay.
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with explicit bounds.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Maximum number of attempts, including the initial one.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pre-jitter delay for a 0-indexed attempt.
    ///
    /// Non-decreasing in `attempt` until the cap, then constant. Attempt 0
    /// (the initial call) has no delay.
    #[must_use]
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt - 1);
        let raw = self.base_delay.saturating_mul(multiplier);
        raw.min(self.max_delay)
    }

    /// Jittered delay for a 0-indexed attempt: the capped exponential delay
    /// shifted by a uniform ±25%.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let capped = self.base_delay_for_attempt(attempt);
        if capped.is_zero() {
            return capped;
        }

        #[allow(clippy::cast_possible_truncation)]
        let capped_ms = capped.as_millis() as u64;
        let jitter_range = capped_ms / 4;
        if jitter_range == 0 {
            return capped;
        }
        let jitter = rand::random::<u64>() % (jitter_range * 2);
        Duration::from_millis(capped_ms - jitter_range + jitter)
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. Sleeps the jittered backoff delay before each retry.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last retryable error
    /// once `max_attempts` is exhausted.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            let delay = self.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug!(attempt, ?delay, "retrying after backoff");
                sleep(delay).await;
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "transient failure, will retry"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}
