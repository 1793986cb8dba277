//! Retry logic with exponential backoff
//!
//! Attempt 0 runs immediately; retry `k` (k >= 1) waits
//! `base_delay * 2^(k-1)` first, capped at `max_delay`. A policy with
//! `max_retries = n` makes at most `n + 1` attempts. Errors the predicate
//! rejects are returned at once without consuming a retry.

use snapshot_browser::BrowserError;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that know whether repeating the call could help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for BrowserError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::navigation()
    }
}

impl RetryPolicy {
    /// Create a doubling policy
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Navigation is cheap to redo and often flaky: two retries
    pub fn navigation() -> Self {
        Self::new(2, Duration::from_secs(1))
    }

    /// Every extraction attempt costs inference: one retry
    pub fn extraction() -> Self {
        Self::new(1, Duration::from_secs(1))
    }

    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Cap individual delays
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Total attempts the policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based); zero for the first attempt
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let delay_ms =
            self.base_delay.as_millis() as f64 * self.multiplier.powi((retry - 1) as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay)
    }

    /// Execute an async operation, retrying errors that report themselves retryable
    pub async fn execute<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.execute_counted(operation_name, E::is_retryable, operation)
            .await
            .0
    }

    /// Execute an async operation, retrying errors accepted by `is_retryable`
    pub async fn execute_if<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        is_retryable: P,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        self.execute_counted(operation_name, is_retryable, operation)
            .await
            .0
    }

    /// Like [`execute_if`](Self::execute_if) but also returns the number of attempts made
    pub async fn execute_counted<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        is_retryable: P,
        mut operation: F,
    ) -> (Result<T, E>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(operation = operation_name, attempt, max_attempts, "Attempting operation");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            retries = attempt - 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return (Ok(value), attempt);
                }
                Err(e) => e,
            };

            if !is_retryable(&error) {
                debug!(
                    operation = operation_name,
                    error = %error,
                    "Operation failed with non-retryable error"
                );
                return (Err(error), attempt);
            }

            if attempt >= max_attempts {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %error,
                    "Operation failed after all attempts"
                );
                return (Err(error), attempt);
            }

            let delay = self.delay_for(attempt);
            warn!(
                operation = operation_name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );
            sleep(delay).await;
        }
    }
}
