//! Retry-with-backoff policy shared by the playlist fetch and item downloads.
//!
//! The policy is a plain value injected at both call sites, so listing and
//! downloading back off the same way and tests can use a zero-delay policy.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::provider::{ProviderError, ProviderErrorKind};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Double the delay after each failed attempt
    pub use_exponential_backoff: bool,
    /// Decides whether an error is worth another attempt
    pub retry_on: fn(&ProviderError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
            retry_on: ProviderError::is_transient,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) has failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    ///
    /// Once `cancel` is set no further attempt starts, and a failure observed
    /// after cancellation comes back as [`ProviderErrorKind::Interrupted`].
    pub async fn run<T, F, Fut>(&self, label: &str, cancel: &AtomicBool, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(attempt, max_attempts, label, "Starting attempt");
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if cancel.load(Ordering::SeqCst) {
                        debug!(attempt, label, error = %e, "Cancelled, not retrying");
                        return Err(e.interrupted().with_attempts(attempt));
                    }

                    let retryable = (self.retry_on)(&e);
                    if !retryable || attempt >= max_attempts {
                        if retryable {
                            warn!(attempt, label, error = %e, "Giving up after final attempt");
                        } else {
                            debug!(attempt, label, error = %e, "Error is not retryable");
                        }
                        return Err(e.with_attempts(attempt));
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        attempt,
                        label,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    sleep(delay).await;
                    if cancel.load(Ordering::SeqCst) {
                        return Err(ProviderError::new(
                            ProviderErrorKind::Interrupted,
                            format!("cancelled before retrying {}", label),
                        )
                        .with_attempts(attempt));
                    }
                    attempt += 1;
                }
            }
        }
    }
}
