//! Exponential backoff for transient storage and sink failures

use crate::config::RetryConfig;
use crate::domain::Result;
use crate::log_retry_attempt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Delay cap
    pub max_delay: Duration,
    /// Growth factor between retries
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
        }
    }
}

/// Runs `attempt` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent
///
/// Only errors for which [`crate::domain::DeidError::is_transient`] holds are
/// retried. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry_count = 0;
    let mut delay = policy.initial_delay;

    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retry_count < policy.max_retries => {
                retry_count += 1;
                log_retry_attempt!(operation, retry_count, policy.max_retries, e);
                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
            Err(e) => {
                if retry_count > 0 {
                    tracing::error!(
                        operation = operation,
                        retries = retry_count,
                        error = %e,
                        "Operation failed after retries"
                    );
                }
                return Err(e);
            }
        }
    }
}
