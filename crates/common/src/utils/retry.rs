use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that know whether another attempt could succeed.
pub trait Retryable: std::error::Error {
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff: `base × 2^attempt`, capped at `backoff_max`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    enabled: bool,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_base: Duration,
        backoff_max: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            max_attempts,
            backoff_base,
            backoff_max,
            enabled,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if !self.enabled || attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u64.saturating_pow(attempt - 1);
        let backoff_ms = (self.backoff_base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(backoff_ms.min(self.backoff_max.as_millis() as u64))
    }

    pub async fn wait_before_retry(&self, attempt: u32) {
        let backoff_duration = self.backoff_for(attempt);
        if backoff_duration.is_zero() {
            return;
        }
        debug!("Retrying in {:?} (attempt {})", backoff_duration, attempt);
        sleep(backoff_duration).await;
    }

    pub fn should_retry<E: Retryable>(&self, attempt: u32, error: &E) -> bool {
        if !self.enabled {
            return false;
        }

        if attempt >= self.max_attempts {
            debug!("Max retry attempts ({}) reached", self.max_attempts);
            return false;
        }

        if error.is_retryable() {
            debug!("Error is retryable: {}", error);
            true
        } else {
            warn!("Error is not retryable: {}", error);
            false
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts. `label` only feeds the logs.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            policy.wait_before_retry(attempt).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(op = label, "Operation succeeded after {} retries", attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                warn!(op = label, "Operation failed on attempt {}: {}", attempt + 1, error);
                attempt += 1;
                if attempt < policy.max_attempts() && policy.should_retry(attempt, &error) {
                    continue;
                }
                return Err(error);
            }
        }
    }
}
