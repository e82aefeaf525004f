//! Retry with exponential backoff for transient store failures.

use std::time::Duration;

use statsink_core::{AppError, AppResult};
use tracing::warn;

/// Backoff policy for in-worker retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub backoff_factor: u32,
    /// Whether a random jitter of up to a quarter of the delay is added.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Returns the sleep before the given retry attempt (1-based count of
    /// already-failed attempts).
    #[must_use]
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let multiplier = u64::from(self.backoff_factor).saturating_pow(exponent);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(multiplier);

        let jitter_ms = if self.jitter {
            random_jitter_ms(delay_ms / 4)
        } else {
            0
        };

        Duration::from_millis(delay_ms.saturating_add(jitter_ms))
    }
}

fn random_jitter_ms(cap_ms: u64) -> u64 {
    if cap_ms == 0 {
        return 0;
    }

    let mut bytes = [0_u8; 8];
    if getrandom::fill(&mut bytes).is_err() {
        return 0;
    }

    u64::from_le_bytes(bytes) % (cap_ms + 1)
}

/// Runs `operation` until it succeeds, fails non-retryably, or the policy
/// is exhausted. Only [`AppError::is_retryable`] failures are retried.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0_u32;

    loop {
        attempt = attempt.saturating_add(1);

        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient store failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}
