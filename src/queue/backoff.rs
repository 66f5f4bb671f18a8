//! Bounded retry-with-backoff for infrastructure failures.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// All attempts failed.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` up to `max_attempts` times, sleeping per `policy` between
/// failures. `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut op: F,
    max_attempts: u32,
    policy: &BackoffPolicy,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(last_error) if attempt >= max_attempts => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error,
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, max_attempts, ?delay, error = %e, "attempt failed; backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
