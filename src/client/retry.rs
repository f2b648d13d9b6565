//! Bounded retry with full exponential backoff and uniform jitter.
//!
//! Invariants:
//! - One terminal `OperationOutcome` per `execute` call, never an error.
//! - At most `max_retries + 1` calls; `attempts` is the number actually made.
//! - Only HTTP statuses in the transient set are retried. Transport faults
//!   end the row immediately as `LocalException`.

use crate::client::{ApiError, ApiResponse, classify, is_transient_status};
use crate::models::{ErrorKind, OperationOutcome, RetrySettings};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry bounds and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each later one
    pub base_backoff: Duration,
    /// Upper bound of the uniform jitter added to every delay
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration, jitter: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            jitter,
        }
    }

    /// Total calls allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Deterministic part of the delay after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt - 1)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }

    /// Full delay: backoff plus `uniform(0, jitter)`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let backoff = self.backoff_for(attempt);
        if self.jitter.is_zero() {
            return backoff;
        }
        let jitter_secs = rng.random_range(0.0..=self.jitter.as_secs_f64());
        backoff.saturating_add(Duration::from_secs_f64(jitter_secs))
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self::new(settings.retries, settings.backoff, settings.jitter)
    }
}

/// Runs one remote operation under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Invoke `operation` until it succeeds, fails permanently, or the retry
    /// budget runs out.
    pub async fn execute<F, Fut>(&self, mut operation: F) -> OperationOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ApiResponse, ApiError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let (status, message) = match operation().await {
                Ok(response) => {
                    return OperationOutcome::Success {
                        http_status: response.status,
                        attempts: attempt,
                        payload: response.body,
                    };
                }
                Err(ApiError::Http { status, message }) => (status, message),
                Err(err @ (ApiError::Transport(_) | ApiError::Decode(_))) => {
                    debug!(attempt, error = %err, "Local fault, not retrying");
                    return OperationOutcome::Failure {
                        http_status: None,
                        message: err.to_string(),
                        kind: ErrorKind::LocalException,
                        attempts: attempt,
                    };
                }
            };

            if is_transient_status(status) && attempt < self.policy.max_attempts() {
                let delay = self.policy.delay_for(attempt, &mut rand::rng());
                debug!(
                    attempt,
                    status,
                    backoff_ms = delay.as_millis() as u64,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return OperationOutcome::Failure {
                http_status: Some(status),
                kind: classify(Some(status), &message),
                message,
                attempts: attempt,
            };
        }
    }
}
