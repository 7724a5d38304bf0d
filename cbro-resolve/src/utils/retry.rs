//! Bounded retry with exponential backoff
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the error is retryable and attempts remain: log WARN, back off, retry
//! 4. If the error is not retryable, or attempts are exhausted: return it
//!
//! Backoff for retry `n` (1-based) is `base_delay * factor^(n-1)`. The sleep
//! is cancellable; a cancelled backoff returns the error type's cancellation
//! value instead of retrying.

use cbro_common::config::CatalogSettings;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Value returned when the backoff wait is cancelled
    fn cancelled() -> Self;
}

/// Retry bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, factor: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            factor: factor.max(1),
        }
    }

    pub fn from_settings(settings: &CatalogSettings) -> Self {
        Self::new(
            settings.retry_max_attempts,
            settings.retry_base_delay(),
            settings.retry_factor,
        )
    }

    /// Delay before retry number `retry` (1 = first retry)
    pub fn backoff(&self, retry: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&CatalogSettings::default())
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying catalog request");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Catalog request succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Catalog request failed: retries exhausted"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient catalog failure, will retry after backoff"
                );

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(E::cancelled()),
                }
            }
        }
    }
}
