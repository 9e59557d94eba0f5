//! Bounded retry with optional exponential backoff.
//!
//! [`with_retry`] runs an async operation up to `max_attempts` times. Only
//! errors accepted by the caller's predicate are retried; anything else aborts
//! immediately.

use std::{fmt::Display, future::Future, time::Duration};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 2;
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Factor applied to the delay after each retry. `1` disables backoff.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff: bool) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier: if backoff { DEFAULT_BACKOFF_MULTIPLIER } else { 1 },
        }
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("all {attempts} attempts failed: {last}")]
    Exhausted { attempts: u32, last: E },
    /// An error the predicate rejected; no further attempts were made.
    #[error("{0}")]
    Aborted(E),
}

/// Run `operation` under `policy`, retrying while `is_retryable` accepts the error.
///
/// `label` identifies the operation in log output.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{label} succeeded on attempt {attempt}/{max_attempts}");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(RetryError::Aborted(err));
        }

        if attempt >= max_attempts {
            tracing::error!("All {max_attempts} attempts failed for {label}: {err}");
            return Err(RetryError::Exhausted { attempts: attempt, last: err });
        }

        let delay = policy.delay_before_retry(attempt);
        tracing::warn!(
            "[Retry {attempt}/{max_attempts}] {label} failed with: {err}. Retrying in {delay:?}..."
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
