//! Bounded retry with exponential backoff, and per-call deadlines.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RagError, Result};

/// How many attempts to make for a retryable call and how long to wait
/// between them.
///
/// The delay before retry `n` (0-indexed) is `base_delay_ms * 2^n`, capped at
/// `max_delay_ms`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts (1 = no retry).
    pub max_attempts: usize,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, 500, 8_000)
    }
}

impl RetryPolicy {
    /// Exponential backoff with the given attempt budget and delay bounds.
    pub fn exponential(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self { max_attempts, base_delay_ms, max_delay_ms }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay_ms: 0, max_delay_ms: 0 }
    }

    /// The sleep duration before the given retry (0-indexed).
    pub fn delay_for(&self, retry: usize) -> Duration {
        let ms = 1u64
            .checked_shl(retry as u32)
            .and_then(|factor| self.base_delay_ms.checked_mul(factor))
            .unwrap_or(self.max_delay_ms)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt budget is spent. The last error is returned.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(operation, attempt = attempt + 1, ?delay, error = %e, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bound `future` by `after`, mapping expiry to [`RagError::Timeout`].
pub async fn with_timeout<T>(
    operation: &str,
    after: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(after, future).await {
        Ok(result) => result,
        Err(_) => Err(RagError::Timeout { operation: operation.to_string(), after }),
    }
}

/// Run `f` with each attempt bounded by `after` and retried under `policy`.
///
/// A timed-out attempt counts as a retryable failure.
pub async fn call_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    after: Duration,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_policy(policy, operation, || with_timeout(operation, after, f())).await
}
