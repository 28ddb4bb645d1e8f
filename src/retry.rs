//! Retry and timeout helpers for request/response calls.
//!
//! Request retries use the same [`ExponentialBackoff`] as stream reconnects;
//! the jitter source lives here so both paths share it.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::stream::reconnect::{Backoff, ExponentialBackoff};

/// Bounded retry policy for one-shot requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first one.
    pub max_attempts: usize,
    /// Wait applied between attempts.
    pub backoff: ExponentialBackoff,
}

impl RetryPolicy {
    /// Short policy suited to a local backend.
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            backoff: ExponentialBackoff {
                initial: Duration::from_millis(50),
                max: Duration::from_millis(400),
                jitter: Duration::from_millis(25),
            },
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: ExponentialBackoff {
                initial: Duration::ZERO,
                max: Duration::ZERO,
                jitter: Duration::ZERO,
            },
        }
    }

    /// Wait before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        self.backoff.delay(u32::try_from(attempt).unwrap_or(u32::MAX))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::quick()
    }
}

/// Runs `op` until it succeeds, `should_retry` rejects the error, or the
/// attempt budget is spent.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempt >= max_attempts || !should_retry(&error) {
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        debug!(
            event = "request_retry_scheduled",
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

/// Applies a timeout to an async computation.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

/// Pseudo-random duration in `0..=max_jitter`.
pub(crate) fn jitter_duration(max_jitter: Duration, attempt: usize) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }

    let limit_nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = now_nanos ^ ((attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    Duration::from_nanos(mixed % (limit_nanos.saturating_add(1)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{jitter_duration, retry_async, RetryPolicy};
    use crate::stream::reconnect::ExponentialBackoff;

    fn instant_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: ExponentialBackoff {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(2),
                jitter: Duration::ZERO,
            },
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime")
    }

    #[test]
    fn retries_until_success() {
        runtime().block_on(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let result = retry_async(
                &instant_policy(3),
                |_| {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("unavailable")
                        } else {
                            Ok("latest")
                        }
                    }
                },
                |_| true,
            )
            .await;

            assert_eq!(result, Ok("latest"));
            assert_eq!(calls.load(Ordering::SeqCst), 3);
        });
    }

    #[test]
    fn gives_up_after_budget() {
        runtime().block_on(async {
            let attempts_seen = Arc::new(AtomicUsize::new(0));
            let result: Result<(), usize> = retry_async(
                &instant_policy(4),
                |attempt| {
                    let attempts_seen = Arc::clone(&attempts_seen);
                    async move {
                        attempts_seen.store(attempt, Ordering::SeqCst);
                        Err(attempt)
                    }
                },
                |_| true,
            )
            .await;

            assert_eq!(result, Err(4));
            assert_eq!(attempts_seen.load(Ordering::SeqCst), 4);
        });
    }

    #[test]
    fn stops_when_error_is_not_retryable() {
        runtime().block_on(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let result: Result<(), &str> = retry_async(
                &instant_policy(5),
                |_| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err("not found")
                    }
                },
                |_| false,
            )
            .await;

            assert_eq!(result, Err("not found"));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn jitter_stays_within_bound() {
        let bound = Duration::from_millis(3);
        for attempt in 0..64 {
            assert!(jitter_duration(bound, attempt) <= bound);
        }
        assert_eq!(jitter_duration(Duration::ZERO, 1), Duration::ZERO);
    }

    #[test]
    fn none_policy_never_waits() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    }
}
