//! Retry with exponential backoff
//!
//! Backoff starts at 10ms, doubles after every failed attempt and is capped
//! at 1000ms.

use std::future::Future;
use std::time::{Duration, Instant};

use proctor_common::{Error, Result};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

fn next_backoff(backoff_ms: u64) -> u64 {
    (backoff_ms * 2).min(MAX_BACKOFF_MS)
}

/// Longest time `retry_transient` can spend when every attempt runs into
/// `per_attempt`
///
/// Sum of all attempts plus the backoff sleeps between them.
pub fn retry_budget(max_attempts: u32, per_attempt: Duration) -> Duration {
    let max_attempts = max_attempts.max(1);
    let mut total = per_attempt.saturating_mul(max_attempts);
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    for _ in 1..max_attempts {
        total = total.saturating_add(Duration::from_millis(backoff_ms));
        backoff_ms = next_backoff(backoff_ms);
    }
    total
}

/// Retry a database operation while SQLite reports lock contention
///
/// Non-lock errors are returned immediately. Once `max_wait_ms` has elapsed
/// the operation gives up with `Error::Internal`.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_lock_contention() {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    remaining_ms = max_duration.saturating_sub(elapsed).as_millis(),
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = next_backoff(backoff_ms);
            }
        }
    }
}

/// Retry a collaborator call a bounded number of times
///
/// `is_transient` decides whether an error is worth another attempt; the
/// last error is returned once `max_attempts` have been spent.
pub async fn retry_transient<F, Fut, T, E, P>(
    operation_name: &str,
    max_attempts: u32,
    is_transient: P,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_transient(&err) || attempt >= max_attempts {
                    if attempt > 1 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            error = %err,
                            "Giving up after retries"
                        );
                    }
                    return Err(err);
                }

                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = next_backoff(backoff_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_budget_counts_attempts_and_backoff() {
        let per_attempt = Duration::from_secs(10);
        assert_eq!(retry_budget(1, per_attempt), per_attempt);
        // 3 x 10s + 10ms + 20ms
        assert_eq!(retry_budget(3, per_attempt), Duration::from_millis(30_030));
        assert_eq!(retry_budget(0, per_attempt), per_attempt);
    }

    #[test]
    fn test_retry_budget_backoff_capped() {
        // 10+20+40+80+160+320+640+1000+1000 ms of backoff
        assert_eq!(
            retry_budget(10, Duration::ZERO),
            Duration::from_millis(3_270)
        );
    }

    #[tokio::test]
    async fn test_retry_on_lock_succeeds_first_attempt() {
        let result = retry_on_lock("test_op", 5000, || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_on_lock_non_lock_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_on_lock("test_op", 5000, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, Error>(Error::Internal("boom".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_transient_recovers() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_transient(
            "flaky",
            3,
            |_: &String| true,
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_transient_respects_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: std::result::Result<(), String> = retry_transient(
            "down",
            2,
            |_| true,
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("unavailable".to_string())
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err(), "unavailable");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_transient_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: std::result::Result<(), String> = retry_transient(
            "corrupt",
            5,
            |_| false,
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("corrupt image".to_string())
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
