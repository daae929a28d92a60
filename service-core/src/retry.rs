//! Transport retry utilities for source adapters.
//!
//! Provides configurable retry with exponential backoff for pull calls
//! against external sources, bounded by an optional cycle deadline.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

/// Classification hook for errors passed through the retry loop.
pub trait Transient {
    /// Whether the error is worth retrying (timeouts, connection resets,
    /// 5xx responses). Permanent failures (auth, malformed payloads)
    /// return false.
    fn is_transient(&self) -> bool;
}

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff duration.
    pub add_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy with the specified max retries.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate backoff duration for a given attempt.
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = (backoff_ms as f64 * 0.25 * rand_jitter()) as u64;
            duration += Duration::from_millis(jitter);
        }

        duration
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0) without external dependencies.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Execute a source pull with retry.
///
/// Transient errors are retried up to `policy.max_retries` times with
/// exponential backoff; permanent errors and exhausted retries return the
/// last error. When `deadline` is set, a retry whose backoff would overrun
/// it fails immediately instead of sleeping past the deadline.
pub async fn retry_source_call<F, Fut, T, E>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    operation_name: &str,
    f: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "source call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_transient() {
                    warn!(
                        operation = operation_name,
                        error = %err,
                        "source call failed with permanent error, not retrying"
                    );
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error = %err,
                        "source call failed after max retries"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff_duration(attempt);

                if let Some(deadline) = deadline {
                    if Instant::now() + backoff >= deadline {
                        warn!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            error = %err,
                            "retry would overrun the cycle deadline, giving up"
                        );
                        return Err(err);
                    }
                }

                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error = %err,
                    backoff_ms = backoff.as_millis(),
                    "source call failed, retrying after backoff"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error (transient={})", self.transient)
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    #[test]
    fn retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn backoff_duration_doubles() {
        let policy = RetryPolicy {
            add_jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.backoff_duration(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_duration(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_duration_caps_at_max() {
        let policy = RetryPolicy {
            add_jitter: false,
            max_backoff: Duration::from_secs(3),
            ..Default::default()
        };

        assert_eq!(policy.backoff_duration(4), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let policy = RetryPolicy::default();
        let result = retry_source_call(&policy, None, "test_op", || async {
            Ok::<_, TestError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result = retry_source_call(&policy, None, "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(TestError { transient: false })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_error_retried_until_exhausted() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            add_jitter: false,
            ..Default::default()
        };
        let calls = AtomicU32::new(0);
        let result = retry_source_call(&policy, None, "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(TestError { transient: true })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deadline_stops_retries() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_secs(60),
            add_jitter: false,
            ..Default::default()
        };
        let deadline = Instant::now() + Duration::from_millis(10);
        let calls = AtomicU32::new(0);
        let result = retry_source_call(&policy, Some(deadline), "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(TestError { transient: true })
        })
        .await;
        assert!(result.is_err());
        // First attempt runs, but the 60s backoff would overrun the deadline.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
