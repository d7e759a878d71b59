//! Bounded retry with linear backoff.
//!
//! Used for best-effort fetching of an item before it is handed to the
//! player.  Each attempt is capped by a timeout; between attempts the helper
//! sleeps `backoff_step × attempt`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Error of the last attempt.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("attempt {attempt} timed out after {timeout:?}")]
    TimedOut { attempt: u32, timeout: Duration },
    #[error("attempt {attempt} failed: {error}")]
    Failed { attempt: u32, error: E },
}

/// Run `op` until it succeeds or `policy.max_attempts` is exhausted.
/// `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match tokio::time::timeout(policy.attempt_timeout, op(attempt)).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!("{}: succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Ok(Err(error)) => RetryError::Failed { attempt, error },
            Err(_) => RetryError::TimedOut {
                attempt,
                timeout: policy.attempt_timeout,
            },
        };

        warn!("{}: attempt {}/{} failed: {}", label, attempt, attempts, err);
        if attempt >= attempts {
            return Err(err);
        }
        tokio::time::sleep(policy.backoff(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_linear_backoff() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result: Result<&str, RetryError<String>> =
            retry_with_backoff(&RetryPolicy::default(), "test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("boom {}", attempt))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let start = Instant::now();
        let result: Result<(), RetryError<String>> =
            retry_with_backoff(&RetryPolicy::default(), "test", |_| async {
                Err("unreachable host".to_string())
            })
            .await;

        match result {
            Err(RetryError::Failed { attempt, error }) => {
                assert_eq!(attempt, 3);
                assert_eq!(error, "unreachable host");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_is_time_bounded() {
        let start = Instant::now();
        let result: Result<(), RetryError<String>> =
            retry_with_backoff(&RetryPolicy::default(), "test", |_| async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(RetryError::TimedOut { attempt: 3, .. })));
        // Three 10s attempts plus 1s and 2s of backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(33));
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(3));
    }
}
