//! Bounded retry with linear backoff for sink calls.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::config::SinkConfig;

/// Lets the executor decide whether an error is worth another attempt.
pub trait RetryClassify: Sized {
    /// Timeouts, refused connections and 5xx-equivalents return true.
    fn is_retryable(&self) -> bool;

    /// Error produced when one attempt exceeds the per-attempt timeout.
    fn timed_out(after: Duration) -> Self;
}

#[derive(Clone, Debug)]
pub struct RetryExecutor {
    max_retries: u32,
    base_delay: Duration,
    attempt_timeout: Duration,
}

impl RetryExecutor {
    pub fn new(max_retries: u32, base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            attempt_timeout,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(config.max_retries, config.base_delay(), config.timeout())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op`, retrying retryable failures up to `max_retries` more times.
    ///
    /// Attempt `n` (1-based retry count) waits `n * base_delay` before running.
    /// Each attempt is bounded by the attempt timeout; a timeout is retryable.
    /// The last error is returned once the budget is spent.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassify + Display,
    {
        let mut attempt: u32 = 0;
        loop {
            let start = Instant::now();
            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(self.attempt_timeout)),
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(operation, attempt, "Sink call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::debug!(operation, error = %err, "Sink call failed with non-retryable error");
                return Err(err);
            }

            if attempt >= self.max_retries {
                tracing::error!(
                    operation,
                    attempts = attempt + 1,
                    error = %err,
                    "Sink call failed, retries exhausted"
                );
                return Err(err);
            }

            attempt += 1;
            let delay = self.base_delay * attempt;
            tracing::warn!(
                operation,
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                error = %err,
                "Sink call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Permanent,
        TimedOut,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl RetryClassify for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Permanent)
        }

        fn timed_out(_after: Duration) -> Self {
            TestError::TimedOut
        }
    }

    fn executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(max_retries, Duration::from_millis(1), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, TestError> = executor(3)
            .run("test", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), TestError> = executor(3)
            .run("test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                }
            })
            .await;
        assert_eq!(result, Err(TestError::Transient));
        // One initial attempt plus three retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), TestError> = executor(3)
            .run("test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Permanent)
                }
            })
            .await;
        assert_eq!(result, Err(TestError::Permanent));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let executor = RetryExecutor::new(1, Duration::from_millis(1), Duration::from_millis(10));
        let result: Result<(), TestError> = executor
            .run("slow", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;
        assert_eq!(result, Err(TestError::TimedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
