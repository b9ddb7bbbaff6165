//! Bounded retry with exponential backoff.

use std::future::Future;

use crate::core::{DEFAULT_RETRY_MAX_ATTEMPTS, ErrorClass, OperationError, RetryFailure};
use crate::transport::{BackoffConfig, ExponentialBackoff};

/// Retry policy for write operations.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// Attempts per execution, including the first.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: BackoffConfig,
    /// Fixed jitter seed (tests); `None` seeds from the OS.
    pub jitter_seed: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            backoff: BackoffConfig::retry(),
            jitter_seed: None,
        }
    }
}

impl RetryPolicy {
    /// Check the policy is usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry max attempts must be at least 1".into());
        }
        self.backoff.validate()
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of
    /// attempts. `salt` decorrelates the jitter of concurrent executions
    /// when a seed is configured.
    pub async fn run<F, Fut>(
        &self,
        operation: &str,
        salt: u64,
        mut op: F,
    ) -> Result<(), RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), OperationError>>,
    {
        let seed = self.jitter_seed.map(|seed| seed.wrapping_add(salt));
        let mut backoff = ExponentialBackoff::from_seed(self.backoff.clone(), seed);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(());
                }
                Err(error) => error,
            };

            let class = error.class();
            match class {
                ErrorClass::Transient => {
                    tracing::debug!(operation, attempt, %error, "transient failure")
                }
                ErrorClass::Unknown => {
                    tracing::warn!(
                        operation,
                        attempt,
                        %error,
                        "unclassified failure, treating as transient"
                    )
                }
                ErrorClass::Permanent => {
                    tracing::warn!(operation, attempt, %error, "permanent failure, not retrying")
                }
            }

            if !class.is_retryable() || attempt >= self.max_attempts {
                return Err(RetryFailure {
                    operation: operation.to_owned(),
                    attempts: attempt,
                    class,
                    cause: error,
                });
            }

            let delay = backoff.next_delay();
            tracing::debug!(operation, attempt, ?delay, "retrying after backoff");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            jitter_seed: Some(3),
            ..RetryPolicy::default()
        }
    }

    /// Fails with `error` for the first `failures` calls, then succeeds.
    fn flaky(
        failures: u32,
        error: OperationError,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<(), OperationError>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures {
                Err(error.clone())
            } else {
                Ok(())
            })
        };
        (calls, op)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let (calls, op) = flaky(2, OperationError::Network("reset".into()));
        assert!(policy().run("share", 0, op).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_is_not_retried() {
        let (calls, op) = flaky(10, OperationError::Unauthorized("expired".into()));
        let started = Instant::now();
        let failure = policy().run("share", 0, op).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.class, ErrorClass::Permanent);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_with_backoff() {
        let (calls, op) = flaky(10, OperationError::Timeout);
        let started = Instant::now();
        let failure = policy().run("send wave", 0, op).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.class, ErrorClass::Transient);
        assert_eq!(failure.cause, OperationError::Timeout);
        assert_eq!(failure.operation, "send wave");

        // 1s + 2s, each within ±20%.
        let waited = started.elapsed().as_secs_f64();
        assert!((2.4 - 1e-6..=3.6 + 1e-6).contains(&waited), "waited {waited}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_is_retried() {
        let (calls, op) = flaky(10, OperationError::Other("teapot".into()));
        let failure = policy().run("share", 0, op).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.class, ErrorClass::Unknown);
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        let none = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(none.validate().is_err());
    }
}
