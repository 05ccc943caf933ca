use std::future::Future;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::utils::StoreError;

/// Per-attempt timeout plus exponential backoff for durable store calls.
///
/// Only transient failures (timeouts, connectivity) are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl From<&TimeoutConfig> for RetryPolicy {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.backoff_base_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base * 2^(retry-1)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &'static str,
        attempt_timeout: Duration,
        mut operation: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut retries = 0u32;

        loop {
            let error = match tokio::time::timeout(attempt_timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => StoreError::Timeout {
                    op: operation_name,
                    after: attempt_timeout,
                },
            };

            if !error.is_transient() || retries >= self.max_retries {
                return Err(error);
            }

            retries += 1;
            let wait = self.backoff(retries);
            tracing::warn!(
                "{} failed (retry {}/{}), retrying in {:?}: {}",
                operation_name,
                retries,
                self.max_retries,
                wait,
                error
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = policy
            .run("insert", Duration::from_secs(1), || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(StoreError::Connection("reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result: Result<(), _> = policy
            .run("recent", Duration::from_secs(1), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Connection("down".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(StoreError::Connection(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result: Result<(), _> = policy
            .run("search", Duration::from_secs(1), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::Query("text index required".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(StoreError::Query(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let start = tokio::time::Instant::now();

        let result: Result<(), _> = policy
            .run("find_duplicate", Duration::from_secs(5), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<Result<(), StoreError>>().await
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(StoreError::Timeout {
                op: "find_duplicate",
                ..
            })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(10_100));
        assert!(elapsed < Duration::from_millis(10_200));
    }
}
