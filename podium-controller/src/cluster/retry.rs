//! Bounded retry with exponential backoff and jitter
//!
//! Used for every control-plane call to absorb transient network failures.
//! This is per-call plumbing, distinct from the job-level retry policy: a
//! call that exhausts its attempts surfaces a transient error and the loop
//! simply tries again on the next tick.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::ClusterError;

/// Backoff settings for transient control-plane failures
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum attempts per call
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on the delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Execute `operation`, retrying transient failures with exponential
    /// backoff and jitter. Typed failures (not-found, already-exists,
    /// rejection) are returned immediately; retrying them cannot help.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, ClusterError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClusterError>>,
    {
        let mut attempt = 0u32;
        let mut delay = self.initial_delay;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        return Err(e);
                    }

                    // Jitter: 0.5x to 1.5x of the delay
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        delay_ms = jittered.as_millis(),
                        "Cluster call failed, retrying"
                    );

                    tokio::time::sleep(jittered).await;

                    delay = (delay * 2).min(self.max_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let result = fast_policy(3).run("op", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = fast_policy(5)
            .run("op", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ClusterError::Api("connection reset".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), _> = fast_policy(3)
            .run("op", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ClusterError::Api("still down".to_string()))
                }
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_typed_errors_are_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), _> = fast_policy(5)
            .run("op", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ClusterError::AlreadyExists)
                }
            })
            .await;

        assert!(result.unwrap_err().is_already_exists());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
