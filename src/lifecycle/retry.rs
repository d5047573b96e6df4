use crate::config::RetryConfig;
use crate::runtime::RuntimeError;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with exponential backoff for idempotent adapter steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms.max(cfg.base_backoff_ms)),
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Wait before attempt `attempt + 1` (attempts count from 1).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `call` until it succeeds, returns a non-transient error, or the
    /// attempts run out. The last error is returned.
    pub async fn run<T, F, Fut>(
        &self,
        step: &'static str,
        tenant_id: &str,
        mut call: F,
    ) -> Result<T, RuntimeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() || attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let wait = self.backoff_for(attempt);
                    tracing::warn!(
                        tenant_id,
                        step,
                        attempt,
                        backoff_ms = wait.as_millis() as u64,
                        "adapter call failed, retrying: {e}"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_for(1), Duration::from_millis(200));
        assert_eq!(p.backoff_for(2), Duration::from_millis(400));
        assert_eq!(p.backoff_for(3), Duration::from_millis(800));
        assert_eq!(p.backoff_for(10), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retries_then_recovers() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = fast()
            .run("inspect", "t1", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RuntimeError::Engine("daemon busy".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = fast()
            .run("start", "t1", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RuntimeError::Engine("still busy".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Engine(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_never_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = fast()
            .run("stop", "t1", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RuntimeError::NotFound("acme".into()))
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
