//! Exponential-backoff retry helper for transient backend failures.

use std::future::Future;
use std::time::Duration;

use crate::storage::error::StorageResult;
#[cfg(test)]
use crate::storage::error::StorageError;

/// Backoff schedule for transient errors.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Ceiling on the doubled delay.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Run `op` until it succeeds, fails non-transiently, or the attempt budget
/// is exhausted. Only [`StorageError::Transient`] triggers a retry; the
/// final transient error is surfaced as-is.
pub async fn with_backoff<T, F, Fut>(cfg: &RetryConfig, op_name: &str, mut op: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut delay = cfg.initial_backoff;
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < cfg.max_attempts => {
                log::debug!(
                    "transient failure in {op_name} (attempt {attempt}/{}): {err}; \
                     backing off {delay:?}",
                    cfg.max_attempts
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(cfg.max_backoff);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> StorageError {
        StorageError::Transient {
            key: "k".to_string(),
            detail: "throttled".to_string(),
            backtrace: snafu::Backtrace::capture(),
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let cfg = RetryConfig {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        };
        let calls = AtomicU32::new(0);
        let result = with_backoff(&cfg, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(42u32)
                }
            }
        })
        .await
        .expect("succeeds on third attempt");
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_transient_after_budget() {
        let cfg = RetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let err = with_backoff(&cfg, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(transient()) }
        })
        .await
        .expect_err("budget exhausted");
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_fast() {
        let cfg = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let err = with_backoff(&cfg, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(StorageError::NotFound {
                    key: "k".to_string(),
                    backtrace: snafu::Backtrace::capture(),
                })
            }
        })
        .await
        .expect_err("not retried");
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
