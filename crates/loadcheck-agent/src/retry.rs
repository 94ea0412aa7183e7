use std::future::Future;
use std::time::Duration;

use loadcheck_store::StoreError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry ceiling for archive-side calls (writes, multipart transactions).
pub const MAX_ARCHIVE_RETRIES: u32 = 10;
/// Retry ceiling for delete-side calls.
pub const MAX_DELETE_RETRIES: u32 = 10;

/// Cap on any single server-suggested backoff.
const MAX_RETRY_WAIT: Duration = Duration::from_secs(30);

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The operation succeeded; `retries` is how many retryable failures
    /// preceded it.
    Done { value: T, retries: u32 },
    /// Shutdown was requested while backing off; the operation was abandoned.
    Cancelled,
}

impl<T> Attempt<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Attempt::Cancelled)
    }
}

/// Drive `op` until it succeeds, fails terminally, or exhausts the retry
/// ceiling.
///
/// Only `StoreError::Retryable` triggers a backoff-and-retry; the wait honors
/// the server's suggested interval (capped) and aborts promptly on `cancel`.
/// Every other error, and a retryable error past the ceiling, is returned to
/// the caller unchanged.
pub async fn with_retries<T, F, Fut>(
    cancel: &CancellationToken,
    max_retries: u32,
    mut op: F,
) -> Result<Attempt<T>, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut retries = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(Attempt::Done { value, retries }),
            Err(err @ StoreError::Retryable { .. }) if retries >= max_retries => {
                return Err(err);
            }
            Err(StoreError::Retryable {
                context,
                retry_after,
            }) => {
                let wait = retry_after.min(MAX_RETRY_WAIT);
                warn!(
                    context = %context,
                    retries,
                    wait_ms = wait.as_millis() as u64,
                    "retryable failure, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(Attempt::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
                retries += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> StoreError {
        StoreError::retryable("test-op", Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result = with_retries(&cancel, MAX_ARCHIVE_RETRIES, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        match result {
            Attempt::Done { value, retries } => {
                assert_eq!(value, 2);
                assert_eq!(retries, 2);
            }
            Attempt::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_exhaustion_reraises_original_error() {
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let err = with_retries::<u32, _, _>(&cancel, MAX_ARCHIVE_RETRIES, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        // Ceiling of 10 means 11 attempts total.
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ARCHIVE_RETRIES + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let err = with_retries::<u32, _, _>(&cancel, MAX_ARCHIVE_RETRIES, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::NotFound("b/k".to_string())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        // Suggested wait is far longer than the cancellation delay.
        let result = with_retries::<u32, _, _>(&cancel, MAX_ARCHIVE_RETRIES, || async {
            Err(StoreError::retryable("slow", Duration::from_secs(3600)))
        })
        .await
        .unwrap();
        assert!(result.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_wait_is_capped() {
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let _ = with_retries(&cancel, 1, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StoreError::retryable("huge-wait", Duration::from_secs(86400)))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();
        assert!(start.elapsed() <= MAX_RETRY_WAIT + Duration::from_secs(1));
    }
}
