use std::time::Duration;

/// A failure reading the client-side payload stream mid-transfer.
#[derive(Debug, thiserror::Error)]
#[error("payload read failed: {0}")]
pub struct PayloadError(pub String);

impl PayloadError {
    pub fn new(msg: impl Into<String>) -> Self {
        PayloadError(msg.into())
    }
}

/// Errors raised by object-store operations.
///
/// Callers branch on the variant, never on a type hierarchy: `Retryable`
/// carries the server-suggested wait, `NotFound` is tolerated on racy reads,
/// `PayloadAborted` means the client-side payload stream failed (fault
/// injection lands here), and `Fatal` is everything else.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Transient server condition; retry after the carried interval.
    #[error("retryable store error during {context}, retry after {retry_after:?}")]
    Retryable {
        context: String,
        retry_after: Duration,
    },

    /// Bucket, key, or version does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The payload source aborted mid-transfer; the write did not take effect.
    #[error("payload aborted: {0}")]
    PayloadAborted(String),

    /// Unclassified failure.
    #[error("store error: {0}")]
    Fatal(String),
}

impl StoreError {
    /// Returns true if the operation may succeed on retry after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Retryable { .. })
    }

    pub fn retryable(context: impl Into<String>, retry_after: Duration) -> Self {
        StoreError::Retryable {
            context: context.into(),
            retry_after,
        }
    }
}

impl From<PayloadError> for StoreError {
    fn from(e: PayloadError) -> Self {
        StoreError::PayloadAborted(e.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let err = StoreError::retryable("archive", Duration::from_secs(2));
        assert!(err.is_retryable());
        assert!(!StoreError::NotFound("b/k".to_string()).is_retryable());
        assert!(!StoreError::Fatal("boom".to_string()).is_retryable());
        assert!(!StoreError::PayloadAborted("mid-stream".to_string()).is_retryable());
    }

    #[test]
    fn test_payload_error_conversion() {
        let err: StoreError = PayloadError::new("injected").into();
        assert!(matches!(err, StoreError::PayloadAborted(m) if m == "injected"));
    }
}
