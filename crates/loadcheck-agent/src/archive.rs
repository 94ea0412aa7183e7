use std::sync::Arc;

use loadcheck_store::{ObjectStore, PayloadSource, StoreError};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::accounting::{BucketAccounting, Counter};
use crate::ledger::{ExpectedObject, ObjectId, VerificationLedger};
use crate::payload::{fault_offset, GeneratedPayload};
use crate::retry::{with_retries, Attempt, MAX_ARCHIVE_RETRIES};

/// Sizing and fault knobs for archive operations, drawn from the test plan.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveParams {
    pub min_size: u64,
    pub max_size: u64,
    pub part_size: u64,
    pub fault_percent: u8,
}

/// How one archive attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    /// The object was stored and recorded in the ledger; carries the new
    /// version identifier (`None` in unversioned buckets).
    Stored(Option<String>),
    /// An injected payload failure aborted the transfer; nothing was stored.
    Faulted,
    /// Shutdown interrupted the operation.
    Cancelled,
}

/// Split an object of `size` bytes into multipart chunk sizes: full parts of
/// `part_size` with the remainder folded into the last part, so no part is
/// ever smaller than `part_size`.
pub fn plan_chunks(size: u64, part_size: u64) -> Vec<u64> {
    let n = (size / part_size).max(1) as usize;
    let mut chunks = vec![part_size.min(size); n];
    if let Some(last) = chunks.last_mut() {
        *last += size - part_size.min(size) * n as u64;
    }
    chunks
}

/// Digest of a synthesized payload of `size` bytes, computed without
/// producing it again. Used to record the expectation for multipart objects,
/// whose parts stream through separate sources.
fn whole_payload_digest(size: u64) -> blake3::Hash {
    let mut probe = GeneratedPayload::new(size);
    let mut hasher = blake3::Hasher::new();
    // The probe source cannot fail: no fault is injected.
    while let Ok(Some(chunk)) = probe.next_chunk() {
        hasher.update(chunk);
    }
    hasher.finalize()
}

/// Archive one object under `bucket`/`key`: draw a size, pick single-shot or
/// multipart, push the payload with bounded retries and per-attempt fault
/// rolls, and on success record the expected size and digest in the ledger.
///
/// An injected payload failure is a planned outcome, not an error: it counts
/// as an archive error in the accounting and resolves to
/// [`ArchiveStatus::Faulted`]. Genuine store failures (including a retryable
/// failure past the retry ceiling) propagate to the caller.
#[allow(clippy::too_many_arguments)]
pub async fn archive_object(
    store: &Arc<dyn ObjectStore>,
    cancel: &CancellationToken,
    rng: &mut ChaCha8Rng,
    params: &ArchiveParams,
    bucket: &str,
    key: &str,
    ledger: &mut VerificationLedger,
    acct: &mut BucketAccounting,
) -> Result<ArchiveStatus, StoreError> {
    let size = rng.gen_range(params.min_size..=params.max_size);
    acct.increment(Counter::ArchiveRequest);

    let outcome = if size > 2 * params.part_size {
        archive_multipart(store, cancel, rng, params, bucket, key, size).await
    } else {
        archive_single(store, cancel, rng, params, bucket, key, size).await
    };

    match outcome {
        Ok(Attempt::Done { value: version, retries }) => {
            if retries > 0 {
                debug!(bucket, key, retries, "archive succeeded after retries");
            }
            ledger.insert(
                ObjectId::new(bucket, key, version.clone()),
                ExpectedObject {
                    size,
                    digest: Some(whole_payload_digest(size)),
                },
            );
            acct.increment(Counter::ArchiveSuccess);
            acct.add(Counter::SuccessBytesIn, size);
            Ok(ArchiveStatus::Stored(version))
        }
        Ok(Attempt::Cancelled) => Ok(ArchiveStatus::Cancelled),
        Err(StoreError::PayloadAborted(reason)) => {
            warn!(bucket, key, size, %reason, "archive aborted by payload failure");
            acct.increment(Counter::ArchiveError);
            Ok(ArchiveStatus::Faulted)
        }
        Err(err) => {
            acct.increment(Counter::ArchiveError);
            Err(err)
        }
    }
}

async fn archive_single(
    store: &Arc<dyn ObjectStore>,
    cancel: &CancellationToken,
    rng: &mut ChaCha8Rng,
    params: &ArchiveParams,
    bucket: &str,
    key: &str,
    size: u64,
) -> Result<Attempt<Option<String>>, StoreError> {
    with_retries(cancel, MAX_ARCHIVE_RETRIES, || {
        let store = Arc::clone(store);
        let bucket = bucket.to_string();
        let key = key.to_string();
        // Each attempt streams a fresh payload and rolls its own fault.
        let fault = fault_offset(rng, params.fault_percent, size);
        async move {
            let mut source = match fault {
                Some(offset) => GeneratedPayload::failing_at(size, offset),
                None => GeneratedPayload::new(size),
            };
            store.put_object(&bucket, &key, &mut source).await
        }
    })
    .await
}

async fn archive_multipart(
    store: &Arc<dyn ObjectStore>,
    cancel: &CancellationToken,
    rng: &mut ChaCha8Rng,
    params: &ArchiveParams,
    bucket: &str,
    key: &str,
    size: u64,
) -> Result<Attempt<Option<String>>, StoreError> {
    let upload_id = match with_retries(cancel, MAX_ARCHIVE_RETRIES, || {
        let store = Arc::clone(store);
        let bucket = bucket.to_string();
        let key = key.to_string();
        async move { store.start_multipart(&bucket, &key).await }
    })
    .await?
    {
        Attempt::Done { value, .. } => value,
        Attempt::Cancelled => return Ok(Attempt::Cancelled),
    };

    for (index, chunk_size) in plan_chunks(size, params.part_size).into_iter().enumerate() {
        let part_number = index as u32 + 1;
        let attempt = with_retries(cancel, MAX_ARCHIVE_RETRIES, || {
            let store = Arc::clone(store);
            let bucket = bucket.to_string();
            let key = key.to_string();
            let upload_id = upload_id.clone();
            let fault = fault_offset(rng, params.fault_percent, chunk_size);
            async move {
                let mut source = match fault {
                    Some(offset) => GeneratedPayload::failing_at(chunk_size, offset),
                    None => GeneratedPayload::new(chunk_size),
                };
                store
                    .upload_part(&bucket, &key, &upload_id, part_number, &mut source)
                    .await
            }
        })
        .await?;
        if attempt.is_cancelled() {
            return Ok(Attempt::Cancelled);
        }
    }

    with_retries(cancel, MAX_ARCHIVE_RETRIES, || {
        let store = Arc::clone(store);
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.clone();
        async move { store.complete_multipart(&bucket, &key, &upload_id).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remainder_folds_into_last_chunk() {
        assert_eq!(plan_chunks(2500, 1000), vec![1000, 1500]);
        assert_eq!(plan_chunks(3000, 1000), vec![1000, 1000, 1000]);
        assert_eq!(plan_chunks(3999, 1000), vec![1000, 1000, 1999]);
    }

    #[test]
    fn test_small_sizes_stay_single_chunk() {
        assert_eq!(plan_chunks(999, 1000), vec![999]);
        assert_eq!(plan_chunks(1000, 1000), vec![1000]);
    }

    #[test]
    fn test_whole_digest_matches_streamed_payload() {
        let size = 50_000u64;
        let mut source = GeneratedPayload::new(size);
        while let Ok(Some(_)) = source.next_chunk() {}
        assert_eq!(source.digest(), whole_payload_digest(size));
    }
}
