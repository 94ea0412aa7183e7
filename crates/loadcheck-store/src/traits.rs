use async_trait::async_trait;

use crate::error::{PayloadError, StoreError};
use crate::types::{BucketInfo, KeyInfo, UsageReport, VersionInfo};

/// A pull source of payload bytes for archive operations.
///
/// Implementations synthesize or stream data; the store drains the source
/// chunk by chunk. A mid-stream error aborts the transfer and surfaces as
/// `StoreError::PayloadAborted`.
pub trait PayloadSource: Send {
    /// Total number of bytes this source will produce.
    fn total_size(&self) -> u64;

    /// Produce the next chunk, `None` once exhausted.
    fn next_chunk(&mut self) -> Result<Option<&[u8]>, PayloadError>;
}

/// A push sink for retrieved payload bytes.
pub trait PayloadSink: Send {
    fn write(&mut self, chunk: &[u8]);
}

/// The object-storage service as seen by a simulated customer.
///
/// The wire protocol behind this trait is out of scope; every call may fail
/// with a classified `StoreError`. Version identifiers are opaque strings and
/// are absent (`None`) for objects in unversioned buckets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Delete a bucket. The bucket must already be empty of keys.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Set the versioning flag of a bucket. Fixed for the bucket's lifetime
    /// once objects exist.
    async fn set_versioning(&self, bucket: &str, enabled: bool) -> Result<(), StoreError>;

    /// List keys with their latest version and size.
    async fn list_keys(&self, bucket: &str) -> Result<Vec<KeyInfo>, StoreError>;

    /// List every version of every key in a versioned bucket.
    async fn list_versions(&self, bucket: &str) -> Result<Vec<VersionInfo>, StoreError>;

    /// Write a full object with replace semantics. Returns the new version
    /// identifier for versioned buckets, `None` for unversioned ones.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &mut dyn PayloadSource,
    ) -> Result<Option<String>, StoreError>;

    /// Begin a multipart upload, returning its transaction identifier.
    async fn start_multipart(&self, bucket: &str, key: &str) -> Result<String, StoreError>;

    /// Upload one part of a multipart transaction. Parts are numbered from 1.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        source: &mut dyn PayloadSource,
    ) -> Result<(), StoreError>;

    /// Assemble the uploaded parts into one object. Returns the version
    /// identifier (the upload id) for versioned buckets, `None` otherwise.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Read an object (the latest version, or a specific one) into `sink`.
    /// Returns the number of bytes written.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
        sink: &mut dyn PayloadSink,
    ) -> Result<u64, StoreError>;

    /// Delete a key (all versions) or, with `version`, one specific version.
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Fetch the server's self-reported per-bucket operational statistics.
    async fn usage_reports(&self) -> Result<Vec<UsageReport>, StoreError>;
}
