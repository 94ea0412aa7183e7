use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{ObjectStore, PayloadSink, PayloadSource};
use crate::types::{BucketInfo, KeyInfo, OpsSnapshot, UsageReport, VersionInfo};

#[derive(Debug, Clone)]
struct ObjectVersion {
    version: Option<String>,
    data: Vec<u8>,
}

#[derive(Debug)]
struct BucketData {
    versioned: bool,
    deleted: bool,
    /// Key -> versions in creation order. Unversioned buckets hold exactly
    /// one version per key.
    objects: BTreeMap<String, Vec<ObjectVersion>>,
    /// Reporting intervals; the last one is live. A fresh bucket starts with
    /// a single interval.
    ops: Vec<OpsSnapshot>,
}

impl BucketData {
    fn new() -> Self {
        BucketData {
            versioned: false,
            deleted: false,
            objects: BTreeMap::new(),
            ops: vec![OpsSnapshot::default()],
        }
    }

    fn live_ops(&mut self) -> &mut OpsSnapshot {
        if self.ops.is_empty() {
            self.ops.push(OpsSnapshot::default());
        }
        let last = self.ops.len() - 1;
        &mut self.ops[last]
    }
}

#[derive(Debug)]
struct Upload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    buckets: BTreeMap<String, BucketData>,
    uploads: HashMap<String, Upload>,
    version_seq: u64,
    upload_seq: u64,
}

/// Deterministic in-memory `ObjectStore` used by tests and the demo runner.
///
/// Accumulates server-side operational counters per bucket so audit
/// reconciliation can be exercised end to end.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Close the live reporting interval of a bucket and open a fresh one.
    ///
    /// Test support: a well-behaved run never splits intervals, and audit
    /// reconciliation flags a split as an error.
    pub fn begin_new_reporting_interval(&self, bucket: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(data) = inner.buckets.get_mut(bucket) {
            data.ops.push(OpsSnapshot::default());
        }
    }

    fn drain(source: &mut dyn PayloadSource) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::with_capacity(source.total_size() as usize);
        while let Some(chunk) = source.next_chunk()? {
            buf.extend_from_slice(chunk);
        }
        Ok(buf)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn live_bucket<'a>(inner: &'a mut Inner, bucket: &str) -> Result<&'a mut BucketData, StoreError> {
    match inner.buckets.get_mut(bucket) {
        Some(data) if !data.deleted => Ok(data),
        _ => Err(StoreError::NotFound(bucket.to_string())),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .buckets
            .iter()
            .filter(|(_, data)| !data.deleted)
            .map(|(name, data)| BucketInfo {
                name: name.clone(),
                versioned: data.versioned,
            })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.buckets.get(bucket) {
            Some(data) if !data.deleted => {
                Err(StoreError::Fatal(format!("bucket '{bucket}' already exists")))
            }
            _ => {
                // A reused name starts a fresh accounting epoch.
                inner.buckets.insert(bucket.to_string(), BucketData::new());
                Ok(())
            }
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let data = live_bucket(&mut inner, bucket)?;
        if !data.objects.is_empty() {
            return Err(StoreError::Fatal(format!(
                "bucket '{bucket}' still holds {} keys",
                data.objects.len()
            )));
        }
        data.deleted = true;
        Ok(())
    }

    async fn set_versioning(&self, bucket: &str, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let data = live_bucket(&mut inner, bucket)?;
        if data.versioned != enabled && !data.objects.is_empty() {
            return Err(StoreError::Fatal(format!(
                "cannot change versioning on non-empty bucket '{bucket}'"
            )));
        }
        data.versioned = enabled;
        Ok(())
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<KeyInfo>, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let data = live_bucket(&mut inner, bucket)?;
        let keys = data
            .objects
            .iter()
            .filter_map(|(key, versions)| {
                versions.last().map(|latest| KeyInfo {
                    key: key.clone(),
                    version: latest.version.clone(),
                    size: latest.data.len() as u64,
                })
            })
            .collect();
        data.live_ops().listmatch_success += 1;
        Ok(keys)
    }

    async fn list_versions(&self, bucket: &str) -> Result<Vec<VersionInfo>, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let data = live_bucket(&mut inner, bucket)?;
        if !data.versioned {
            return Err(StoreError::Fatal(format!(
                "bucket '{bucket}' is not versioned"
            )));
        }
        let mut out = Vec::new();
        for (key, versions) in &data.objects {
            for v in versions {
                // Invariant: versioned buckets always carry version ids.
                if let Some(id) = &v.version {
                    out.push(VersionInfo {
                        key: key.clone(),
                        version: id.clone(),
                        size: v.data.len() as u64,
                    });
                }
            }
        }
        data.live_ops().listmatch_success += 1;
        Ok(out)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &mut dyn PayloadSource,
    ) -> Result<Option<String>, StoreError> {
        let data = Self::drain(source)?;
        let size = data.len() as u64;
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let version = if live_bucket(&mut inner, bucket)?.versioned {
            inner.version_seq += 1;
            Some(format!("v-{:08}", inner.version_seq))
        } else {
            None
        };
        let bucket_data = live_bucket(&mut inner, bucket)?;
        let stored = ObjectVersion {
            version: version.clone(),
            data,
        };
        if bucket_data.versioned {
            bucket_data
                .objects
                .entry(key.to_string())
                .or_default()
                .push(stored);
        } else {
            bucket_data.objects.insert(key.to_string(), vec![stored]);
        }
        let ops = bucket_data.live_ops();
        ops.archive_success += 1;
        ops.success_bytes_in += size;
        debug!(bucket, key, size, ?version, "stored object");
        Ok(version)
    }

    async fn start_multipart(&self, bucket: &str, key: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        live_bucket(&mut inner, bucket)?;
        inner.upload_seq += 1;
        let upload_id = format!("mp-{:08}", inner.upload_seq);
        inner.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        source: &mut dyn PayloadSource,
    ) -> Result<(), StoreError> {
        let data = Self::drain(source)?;
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::NotFound(format!("upload '{upload_id}'")))?;
        if upload.bucket != bucket || upload.key != key {
            return Err(StoreError::Fatal(format!(
                "upload '{upload_id}' does not belong to {bucket}/{key}"
            )));
        }
        upload.parts.insert(part_number, data);
        Ok(())
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let upload = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StoreError::NotFound(format!("upload '{upload_id}'")))?;
        if upload.bucket != bucket || upload.key != key {
            return Err(StoreError::Fatal(format!(
                "upload '{upload_id}' does not belong to {bucket}/{key}"
            )));
        }
        let mut assembled = Vec::new();
        for part in upload.parts.into_values() {
            assembled.extend_from_slice(&part);
        }
        let size = assembled.len() as u64;
        let bucket_data = live_bucket(&mut inner, bucket)?;
        let version = bucket_data.versioned.then(|| upload_id.to_string());
        let stored = ObjectVersion {
            version: version.clone(),
            data: assembled,
        };
        if bucket_data.versioned {
            bucket_data
                .objects
                .entry(key.to_string())
                .or_default()
                .push(stored);
        } else {
            bucket_data.objects.insert(key.to_string(), vec![stored]);
        }
        let ops = bucket_data.live_ops();
        ops.archive_success += 1;
        ops.success_bytes_in += size;
        debug!(bucket, key, size, upload_id, "completed multipart object");
        Ok(version)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
        sink: &mut dyn PayloadSink,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let data = live_bucket(&mut inner, bucket)?;
        let versions = data
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(format!("{bucket}/{key}")))?;
        let found = match version {
            Some(wanted) => versions
                .iter()
                .find(|v| v.version.as_deref() == Some(wanted)),
            None => versions.last(),
        }
        .ok_or_else(|| StoreError::NotFound(format!("{bucket}/{key}@{version:?}")))?;
        let size = found.data.len() as u64;
        sink.write(&found.data);
        let ops = data.live_ops();
        ops.retrieve_success += 1;
        ops.success_bytes_out += size;
        Ok(size)
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let data = live_bucket(&mut inner, bucket)?;
        match version {
            None => {
                if data.objects.remove(key).is_none() {
                    return Err(StoreError::NotFound(format!("{bucket}/{key}")));
                }
            }
            Some(wanted) => {
                let versions = data
                    .objects
                    .get_mut(key)
                    .ok_or_else(|| StoreError::NotFound(format!("{bucket}/{key}")))?;
                let before = versions.len();
                versions.retain(|v| v.version.as_deref() != Some(wanted));
                if versions.len() == before {
                    return Err(StoreError::NotFound(format!("{bucket}/{key}@{wanted}")));
                }
                if versions.is_empty() {
                    data.objects.remove(key);
                }
            }
        }
        data.live_ops().delete_success += 1;
        Ok(())
    }

    async fn usage_reports(&self) -> Result<Vec<UsageReport>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .buckets
            .iter()
            .map(|(name, data)| UsageReport {
                bucket: name.clone(),
                intervals: data.ops.clone(),
            })
            .collect())
    }
}
