use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use loadcheck_config::{ConfigError, TestPlan, UserIdentity};
use loadcheck_store::{KeyInfo, ObjectStore, StoreError, VersionInfo};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accounting::{BucketAccounting, Counter};
use crate::actions::{ActionKind, FrequencyTable};
use crate::archive::{archive_object, ArchiveParams, ArchiveStatus};
use crate::audit::reconcile;
use crate::ledger::{ExpectedObject, ObjectId, VerificationLedger};
use crate::names::{BucketNameAllocator, KeyNameAllocator};
use crate::payload::DigestSink;
use crate::retry::{with_retries, Attempt, MAX_ARCHIVE_RETRIES, MAX_DELETE_RETRIES};

/// Failures that end a session before it can do useful work.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to reach the object store: {0}")]
    Connect(StoreError),
}

enum RetrieveOutcome {
    Verified { size: u64, digest: blake3::Hash },
    Missing,
    Cancelled,
}

/// One simulated customer session.
///
/// The agent owns its view of the account: which buckets exist and whether
/// they are versioned, the latest version of every key it knows, the
/// verification ledger, and per-bucket operation accounting. Actions are
/// drawn from the plan's weighted distribution; any action failure is logged
/// and counted, and the session moves on.
pub struct Agent {
    user: UserIdentity,
    plan: TestPlan,
    store: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
    rng: ChaCha8Rng,
    table: FrequencyTable,
    params: ArchiveParams,
    /// Bucket name -> versioned flag, live buckets only.
    buckets: BTreeMap<String, bool>,
    bucket_names: BucketNameAllocator,
    key_names: KeyNameAllocator,
    /// (bucket, key) -> version id of the newest write, `None` in
    /// unversioned buckets. Live keys only.
    latest: BTreeMap<(String, String), Option<String>>,
    ledger: VerificationLedger,
    /// Accounting per bucket name; records of deleted buckets stay, frozen,
    /// until the end-of-run audit.
    accounting: HashMap<String, BucketAccounting>,
    error_count: u64,
}

impl Agent {
    pub fn new(
        user: UserIdentity,
        plan: TestPlan,
        store: Arc<dyn ObjectStore>,
        cancel: CancellationToken,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        plan.validate()?;
        let table = FrequencyTable::build(&plan.distribution)?;
        let params = ArchiveParams {
            min_size: plan.min_file_size,
            max_size: plan.max_file_size,
            part_size: plan.multipart_part_size,
            fault_percent: plan.fault_percent,
        };
        let bucket_names = BucketNameAllocator::new(user.user_name.clone(), plan.max_bucket_count);
        Ok(Agent {
            user,
            plan,
            store,
            cancel,
            rng: ChaCha8Rng::seed_from_u64(seed),
            table,
            params,
            buckets: BTreeMap::new(),
            bucket_names,
            key_names: KeyNameAllocator::new(),
            latest: BTreeMap::new(),
            ledger: VerificationLedger::new(),
            accounting: HashMap::new(),
            error_count: 0,
        })
    }

    /// Run the whole session: bootstrap, act until cancelled, then close out
    /// with the configured verification sweep and audit. Returns the total
    /// number of consistency and action errors observed.
    pub async fn run(mut self) -> Result<u64, SessionError> {
        self.bootstrap().await?;
        // Stagger session starts so agents do not move in lockstep.
        let high = self.plan.high_delay;
        self.delay(0.0, high).await;
        while !self.cancel.is_cancelled() {
            self.step().await;
            let (low, high) = (self.plan.low_delay, self.plan.high_delay);
            self.delay(low, high).await;
        }
        self.finish().await;
        Ok(self.error_count)
    }

    /// Inventory the account: discover existing buckets, seed the name
    /// allocators and the ledger from listings, and optionally read every
    /// known object to pin down its expected content.
    pub async fn bootstrap(&mut self) -> Result<(), SessionError> {
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let listing = with_retries(&cancel, MAX_ARCHIVE_RETRIES, || {
            let store = Arc::clone(&store);
            async move { store.list_buckets().await }
        })
        .await
        .map_err(SessionError::Connect)?;
        let listed = match listing {
            Attempt::Done { value, .. } => value,
            Attempt::Cancelled => return Ok(()),
        };
        info!(user = %self.user.user_name, buckets = listed.len(), "session starting");

        for info in &listed {
            self.bucket_names.observe_existing(&info.name)?;
            self.buckets.insert(info.name.clone(), info.versioned);
            self.accounting.entry(info.name.clone()).or_default();
        }
        for info in listed {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.inventory_bucket(&info.name, info.versioned)
                .await
                .map_err(SessionError::Connect)?;
        }
        if self.plan.verify_before {
            self.verify_recorded(true)
                .await
                .map_err(SessionError::Connect)?;
        }
        Ok(())
    }

    /// Draw one action from the distribution and run it. Failures are
    /// terminal for the action only: they are logged, counted, and the
    /// session continues.
    pub async fn step(&mut self) {
        let kind = self.table.pick(&mut self.rng);
        debug!(user = %self.user.user_name, action = kind.name(), "scheduling action");
        if let Err(err) = self.run_action(kind).await {
            self.error_count += 1;
            error!(user = %self.user.user_name, action = kind.name(), %err, "action failed");
        }
    }

    /// Close out the session per the plan: destructively sweep the ledger,
    /// then reconcile accounting against the server's usage report.
    pub async fn finish(&mut self) {
        if self.plan.verify_after {
            if let Err(err) = self.final_sweep().await {
                self.error_count += 1;
                error!(%err, "final verification sweep failed");
            }
        }
        if self.plan.audit_after {
            match self.fetch_usage_reports().await {
                Ok(Some(reports)) => {
                    self.error_count += reconcile(&self.accounting, &reports);
                }
                Ok(None) => {}
                Err(err) => {
                    self.error_count += 1;
                    error!(%err, "failed to fetch usage reports for audit");
                }
            }
        }
        info!(user = %self.user.user_name, errors = self.error_count, "session finished");
    }

    /// Non-destructively re-verify every ledger entry against the store.
    pub async fn verify_all(&mut self) -> Result<(), StoreError> {
        self.verify_recorded(false).await
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn ledger(&self) -> &VerificationLedger {
        &self.ledger
    }

    pub fn accounting(&self) -> &HashMap<String, BucketAccounting> {
        &self.accounting
    }

    pub fn buckets(&self) -> &BTreeMap<String, bool> {
        &self.buckets
    }

    async fn run_action(&mut self, kind: ActionKind) -> Result<(), StoreError> {
        match kind {
            ActionKind::CreateBucket => self.create_bucket(false).await,
            ActionKind::CreateVersionedBucket => self.create_bucket(true).await,
            ActionKind::DeleteBucket => self.delete_bucket().await,
            ActionKind::ArchiveNewKey => self.archive_new_key().await,
            ActionKind::ArchiveNewVersion => self.archive_new_version().await,
            ActionKind::ArchiveOverwrite => self.archive_overwrite().await,
            ActionKind::RetrieveLatest => self.retrieve_latest().await,
            ActionKind::RetrieveVersion => self.retrieve_version().await,
            ActionKind::DeleteKey => self.delete_key().await,
            ActionKind::DeleteVersion => self.delete_version().await,
        }
    }

    async fn create_bucket(&mut self, versioned: bool) -> Result<(), StoreError> {
        if self.buckets.len() as u32 >= self.plan.max_bucket_count {
            debug!("bucket ceiling reached, skipping create");
            return Ok(());
        }
        let Some(name) = self.bucket_names.next() else {
            debug!("bucket namespace saturated, skipping create");
            return Ok(());
        };
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let created = match with_retries(&cancel, MAX_ARCHIVE_RETRIES, || {
            let store = Arc::clone(&store);
            let name = name.clone();
            async move { store.create_bucket(&name).await }
        })
        .await
        {
            Ok(attempt) => attempt,
            Err(err) => {
                // The name was never taken on the server; free it.
                self.bucket_names.note_deleted(&name);
                return Err(err);
            }
        };
        if created.is_cancelled() {
            self.bucket_names.note_deleted(&name);
            return Ok(());
        }

        // A reused name starts a fresh accounting epoch.
        self.accounting.insert(name.clone(), BucketAccounting::new());
        if versioned {
            let enabled = match with_retries(&cancel, MAX_ARCHIVE_RETRIES, || {
                let store = Arc::clone(&store);
                let name = name.clone();
                async move { store.set_versioning(&name, true).await }
            })
            .await
            {
                Ok(attempt) => attempt,
                Err(err) => {
                    // The bucket exists but stayed unversioned; track it as such.
                    self.buckets.insert(name, false);
                    return Err(err);
                }
            };
            if enabled.is_cancelled() {
                self.buckets.insert(name, false);
                return Ok(());
            }
        }
        info!(bucket = %name, versioned, "created bucket");
        self.buckets.insert(name, versioned);
        Ok(())
    }

    /// Delete a random bucket: empty it key by key, delete it, then purge
    /// every local trace and freeze its accounting.
    async fn delete_bucket(&mut self) -> Result<(), StoreError> {
        let Some(name) = self.pick_bucket(|_| true) else {
            debug!("no buckets to delete");
            return Ok(());
        };
        let Some(keys) = self.counted_list_keys(&name).await? else {
            return Ok(());
        };
        for info in keys {
            if !self.counted_delete(&name, &info.key, None).await? {
                // Cancelled mid-teardown; the bucket stays.
                return Ok(());
            }
            self.ledger.remove_key(&name, &info.key);
            self.latest.remove(&(name.clone(), info.key));
        }
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let deleted = with_retries(&cancel, MAX_DELETE_RETRIES, || {
            let store = Arc::clone(&store);
            let name = name.clone();
            async move { store.delete_bucket(&name).await }
        })
        .await?;
        if deleted.is_cancelled() {
            return Ok(());
        }
        info!(bucket = %name, "deleted bucket");
        self.buckets.remove(&name);
        self.ledger.remove_bucket(&name);
        self.latest.retain(|key, _| key.0 != name);
        self.bucket_names.note_deleted(&name);
        if let Some(acct) = self.accounting.get_mut(&name) {
            acct.mark_end();
        }
        Ok(())
    }

    async fn archive_new_key(&mut self) -> Result<(), StoreError> {
        let Some(bucket) = self.pick_bucket(|_| true) else {
            debug!("no buckets to archive into");
            return Ok(());
        };
        let key = self.key_names.next();
        self.archive_into(bucket, key).await
    }

    async fn archive_new_version(&mut self) -> Result<(), StoreError> {
        let Some(bucket) = self.pick_bucket(|versioned| versioned) else {
            debug!("no versioned buckets");
            return Ok(());
        };
        // An empty bucket gets a fresh key instead of a new version.
        let key = match self.pick_key(&bucket) {
            Some(key) => key,
            None => self.key_names.next(),
        };
        self.archive_into(bucket, key).await
    }

    async fn archive_overwrite(&mut self) -> Result<(), StoreError> {
        let Some(bucket) = self.pick_bucket(|versioned| !versioned) else {
            debug!("no unversioned buckets");
            return Ok(());
        };
        let key = match self.pick_key(&bucket) {
            Some(key) => {
                // The old expectation dies the moment the overwrite starts.
                self.ledger.remove_key(&bucket, &key);
                key
            }
            None => self.key_names.next(),
        };
        self.archive_into(bucket, key).await
    }

    async fn archive_into(&mut self, bucket: String, key: String) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let params = self.params;
        let status = archive_object(
            &store,
            &cancel,
            &mut self.rng,
            &params,
            &bucket,
            &key,
            &mut self.ledger,
            self.accounting.entry(bucket.clone()).or_default(),
        )
        .await?;
        match status {
            ArchiveStatus::Stored(version) => {
                self.latest.insert((bucket, key), version);
            }
            ArchiveStatus::Faulted => {
                // An aborted overwrite leaves the old object on the server
                // with no ledger entry; stop treating the key as known.
                if !self.buckets.get(&bucket).copied().unwrap_or(false) {
                    self.latest.remove(&(bucket, key));
                }
            }
            ArchiveStatus::Cancelled => {}
        }
        Ok(())
    }

    async fn retrieve_latest(&mut self) -> Result<(), StoreError> {
        let Some(((bucket, key), version)) = self.pick_latest() else {
            debug!("nothing to retrieve");
            return Ok(());
        };
        // Ask for the newest version without naming it; the result must
        // match the ledger entry recorded for it.
        let id = ObjectId::new(bucket, key, version);
        self.retrieve_and_check(&id, true, false).await?;
        Ok(())
    }

    async fn retrieve_version(&mut self) -> Result<(), StoreError> {
        let Some(id) = self.pick_versioned_entry(false) else {
            debug!("no versioned objects to retrieve");
            return Ok(());
        };
        self.retrieve_and_check(&id, false, false).await?;
        Ok(())
    }

    async fn delete_key(&mut self) -> Result<(), StoreError> {
        let Some(((bucket, key), _)) = self.pick_latest() else {
            debug!("no keys to delete");
            return Ok(());
        };
        if self.counted_delete(&bucket, &key, None).await? {
            self.ledger.remove_key(&bucket, &key);
            self.latest.remove(&(bucket, key));
        }
        Ok(())
    }

    async fn delete_version(&mut self) -> Result<(), StoreError> {
        // Only non-latest versions, so the latest pointer stays valid.
        let Some(id) = self.pick_versioned_entry(true) else {
            debug!("no old versions to delete");
            return Ok(());
        };
        let version = id.version.clone();
        if self
            .counted_delete(&id.bucket, &id.key, version.as_deref())
            .await?
        {
            self.ledger.remove(&id);
        }
        Ok(())
    }

    async fn inventory_bucket(&mut self, bucket: &str, versioned: bool) -> Result<(), StoreError> {
        let Some(keys) = self.counted_list_keys(bucket).await? else {
            return Ok(());
        };
        for info in &keys {
            self.key_names.observe_existing(&info.key);
            self.latest
                .insert((bucket.to_string(), info.key.clone()), info.version.clone());
            if !versioned {
                self.ledger.replace(
                    ObjectId::new(bucket, info.key.clone(), None),
                    ExpectedObject {
                        size: info.size,
                        digest: None,
                    },
                );
            }
        }
        if versioned {
            let Some(versions) = self.counted_list_versions(bucket).await? else {
                return Ok(());
            };
            for v in versions {
                self.ledger.replace(
                    ObjectId::new(bucket, v.key, Some(v.version)),
                    ExpectedObject {
                        size: v.size,
                        digest: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn verify_recorded(&mut self, refresh: bool) -> Result<(), StoreError> {
        let ids: Vec<ObjectId> = self.ledger.iter().map(|(id, _)| id.clone()).collect();
        for id in ids {
            match self.retrieve_and_check(&id, false, false).await? {
                RetrieveOutcome::Verified { size, digest } if refresh => {
                    self.ledger.replace(
                        id,
                        ExpectedObject {
                            size,
                            digest: Some(digest),
                        },
                    );
                }
                RetrieveOutcome::Cancelled => return Ok(()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Read back and consume every ledger entry. Whatever cannot be
    /// retrieved or does not match is a consistency error.
    async fn final_sweep(&mut self) -> Result<(), StoreError> {
        let ids: Vec<ObjectId> = self.ledger.iter().map(|(id, _)| id.clone()).collect();
        for id in ids {
            if let RetrieveOutcome::Cancelled = self.retrieve_and_check(&id, false, true).await? {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn retrieve_and_check(
        &mut self,
        id: &ObjectId,
        request_latest: bool,
        destructive: bool,
    ) -> Result<RetrieveOutcome, StoreError> {
        self.acct(&id.bucket).increment(Counter::RetrieveRequest);
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let result = with_retries(&cancel, MAX_ARCHIVE_RETRIES, || {
            let store = Arc::clone(&store);
            let bucket = id.bucket.clone();
            let key = id.key.clone();
            let version = if request_latest {
                None
            } else {
                id.version.clone()
            };
            async move {
                let mut sink = DigestSink::new();
                let size = store
                    .get_object(&bucket, &key, version.as_deref(), &mut sink)
                    .await?;
                Ok((size, sink.digest()))
            }
        })
        .await;
        match result {
            Ok(Attempt::Done {
                value: (size, digest),
                ..
            }) => {
                self.acct(&id.bucket).increment(Counter::RetrieveSuccess);
                self.acct(&id.bucket).add(Counter::SuccessBytesOut, size);
                let mismatches = if destructive {
                    self.ledger.check_remove(id, size, Some(digest))
                } else {
                    self.ledger.check(id, size, Some(digest))
                };
                self.error_count += u64::from(mismatches);
                Ok(RetrieveOutcome::Verified { size, digest })
            }
            Ok(Attempt::Cancelled) => Ok(RetrieveOutcome::Cancelled),
            Err(StoreError::NotFound(what)) => {
                self.acct(&id.bucket).increment(Counter::RetrieveError);
                if destructive {
                    // An entry the sweep cannot retrieve is an unreachable
                    // object.
                    error!(%what, "ledger entry unreachable during final sweep");
                    self.error_count += 1;
                    self.ledger.remove(id);
                } else {
                    warn!(%what, "object not found on read, tolerating");
                }
                Ok(RetrieveOutcome::Missing)
            }
            Err(err) => {
                self.acct(&id.bucket).increment(Counter::RetrieveError);
                Err(err)
            }
        }
    }

    /// Delete one key or version with bounded retries. Returns `false` if
    /// shutdown interrupted the wait.
    async fn counted_delete(
        &mut self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.acct(bucket).increment(Counter::DeleteRequest);
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let result = with_retries(&cancel, MAX_DELETE_RETRIES, || {
            let store = Arc::clone(&store);
            let bucket = bucket.to_string();
            let key = key.to_string();
            let version = version.map(str::to_string);
            async move { store.delete_object(&bucket, &key, version.as_deref()).await }
        })
        .await;
        match result {
            Ok(Attempt::Done { .. }) => {
                self.acct(bucket).increment(Counter::DeleteSuccess);
                Ok(true)
            }
            Ok(Attempt::Cancelled) => Ok(false),
            Err(err) => {
                self.acct(bucket).increment(Counter::DeleteError);
                Err(err)
            }
        }
    }

    async fn counted_list_keys(&mut self, bucket: &str) -> Result<Option<Vec<KeyInfo>>, StoreError> {
        self.acct(bucket).increment(Counter::ListmatchRequest);
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let result = with_retries(&cancel, MAX_ARCHIVE_RETRIES, || {
            let store = Arc::clone(&store);
            let bucket = bucket.to_string();
            async move { store.list_keys(&bucket).await }
        })
        .await;
        match result {
            Ok(Attempt::Done { value, .. }) => {
                self.acct(bucket).increment(Counter::ListmatchSuccess);
                Ok(Some(value))
            }
            Ok(Attempt::Cancelled) => Ok(None),
            Err(err) => {
                self.acct(bucket).increment(Counter::ListmatchError);
                Err(err)
            }
        }
    }

    async fn counted_list_versions(
        &mut self,
        bucket: &str,
    ) -> Result<Option<Vec<VersionInfo>>, StoreError> {
        self.acct(bucket).increment(Counter::ListmatchRequest);
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let result = with_retries(&cancel, MAX_ARCHIVE_RETRIES, || {
            let store = Arc::clone(&store);
            let bucket = bucket.to_string();
            async move { store.list_versions(&bucket).await }
        })
        .await;
        match result {
            Ok(Attempt::Done { value, .. }) => {
                self.acct(bucket).increment(Counter::ListmatchSuccess);
                Ok(Some(value))
            }
            Ok(Attempt::Cancelled) => Ok(None),
            Err(err) => {
                self.acct(bucket).increment(Counter::ListmatchError);
                Err(err)
            }
        }
    }

    async fn fetch_usage_reports(
        &mut self,
    ) -> Result<Option<Vec<loadcheck_store::UsageReport>>, StoreError> {
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let result = with_retries(&cancel, MAX_ARCHIVE_RETRIES, || {
            let store = Arc::clone(&store);
            async move { store.usage_reports().await }
        })
        .await?;
        Ok(match result {
            Attempt::Done { value, .. } => Some(value),
            Attempt::Cancelled => None,
        })
    }

    fn acct(&mut self, bucket: &str) -> &mut BucketAccounting {
        self.accounting.entry(bucket.to_string()).or_default()
    }

    fn pick_bucket(&mut self, filter: impl Fn(bool) -> bool) -> Option<String> {
        let names: Vec<&String> = self
            .buckets
            .iter()
            .filter(|(_, versioned)| filter(**versioned))
            .map(|(name, _)| name)
            .collect();
        if names.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..names.len());
        Some(names[idx].clone())
    }

    fn pick_key(&mut self, bucket: &str) -> Option<String> {
        let keys: Vec<&String> = self
            .latest
            .keys()
            .filter(|(b, _)| b.as_str() == bucket)
            .map(|(_, k)| k)
            .collect();
        if keys.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..keys.len());
        Some(keys[idx].clone())
    }

    fn pick_latest(&mut self) -> Option<((String, String), Option<String>)> {
        if self.latest.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.latest.len());
        self.latest
            .iter()
            .nth(idx)
            .map(|((b, k), v)| ((b.clone(), k.clone()), v.clone()))
    }

    /// A random ledger entry that carries a version id, optionally excluding
    /// the newest version of its key.
    fn pick_versioned_entry(&mut self, exclude_latest: bool) -> Option<ObjectId> {
        let latest = &self.latest;
        let candidates: Vec<ObjectId> = self
            .ledger
            .iter()
            .filter(|(id, _)| id.version.is_some())
            .filter(|(id, _)| {
                !exclude_latest
                    || latest.get(&(id.bucket.clone(), id.key.clone())) != Some(&id.version)
            })
            .map(|(id, _)| id.clone())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..candidates.len());
        Some(candidates[idx].clone())
    }

    async fn delay(&mut self, low: f64, high: f64) {
        let secs = self.rng.gen_range(low..=high);
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => {}
        }
    }
}
