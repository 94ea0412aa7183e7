//! End-to-end session behavior against the in-memory store.

use std::sync::Arc;

use loadcheck_agent::{Agent, Counter, SessionError};
use loadcheck_config::{TestPlan, UserIdentity};
use loadcheck_store::{
    BucketInfo, KeyInfo, MemoryStore, ObjectStore, PayloadError, PayloadSink, PayloadSource,
    StoreError, UsageReport, VersionInfo,
};
use tokio_util::sync::CancellationToken;

fn identity() -> UserIdentity {
    UserIdentity {
        user_name: "tester".to_string(),
        auth_key_id: "1".to_string(),
        auth_key: "secret".to_string(),
    }
}

fn plan(dist: &[(&str, u32)]) -> TestPlan {
    TestPlan {
        distribution: dist.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        min_file_size: 10,
        max_file_size: 10,
        multipart_part_size: 100,
        low_delay: 0.0,
        high_delay: 0.0,
        max_bucket_count: 5,
        fault_percent: 0,
        verify_before: false,
        verify_after: false,
        audit_after: false,
    }
}

struct BytesSource {
    data: Vec<u8>,
    pos: usize,
}

impl BytesSource {
    fn new(data: impl Into<Vec<u8>>) -> Self {
        BytesSource {
            data: data.into(),
            pos: 0,
        }
    }
}

impl PayloadSource for BytesSource {
    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn next_chunk(&mut self) -> Result<Option<&[u8]>, PayloadError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let start = self.pos;
        self.pos = self.data.len();
        Ok(Some(&self.data[start..]))
    }
}

async fn agent_with_bucket(
    store: &Arc<MemoryStore>,
    plan: TestPlan,
    bucket: &str,
    versioned: bool,
) -> Agent {
    store.create_bucket(bucket).await.unwrap();
    if versioned {
        store.set_versioning(bucket, true).await.unwrap();
    }
    let dyn_store: Arc<dyn ObjectStore> = Arc::clone(store) as Arc<dyn ObjectStore>;
    let mut agent = Agent::new(identity(), plan, dyn_store, CancellationToken::new(), 42).unwrap();
    agent.bootstrap().await.unwrap();
    agent
}

#[tokio::test]
async fn test_archive_only_session_records_every_object() {
    let store = Arc::new(MemoryStore::new());
    let mut session_plan = plan(&[("archive-new-key", 100)]);
    session_plan.audit_after = true;
    let mut agent = agent_with_bucket(&store, session_plan, "tester-00000001", false).await;

    for _ in 0..50 {
        agent.step().await;
    }

    assert_eq!(agent.ledger().len(), 50);
    let acct = &agent.accounting()["tester-00000001"];
    assert_eq!(acct.get(Counter::ArchiveRequest), 50);
    assert_eq!(acct.get(Counter::ArchiveSuccess), 50);
    assert_eq!(acct.get(Counter::SuccessBytesIn), 500);
    assert_eq!(agent.error_count(), 0);

    agent.verify_all().await.unwrap();
    assert_eq!(agent.error_count(), 0);

    // The audit against the server's own counters must also come out clean.
    agent.finish().await;
    assert_eq!(agent.error_count(), 0);
}

#[tokio::test]
async fn test_multipart_archive_verifies_clean() {
    let store = Arc::new(MemoryStore::new());
    let mut session_plan = plan(&[("archive-new-key", 100)]);
    session_plan.min_file_size = 2500;
    session_plan.max_file_size = 2500;
    session_plan.multipart_part_size = 1000;
    session_plan.audit_after = true;
    let mut agent = agent_with_bucket(&store, session_plan, "tester-00000001", false).await;

    agent.step().await;

    assert_eq!(agent.ledger().len(), 1);
    let acct = &agent.accounting()["tester-00000001"];
    assert_eq!(acct.get(Counter::ArchiveSuccess), 1);
    assert_eq!(acct.get(Counter::SuccessBytesIn), 2500);

    agent.verify_all().await.unwrap();
    agent.finish().await;
    assert_eq!(agent.error_count(), 0);
}

#[tokio::test]
async fn test_delete_bucket_purges_and_freezes() {
    let store = Arc::new(MemoryStore::new());
    store.create_bucket("tester-00000001").await.unwrap();
    for key in ["key-00000001", "key-00000002"] {
        store
            .put_object("tester-00000001", key, &mut BytesSource::new(vec![b'a'; 10]))
            .await
            .unwrap();
    }
    let dyn_store: Arc<dyn ObjectStore> = Arc::clone(&store) as Arc<dyn ObjectStore>;
    let session_plan = plan(&[("delete-bucket", 100)]);
    let mut agent =
        Agent::new(identity(), session_plan, dyn_store, CancellationToken::new(), 7).unwrap();
    agent.bootstrap().await.unwrap();
    assert_eq!(agent.ledger().len(), 2);

    agent.step().await;

    assert!(agent.buckets().is_empty());
    assert!(agent.ledger().is_empty());
    let acct = &agent.accounting()["tester-00000001"];
    assert!(acct.is_frozen());
    assert_eq!(acct.get(Counter::DeleteSuccess), 2);
    // One listing at bootstrap, one for the teardown.
    assert_eq!(acct.get(Counter::ListmatchSuccess), 2);
    assert_eq!(agent.error_count(), 0);
}

#[tokio::test]
async fn test_full_fault_injection_stores_nothing() {
    let store = Arc::new(MemoryStore::new());
    let mut session_plan = plan(&[("archive-new-key", 100)]);
    session_plan.fault_percent = 100;
    session_plan.audit_after = true;
    let mut agent = agent_with_bucket(&store, session_plan, "tester-00000001", false).await;

    for _ in 0..20 {
        agent.step().await;
    }

    assert!(agent.ledger().is_empty());
    let acct = &agent.accounting()["tester-00000001"];
    assert_eq!(acct.get(Counter::ArchiveRequest), 20);
    assert_eq!(acct.get(Counter::ArchiveError), 20);
    assert_eq!(acct.get(Counter::ArchiveSuccess), 0);
    // Injected faults are planned outcomes, not session errors.
    assert_eq!(agent.error_count(), 0);

    agent.finish().await;
    assert_eq!(agent.error_count(), 0);
}

#[tokio::test]
async fn test_versioned_archives_accumulate_versions() {
    let store = Arc::new(MemoryStore::new());
    let session_plan = plan(&[("archive-new-version", 100)]);
    let mut agent = agent_with_bucket(&store, session_plan, "tester-00000001", true).await;

    for _ in 0..10 {
        agent.step().await;
    }

    assert_eq!(agent.ledger().len(), 10);
    assert!(agent
        .ledger()
        .iter()
        .all(|(id, _)| id.version.is_some() && id.bucket == "tester-00000001"));

    agent.verify_all().await.unwrap();
    assert_eq!(agent.error_count(), 0);
}

#[tokio::test]
async fn test_tampered_object_is_detected() {
    let store = Arc::new(MemoryStore::new());
    let session_plan = plan(&[("archive-new-key", 100)]);
    let mut agent = agent_with_bucket(&store, session_plan, "tester-00000001", false).await;

    agent.step().await;
    assert_eq!(agent.ledger().len(), 1);

    // Corrupt the object behind the session's back.
    store
        .put_object(
            "tester-00000001",
            "key-00000001",
            &mut BytesSource::new(b"wrong".to_vec()),
        )
        .await
        .unwrap();

    agent.verify_all().await.unwrap();
    // Size and content digest both diverge.
    assert_eq!(agent.error_count(), 2);
}

#[tokio::test]
async fn test_split_reporting_interval_fails_audit() {
    let store = Arc::new(MemoryStore::new());
    let mut session_plan = plan(&[("archive-new-key", 100)]);
    session_plan.audit_after = true;
    let mut agent = agent_with_bucket(&store, session_plan, "tester-00000001", false).await;

    agent.step().await;
    store.begin_new_reporting_interval("tester-00000001");
    agent.step().await;

    agent.finish().await;
    assert_eq!(agent.error_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_session_finishes_promptly() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let mut session_plan = plan(&[("archive-new-key", 100)]);
    session_plan.high_delay = 3600.0;
    let agent = Agent::new(identity(), session_plan, store, cancel.clone(), 3).unwrap();

    cancel.cancel();
    let errors = agent.run().await.unwrap();
    assert_eq!(errors, 0);
}

struct UnreachableStore;

#[async_trait::async_trait]
impl ObjectStore for UnreachableStore {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn create_bucket(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn delete_bucket(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn set_versioning(&self, _: &str, _: bool) -> Result<(), StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn list_keys(&self, _: &str) -> Result<Vec<KeyInfo>, StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn list_versions(&self, _: &str) -> Result<Vec<VersionInfo>, StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn put_object(
        &self,
        _: &str,
        _: &str,
        _: &mut dyn PayloadSource,
    ) -> Result<Option<String>, StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn start_multipart(&self, _: &str, _: &str) -> Result<String, StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn upload_part(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: u32,
        _: &mut dyn PayloadSource,
    ) -> Result<(), StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn complete_multipart(
        &self,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<Option<String>, StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn get_object(
        &self,
        _: &str,
        _: &str,
        _: Option<&str>,
        _: &mut dyn PayloadSink,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn delete_object(&self, _: &str, _: &str, _: Option<&str>) -> Result<(), StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
    async fn usage_reports(&self) -> Result<Vec<UsageReport>, StoreError> {
        Err(StoreError::Fatal("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_unreachable_store_fails_the_session() {
    let store: Arc<dyn ObjectStore> = Arc::new(UnreachableStore);
    let session_plan = plan(&[("archive-new-key", 100)]);
    let mut agent = Agent::new(identity(), session_plan, store, CancellationToken::new(), 1).unwrap();
    let err = agent.bootstrap().await.unwrap_err();
    assert!(matches!(err, SessionError::Connect(_)));
}
