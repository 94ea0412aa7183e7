//! A simulated customer of an object-storage service.
//!
//! Each [`Agent`] runs one session from a weighted test plan: it archives,
//! retrieves, and deletes objects against an [`ObjectStore`], records the
//! expected state of every object it writes in a [`VerificationLedger`],
//! tracks its own operation counts per bucket, and can close the session by
//! sweeping the ledger and reconciling its counters against the server's
//! usage report.
//!
//! [`ObjectStore`]: loadcheck_store::ObjectStore

mod accounting;
mod actions;
mod agent;
mod archive;
mod audit;
mod ledger;
mod names;
mod payload;
mod retry;

pub use accounting::{BucketAccounting, Counter};
pub use actions::{ActionKind, FrequencyTable};
pub use agent::{Agent, SessionError};
pub use archive::{plan_chunks, ArchiveParams, ArchiveStatus};
pub use audit::reconcile;
pub use ledger::{ExpectedObject, ObjectId, VerificationLedger};
pub use names::{BucketNameAllocator, KeyNameAllocator};
pub use payload::{fault_offset, DigestSink, GeneratedPayload};
pub use retry::{with_retries, Attempt, MAX_ARCHIVE_RETRIES, MAX_DELETE_RETRIES};
