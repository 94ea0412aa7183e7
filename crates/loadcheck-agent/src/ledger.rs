use std::collections::BTreeMap;

use tracing::{error, warn};

/// Identity of one stored object version. `version` is `None` for objects in
/// unversioned buckets.
///
/// Field order matters: ordering by bucket first, then key, keeps all entries
/// of one bucket (and one key) contiguous for range removal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId {
    pub bucket: String,
    pub key: String,
    pub version: Option<String>,
}

impl ObjectId {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        version: Option<String>,
    ) -> Self {
        ObjectId {
            bucket: bucket.into(),
            key: key.into(),
            version,
        }
    }
}

/// What a later retrieve of the object must yield.
///
/// `digest` is `None` for entries seeded from listings, where only the size
/// is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedObject {
    pub size: u64,
    pub digest: Option<blake3::Hash>,
}

/// The session's record of every object version it believes exists, with the
/// size and content digest each one must verify against.
#[derive(Debug, Default)]
pub struct VerificationLedger {
    entries: BTreeMap<ObjectId, ExpectedObject>,
}

impl VerificationLedger {
    pub fn new() -> Self {
        VerificationLedger::default()
    }

    /// Record a freshly written object. A collision means the session wrote
    /// the same identity twice without an intervening delete; the newer
    /// expectation wins, loudly.
    pub fn insert(&mut self, id: ObjectId, expected: ExpectedObject) {
        if let Some(previous) = self.entries.insert(id.clone(), expected) {
            warn!(
                bucket = %id.bucket,
                key = %id.key,
                version = ?id.version,
                previous_size = previous.size,
                "ledger entry overwritten"
            );
        }
    }

    /// Record or refresh an expectation without noise, for entries seeded
    /// from server listings.
    pub fn replace(&mut self, id: ObjectId, expected: ExpectedObject) {
        self.entries.insert(id, expected);
    }

    /// Compare an observed size and digest against the recorded expectation.
    /// Returns the number of discrepancies found (0 when the object checks
    /// out), logging each one.
    pub fn check(&self, id: &ObjectId, size: u64, digest: Option<blake3::Hash>) -> u32 {
        let Some(expected) = self.entries.get(id) else {
            error!(
                bucket = %id.bucket,
                key = %id.key,
                version = ?id.version,
                "retrieved an object the ledger does not know"
            );
            return 1;
        };
        let mut errors = 0;
        if expected.size != size {
            error!(
                bucket = %id.bucket,
                key = %id.key,
                version = ?id.version,
                expected = expected.size,
                observed = size,
                "size mismatch"
            );
            errors += 1;
        }
        if let (Some(want), Some(got)) = (expected.digest, digest) {
            if want != got {
                error!(
                    bucket = %id.bucket,
                    key = %id.key,
                    version = ?id.version,
                    expected = %want,
                    observed = %got,
                    "content digest mismatch"
                );
                errors += 1;
            }
        }
        errors
    }

    /// Destructive variant of [`check`](Self::check): the entry is consumed
    /// whether or not it verifies. Used by the end-of-session sweep.
    pub fn check_remove(&mut self, id: &ObjectId, size: u64, digest: Option<blake3::Hash>) -> u32 {
        let errors = self.check(id, size, digest);
        self.entries.remove(id);
        errors
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<ExpectedObject> {
        self.entries.remove(id)
    }

    /// Drop every version of one key.
    pub fn remove_key(&mut self, bucket: &str, key: &str) {
        self.entries
            .retain(|id, _| !(id.bucket == bucket && id.key == key));
    }

    /// Drop every entry under one bucket.
    pub fn remove_bucket(&mut self, bucket: &str) {
        self.entries.retain(|id, _| id.bucket != bucket);
    }

    pub fn get(&self, id: &ObjectId) -> Option<&ExpectedObject> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &ExpectedObject)> {
        self.entries.iter()
    }

    /// Entries for one bucket, cloned so the ledger can be mutated while the
    /// caller walks them.
    pub fn bucket_entries(&self, bucket: &str) -> Vec<(ObjectId, ExpectedObject)> {
        self.entries
            .iter()
            .filter(|(id, _)| id.bucket == bucket)
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
