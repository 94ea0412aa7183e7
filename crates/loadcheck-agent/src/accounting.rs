use chrono::{DateTime, Utc};
use tracing::error;

/// The operation counters a session tracks per bucket.
///
/// Requests count attempts, successes count completions, errors count
/// terminal failures; the byte counters accumulate payload sizes of
/// successful transfers in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    RetrieveRequest,
    RetrieveSuccess,
    RetrieveError,
    ArchiveRequest,
    ArchiveSuccess,
    ArchiveError,
    ListmatchRequest,
    ListmatchSuccess,
    ListmatchError,
    DeleteRequest,
    DeleteSuccess,
    DeleteError,
    SocketBytesIn,
    SocketBytesOut,
    SuccessBytesIn,
    SuccessBytesOut,
    ErrorBytesIn,
    ErrorBytesOut,
}

impl Counter {
    pub const ALL: [Counter; 18] = [
        Counter::RetrieveRequest,
        Counter::RetrieveSuccess,
        Counter::RetrieveError,
        Counter::ArchiveRequest,
        Counter::ArchiveSuccess,
        Counter::ArchiveError,
        Counter::ListmatchRequest,
        Counter::ListmatchSuccess,
        Counter::ListmatchError,
        Counter::DeleteRequest,
        Counter::DeleteSuccess,
        Counter::DeleteError,
        Counter::SocketBytesIn,
        Counter::SocketBytesOut,
        Counter::SuccessBytesIn,
        Counter::SuccessBytesOut,
        Counter::ErrorBytesIn,
        Counter::ErrorBytesOut,
    ];

    fn index(self) -> usize {
        match self {
            Counter::RetrieveRequest => 0,
            Counter::RetrieveSuccess => 1,
            Counter::RetrieveError => 2,
            Counter::ArchiveRequest => 3,
            Counter::ArchiveSuccess => 4,
            Counter::ArchiveError => 5,
            Counter::ListmatchRequest => 6,
            Counter::ListmatchSuccess => 7,
            Counter::ListmatchError => 8,
            Counter::DeleteRequest => 9,
            Counter::DeleteSuccess => 10,
            Counter::DeleteError => 11,
            Counter::SocketBytesIn => 12,
            Counter::SocketBytesOut => 13,
            Counter::SuccessBytesIn => 14,
            Counter::SuccessBytesOut => 15,
            Counter::ErrorBytesIn => 16,
            Counter::ErrorBytesOut => 17,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Counter::RetrieveRequest => "retrieve-request",
            Counter::RetrieveSuccess => "retrieve-success",
            Counter::RetrieveError => "retrieve-error",
            Counter::ArchiveRequest => "archive-request",
            Counter::ArchiveSuccess => "archive-success",
            Counter::ArchiveError => "archive-error",
            Counter::ListmatchRequest => "listmatch-request",
            Counter::ListmatchSuccess => "listmatch-success",
            Counter::ListmatchError => "listmatch-error",
            Counter::DeleteRequest => "delete-request",
            Counter::DeleteSuccess => "delete-success",
            Counter::DeleteError => "delete-error",
            Counter::SocketBytesIn => "socket-bytes-in",
            Counter::SocketBytesOut => "socket-bytes-out",
            Counter::SuccessBytesIn => "success-bytes-in",
            Counter::SuccessBytesOut => "success-bytes-out",
            Counter::ErrorBytesIn => "error-bytes-in",
            Counter::ErrorBytesOut => "error-bytes-out",
        }
    }
}

/// Per-bucket operation accounting for one session.
///
/// When the session deletes the bucket the record is frozen via
/// [`mark_end`](Self::mark_end); frozen records survive to the end-of-run
/// audit, and any late increment is a bug in the caller.
#[derive(Debug, Clone)]
pub struct BucketAccounting {
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    counts: [u64; 18],
}

impl BucketAccounting {
    pub fn new() -> Self {
        BucketAccounting {
            started_at: Utc::now(),
            ended_at: None,
            counts: [0; 18],
        }
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter.index()]
    }

    pub fn add(&mut self, counter: Counter, amount: u64) {
        if self.is_frozen() {
            error!(counter = counter.name(), amount, "count added after bucket accounting was frozen");
            debug_assert!(false, "count added to frozen accounting");
            return;
        }
        self.counts[counter.index()] += amount;
    }

    pub fn increment(&mut self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Freeze the record at bucket-deletion time. Idempotent.
    pub fn mark_end(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }
}

impl Default for BucketAccounting {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let mut acct = BucketAccounting::new();
        acct.increment(Counter::ArchiveRequest);
        acct.increment(Counter::ArchiveSuccess);
        acct.add(Counter::SuccessBytesIn, 1024);
        acct.add(Counter::SuccessBytesIn, 512);
        assert_eq!(acct.get(Counter::ArchiveRequest), 1);
        assert_eq!(acct.get(Counter::SuccessBytesIn), 1536);
        assert_eq!(acct.get(Counter::DeleteError), 0);
    }

    #[test]
    fn test_mark_end_is_idempotent() {
        let mut acct = BucketAccounting::new();
        acct.mark_end();
        let first = acct.ended_at();
        acct.mark_end();
        assert_eq!(acct.ended_at(), first);
        assert!(acct.is_frozen());
    }

    #[test]
    #[should_panic(expected = "count added to frozen accounting")]
    fn test_add_after_freeze_panics_in_debug() {
        let mut acct = BucketAccounting::new();
        acct.mark_end();
        acct.add(Counter::DeleteSuccess, 1);
    }

    #[test]
    fn test_every_counter_has_a_distinct_slot() {
        let mut acct = BucketAccounting::new();
        for c in Counter::ALL {
            acct.increment(c);
        }
        for c in Counter::ALL {
            assert_eq!(acct.get(c), 1, "{}", c.name());
        }
    }
}
