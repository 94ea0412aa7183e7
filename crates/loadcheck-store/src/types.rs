/// Summary of one bucket as reported by a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub versioned: bool,
}

/// One key as reported by a key listing. `version` is the identifier of the
/// latest version for versioned buckets and `None` for unversioned ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub key: String,
    pub version: Option<String>,
    pub size: u64,
}

/// One object version as reported by a version listing of a versioned bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub key: String,
    pub version: String,
    pub size: u64,
}

/// Server-side operational counters for one reporting interval.
///
/// Only the fields compared by audit reconciliation are reported; the server
/// accumulates them as the operations appear to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpsSnapshot {
    pub archive_success: u64,
    pub success_bytes_in: u64,
    pub retrieve_success: u64,
    pub success_bytes_out: u64,
    pub delete_success: u64,
    pub listmatch_success: u64,
}

/// The server's self-reported usage for one bucket, as one or more reporting
/// intervals. A well-formed report for a single run has exactly one interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReport {
    pub bucket: String,
    pub intervals: Vec<OpsSnapshot>,
}
