use std::collections::HashMap;

use loadcheck_store::UsageReport;
use tracing::error;

use crate::accounting::{BucketAccounting, Counter};

/// The counter pairs compared during reconciliation: what the session
/// tracked locally against what the server reports per bucket.
const AUDITED: [(Counter, fn(&loadcheck_store::OpsSnapshot) -> u64); 6] = [
    (Counter::ArchiveSuccess, |ops| ops.archive_success),
    (Counter::SuccessBytesIn, |ops| ops.success_bytes_in),
    (Counter::RetrieveSuccess, |ops| ops.retrieve_success),
    (Counter::SuccessBytesOut, |ops| ops.success_bytes_out),
    (Counter::DeleteSuccess, |ops| ops.delete_success),
    (Counter::ListmatchSuccess, |ops| ops.listmatch_success),
];

/// Reconcile the session's per-bucket accounting against the server's usage
/// reports. Returns the number of discrepancies, logging each one.
///
/// A bucket reported with more than one interval is counted as a single
/// error and not aggregated: a clean single-session run produces exactly one
/// interval, and guessing which intervals belong to this session would mask
/// real drift. A bucket absent from the report is compared against an
/// all-zero baseline.
pub fn reconcile(local: &HashMap<String, BucketAccounting>, reports: &[UsageReport]) -> u64 {
    let by_bucket: HashMap<&str, &UsageReport> =
        reports.iter().map(|r| (r.bucket.as_str(), r)).collect();
    let zero = loadcheck_store::OpsSnapshot::default();

    let mut errors = 0u64;
    let mut buckets: Vec<&String> = local.keys().collect();
    buckets.sort();
    for bucket in buckets {
        let acct = &local[bucket.as_str()];
        let server = match by_bucket.get(bucket.as_str()) {
            Some(report) if report.intervals.len() > 1 => {
                error!(
                    bucket = %bucket,
                    intervals = report.intervals.len(),
                    "server reported multiple accounting intervals"
                );
                errors += 1;
                continue;
            }
            Some(report) => report.intervals.first().unwrap_or(&zero),
            None => &zero,
        };
        for (counter, field) in AUDITED {
            let ours = acct.get(counter);
            let theirs = field(server);
            if ours != theirs {
                error!(
                    bucket = %bucket,
                    counter = counter.name(),
                    local = ours,
                    server = theirs,
                    "audit mismatch"
                );
                errors += 1;
            }
        }
    }
    errors
}
