use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// A test plan drives one simulated customer session.
///
/// Field names match the JSON test scripts (`kebab-case`). The distribution
/// maps action names to integer percentages that must sum to exactly 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestPlan {
    /// Weighted action distribution, action name -> percentage.
    pub distribution: BTreeMap<String, u32>,
    /// Smallest object size to archive, in bytes.
    pub min_file_size: u64,
    /// Largest object size to archive, in bytes.
    pub max_file_size: u64,
    /// Part size for multipart uploads; objects larger than twice this go multipart.
    pub multipart_part_size: u64,
    /// Lower bound of the jittered inter-action delay, in seconds.
    pub low_delay: f64,
    /// Upper bound of the jittered inter-action delay, in seconds.
    pub high_delay: f64,
    /// Ceiling on the number of buckets a session may hold at once.
    pub max_bucket_count: u32,
    /// Percentage [0, 100] of archive attempts that simulate a mid-payload
    /// read failure. Zero disables fault injection.
    #[serde(default)]
    pub fault_percent: u8,
    /// Read every known object at session start and record its expected state.
    #[serde(default)]
    pub verify_before: bool,
    /// Destructively sweep the verification ledger at session end.
    #[serde(default)]
    pub verify_after: bool,
    /// Reconcile local operation counters against the server's usage report
    /// at session end.
    #[serde(default)]
    pub audit_after: bool,
}

impl TestPlan {
    /// Validate cross-field constraints. Called by the parsing entry points;
    /// exposed for plans built in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum: u32 = self.distribution.values().sum();
        if sum != 100 {
            return Err(ConfigError::DistributionSum(sum));
        }
        if self.min_file_size == 0 || self.min_file_size > self.max_file_size {
            return Err(ConfigError::InvalidConfig(format!(
                "file size bounds [{}, {}] are not a valid range",
                self.min_file_size, self.max_file_size
            )));
        }
        if self.multipart_part_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "multipart-part-size must be positive".to_string(),
            ));
        }
        if self.low_delay < 0.0 || self.low_delay > self.high_delay {
            return Err(ConfigError::InvalidConfig(format!(
                "delay bounds [{}, {}] are not a valid range",
                self.low_delay, self.high_delay
            )));
        }
        if self.max_bucket_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "max-bucket-count must be at least 1".to_string(),
            ));
        }
        if self.fault_percent > 100 {
            return Err(ConfigError::InvalidConfig(format!(
                "fault-percent {} exceeds 100",
                self.fault_percent
            )));
        }
        Ok(())
    }
}

/// Credentials for one simulated customer account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserIdentity {
    pub user_name: String,
    pub auth_key_id: String,
    pub auth_key: String,
}
