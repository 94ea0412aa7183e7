mod types;

use std::path::Path;

pub use types::*;

/// Configuration errors.
///
/// Every variant is fatal: a session must not start with a broken plan.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Action distribution sums to {0}, expected exactly 100")]
    DistributionSum(u32),

    #[error("Unknown action '{0}' in distribution")]
    UnknownAction(String),

    #[error("Existing bucket '{name}' exceeds the configured ceiling of {ceiling}")]
    BucketCeilingExceeded { name: String, ceiling: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TestPlan {
    /// Parse a test plan from a JSON string and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let plan: TestPlan = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load a test plan from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl UserIdentity {
    /// Load a user identity from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
