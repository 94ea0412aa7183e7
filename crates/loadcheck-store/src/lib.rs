mod error;
mod memory;
mod traits;
mod types;

pub use error::{PayloadError, StoreError};
pub use memory::MemoryStore;
pub use traits::{ObjectStore, PayloadSink, PayloadSource};
pub use types::{BucketInfo, KeyInfo, OpsSnapshot, UsageReport, VersionInfo};
