//! Default configuration values
//!
//! These constants keep the CLI, the spec loader and the orchestrator in agreement.

use std::time::Duration;

/// Maximum number of in-flight remote calls per batch operation
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

/// Interval between pipeline status polls (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Shortest accepted interval between pipeline status polls (seconds)
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;

/// Component versions kept when old ones are pruned after a forced rebuild
pub const DEFAULT_COMPONENT_VERSIONS_KEPT: usize = 3;

/// Deadline for one pipeline execution (2 hours)
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 7200;

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default build instance type
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.medium";

/// Default root volume size in GiB
pub const DEFAULT_VOLUME_SIZE_GIB: i32 = 8;

/// Default root device name
pub const DEFAULT_DEVICE_NAME: &str = "/dev/xvda";

/// Default EBS volume type
pub const DEFAULT_VOLUME_TYPE: &str = "gp3";

/// Provider-recommended fast launch parallelism
pub const DEFAULT_FAST_LAUNCH_MAX_PARALLEL: i32 = 6;

/// Provider-recommended number of pre-provisioned fast launch snapshots
pub const DEFAULT_FAST_LAUNCH_TARGET_RESOURCES: i32 = 5;

/// Default poll interval as a `Duration`
pub fn default_poll_interval() -> Duration {
    Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
}

/// Shortest accepted poll interval as a `Duration`
pub fn min_poll_interval() -> Duration {
    Duration::from_secs(MIN_POLL_INTERVAL_SECS)
}

/// Default build deadline as a `Duration`
pub fn default_build_timeout() -> Duration {
    Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS)
}
