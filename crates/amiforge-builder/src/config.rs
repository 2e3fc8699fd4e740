//! Configuration types for the builder

use crate::pipeline::PollConfig;
use amiforge_common::defaults::{
    DEFAULT_BATCH_CONCURRENCY, DEFAULT_COMPONENT_VERSIONS_KEPT, DEFAULT_DEVICE_NAME, DEFAULT_INSTANCE_TYPE, DEFAULT_REGION,
    DEFAULT_VOLUME_SIZE_GIB, DEFAULT_VOLUME_TYPE, default_build_timeout, default_poll_interval,
};
use std::time::Duration;

/// AWS connection settings
#[derive(Debug, Clone)]
pub struct AwsConfig {
    /// Region of the Image Builder and EC2 clients
    pub region: String,
    /// AWS profile name (overrides default credential resolution)
    pub profile: Option<String>,
}

/// Values a target falls back to when it leaves a field unset
#[derive(Debug, Clone)]
pub struct AmiDefaults {
    pub instance_type: String,
    pub instance_profile: Option<String>,
    /// Used when the spec has no base image
    pub parent_image: Option<String>,
    pub volume_size: i32,
    pub volume_type: String,
    pub device_name: String,
}

/// Pipeline polling and build observation settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Raised to the one-second minimum when the runner is built
    pub poll_interval: Duration,
    /// Deadline for one image build
    pub timeout: Duration,
    /// Tail the build's CloudWatch log group on every poll while it builds
    pub stream_logs: bool,
    /// Report the build instance's state whenever it changes
    pub show_instance_status: bool,
}

/// Build behavior toggles
#[derive(Debug, Clone)]
pub struct BuildFlags {
    /// Delete and recreate existing resources
    pub force_recreate: bool,
    /// Prepended to every resource name as `{prefix}-`
    pub name_prefix: Option<String>,
    /// Concurrent remote calls per batch
    pub concurrency: usize,
    /// Component versions left in place when a forced rebuild prunes old ones
    pub keep_component_versions: usize,
}

/// Configuration for the builder
///
/// Composed of focused sub-configs. Fields are accessible both through the
/// sub-configs and through flat accessor methods.
#[derive(Debug, Clone, Default)]
pub struct BuilderConfig {
    pub aws: AwsConfig,
    pub defaults: AmiDefaults,
    pub monitor: MonitorConfig,
    pub flags: BuildFlags,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            profile: None,
        }
    }
}

impl Default for AmiDefaults {
    fn default() -> Self {
        Self {
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            instance_profile: None,
            parent_image: None,
            volume_size: DEFAULT_VOLUME_SIZE_GIB,
            volume_type: DEFAULT_VOLUME_TYPE.to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            timeout: default_build_timeout(),
            stream_logs: false,
            show_instance_status: false,
        }
    }
}

impl Default for BuildFlags {
    fn default() -> Self {
        Self {
            force_recreate: false,
            name_prefix: None,
            concurrency: DEFAULT_BATCH_CONCURRENCY,
            keep_component_versions: DEFAULT_COMPONENT_VERSIONS_KEPT,
        }
    }
}

impl From<&MonitorConfig> for PollConfig {
    fn from(monitor: &MonitorConfig) -> Self {
        Self {
            interval: monitor.poll_interval,
            timeout: monitor.timeout,
        }
    }
}

impl BuilderConfig {
    pub fn region(&self) -> &str {
        &self.aws.region
    }
    pub fn profile(&self) -> Option<&str> {
        self.aws.profile.as_deref()
    }

    pub fn force_recreate(&self) -> bool {
        self.flags.force_recreate
    }
    pub fn name_prefix(&self) -> Option<&str> {
        self.flags.name_prefix.as_deref()
    }
    pub fn concurrency(&self) -> usize {
        self.flags.concurrency
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::from(&self.monitor)
    }
}
