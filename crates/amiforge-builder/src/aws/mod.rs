//! AWS client modules for the builder
//!
//! This module provides wrappers around AWS SDK clients for:
//! - Image Builder: components, configurations, recipes, pipelines and image builds
//! - EC2: AMI tagging, sharing, copying and deregistration, build instance lookup
//! - CloudWatch Logs: tailing image build output

pub mod component;
pub mod context;
pub mod ec2;
pub mod error;
pub mod imagebuilder;
pub mod logs;
pub mod tags;

pub use context::AwsContext;
pub use ec2::{BuildInstance, Ec2ImageClient, ImageApi, ImageInfo};
pub use imagebuilder::{
    ImageBuilderApi, ImageBuilderClient, ImageSnapshot, ResourceSummary, WorkflowStepLog,
};
pub use logs::{BuildLogsClient, LogEvent, LogPage};

// Error handling
pub use error::{AwsError, ErrorClass, classify_anyhow_error, classify_aws_error};

#[cfg(test)]
pub use ec2::MockImageApi;
#[cfg(test)]
pub use imagebuilder::MockImageBuilderApi;
