//! Request and response types for Image Builder operations

use amiforge_common::{FastLaunch, Platform, ResourceKind};
use std::collections::HashMap;

/// One Image Builder resource as returned by a list call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    pub kind: ResourceKind,
    pub name: String,
    /// Semantic version for recipes and components
    pub version: Option<String>,
    /// ARN used for deletion (the build-version ARN for components)
    pub arn: String,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ComponentRequest {
    pub name: String,
    pub version: String,
    pub platform: Platform,
    pub document: String,
    pub description: String,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct InfrastructureRequest {
    pub name: String,
    pub description: String,
    pub instance_types: Vec<String>,
    pub instance_profile: String,
    pub subnet_id: Option<String>,
    pub security_group_ids: Vec<String>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DistributionRequest {
    pub name: String,
    pub description: String,
    pub region: String,
    pub ami_name: String,
    pub ami_tags: HashMap<String, String>,
    /// Only set when fast launch is enabled
    pub fast_launch: Option<FastLaunch>,
    pub tags: HashMap<String, String>,
}

/// Root EBS volume of a recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub device_name: String,
    pub volume_size: i32,
    pub volume_type: String,
}

#[derive(Debug, Clone)]
pub struct RecipeRequest {
    pub name: String,
    pub description: String,
    pub version: String,
    pub parent_image: String,
    /// Component build-version ARNs in provisioner order
    pub component_arns: Vec<String>,
    pub block_device: BlockDevice,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub name: String,
    pub description: String,
    pub recipe_arn: String,
    pub infrastructure_arn: String,
    pub distribution_arn: String,
    pub tags: HashMap<String, String>,
}

/// An AMI produced by an image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAmi {
    pub image_id: String,
    pub region: String,
}

/// Point-in-time view of an image build
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageSnapshot {
    /// Raw Image Builder status string (e.g. `BUILDING`)
    pub status: String,
    pub reason: Option<String>,
    pub output_amis: Vec<OutputAmi>,
}

/// One workflow execution, or one step of a failed workflow, of an image build
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkflowStepLog {
    pub name: String,
    /// Raw status string (e.g. `FAILED`)
    pub status: String,
    pub message: Option<String>,
}

impl WorkflowStepLog {
    pub fn is_failed(&self) -> bool {
        matches!(self.status.as_str(), "FAILED" | "ERROR")
    }
}

/// Image name segment of an image build-version ARN
/// (`...:image/{name}/{version}/{build}`).
pub fn image_name_from_arn(arn: &str) -> Option<&str> {
    let (_, rest) = arn.split_once(":image/")?;
    rest.split('/').next().filter(|name| !name.is_empty())
}

/// Log group Image Builder writes an image's build output to
pub fn build_log_group(image_name: &str) -> String {
    format!("/aws/imagebuilder/{image_name}")
}

/// CloudWatch console link to a log group
pub fn log_group_console_url(region: &str, log_group: &str) -> String {
    format!(
        "https://{region}.console.aws.amazon.com/cloudwatch/home?region={region}#logsV2:log-groups/log-group/{}",
        log_group.replace('/', "$252F")
    )
}

/// Version segment of a recipe or image ARN (`.../name/1.0.0`).
pub fn version_from_arn(arn: &str) -> Option<&str> {
    let mut segments = arn.rsplit('/');
    let last = segments.next()?;
    if last.contains('.') {
        return Some(last);
    }
    // Component build-version ARNs end in a build number
    segments.next().filter(|s| s.contains('.'))
}
