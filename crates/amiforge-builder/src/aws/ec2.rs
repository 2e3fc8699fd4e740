//! EC2 image operations: tagging, sharing, copying and deregistering AMIs,
//! plus locating the instance an image build runs on

use crate::aws::context::AwsContext;
use crate::aws::error::{AwsError, sdk_error};
use crate::aws::tags::ec2_tags;
use anyhow::{Context, Result};
use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::{Filter, Instance, LaunchPermission, LaunchPermissionModifications};
use std::collections::BTreeMap;
use tracing::debug;

/// State and backing snapshots of one AMI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// EC2 image state (`pending`, `available`, `failed`, ...)
    pub state: String,
    pub snapshot_ids: Vec<String>,
}

/// Tag Image Builder puts on build instances, holding the image build ARN
const BUILD_ARN_TAG: &str = "Ec2ImageBuilderArn";

/// The EC2 instance an image build is running on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInstance {
    pub instance_id: String,
    pub instance_type: String,
    /// EC2 instance state (`pending`, `running`, ...)
    pub state: String,
    pub state_reason: Option<String>,
    pub private_ip: Option<String>,
    pub availability_zone: Option<String>,
}

impl BuildInstance {
    fn from_instance(instance: &Instance) -> Option<Self> {
        Some(Self {
            instance_id: instance.instance_id()?.to_string(),
            instance_type: instance
                .instance_type()
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            state: instance
                .state()
                .and_then(|s| s.name())
                .map(|n| n.as_str().to_string())
                .unwrap_or_default(),
            state_reason: instance
                .state_reason()
                .and_then(|r| r.message())
                .map(str::to_string),
            private_ip: instance.private_ip_address().map(str::to_string),
            availability_zone: instance
                .placement()
                .and_then(|p| p.availability_zone())
                .map(str::to_string),
        })
    }
}

fn builds_image(instance: &Instance, image_name: &str) -> bool {
    instance.tags().iter().any(|tag| {
        tag.key() == Some(BUILD_ARN_TAG) && tag.value().is_some_and(|v| v.contains(image_name))
    })
}

/// EC2 client for AMI lifecycle operations
pub struct Ec2ImageClient {
    pub(crate) client: Client,
    pub(crate) region: String,
}

impl Ec2ImageClient {
    /// Create a new EC2 client (loads AWS config from environment)
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create an EC2 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
            region: ctx.region().to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Trait for EC2 image operations that can be mocked in tests.
///
/// Parameters use owned slices rather than iterators to work around mockall
/// lifetime limitations.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait ImageApi: Send + Sync {
    /// Apply tags to all resources in a single CreateTags request
    async fn create_tags(&self, resource_ids: &[String], tags: &BTreeMap<String, String>)
    -> Result<()>;

    /// Grant launch permission on an image to the given accounts
    async fn share_image(&self, image_id: &str, account_ids: &[String]) -> Result<()>;

    /// Copy an image from `source_region` into this client's region
    async fn copy_image(&self, image_id: &str, source_region: &str, name: &str) -> Result<String>;

    /// Describe an image. Returns `None` when the image does not exist.
    async fn describe_image(&self, image_id: &str) -> Result<Option<ImageInfo>>;

    async fn deregister_image(&self, image_id: &str) -> Result<()>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    /// Most recently launched live build instance of `image_name`, if any
    async fn find_build_instance(&self, image_name: &str) -> Result<Option<BuildInstance>>;
}

impl ImageApi for Ec2ImageClient {
    async fn create_tags(
        &self,
        resource_ids: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.client
            .create_tags()
            .set_resources(Some(resource_ids.to_vec()))
            .set_tags(Some(ec2_tags(tags)))
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to create tags")?;

        debug!(resources = resource_ids.len(), tags = tags.len(), "Tagged resources");
        Ok(())
    }

    async fn share_image(&self, image_id: &str, account_ids: &[String]) -> Result<()> {
        let permissions = account_ids
            .iter()
            .map(|account| LaunchPermission::builder().user_id(account).build())
            .collect();

        self.client
            .modify_image_attribute()
            .image_id(image_id)
            .launch_permission(
                LaunchPermissionModifications::builder()
                    .set_add(Some(permissions))
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)
            .with_context(|| format!("Failed to share image {image_id}"))?;

        Ok(())
    }

    async fn copy_image(&self, image_id: &str, source_region: &str, name: &str) -> Result<String> {
        let response = self
            .client
            .copy_image()
            .source_image_id(image_id)
            .source_region(source_region)
            .name(name)
            .send()
            .await
            .map_err(sdk_error)
            .with_context(|| format!("Failed to copy image {image_id} from {source_region}"))?;

        response
            .image_id()
            .map(str::to_string)
            .context("No image ID in copy response")
    }

    async fn describe_image(&self, image_id: &str) -> Result<Option<ImageInfo>> {
        let response = match self
            .client
            .describe_images()
            .image_ids(image_id)
            .send()
            .await
            .map_err(sdk_error)
        {
            Ok(response) => response,
            Err(e)
                if e.downcast_ref::<AwsError>()
                    .is_some_and(AwsError::is_not_found) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e.context(format!("Failed to describe image {image_id}"))),
        };

        Ok(response.images().first().map(|image| ImageInfo {
            state: image
                .state()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            snapshot_ids: image
                .block_device_mappings()
                .iter()
                .filter_map(|m| m.ebs().and_then(|ebs| ebs.snapshot_id()))
                .map(str::to_string)
                .collect(),
        }))
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        self.client
            .deregister_image()
            .image_id(image_id)
            .send()
            .await
            .map_err(sdk_error)
            .with_context(|| format!("Failed to deregister image {image_id}"))?;
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.client
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .map_err(sdk_error)
            .with_context(|| format!("Failed to delete snapshot {snapshot_id}"))?;
        Ok(())
    }

    async fn find_build_instance(&self, image_name: &str) -> Result<Option<BuildInstance>> {
        let response = self
            .client
            .describe_instances()
            .filters(
                Filter::builder()
                    .name("tag:CreatedBy")
                    .values("EC2 Image Builder")
                    .build(),
            )
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("pending")
                    .values("running")
                    .values("stopping")
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to describe build instances")?;

        let latest = response
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .filter(|instance| builds_image(instance, image_name))
            .max_by_key(|instance| instance.launch_time().map(|t| t.secs()));

        Ok(latest.and_then(BuildInstance::from_instance))
    }
}
