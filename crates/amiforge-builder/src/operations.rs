//! AMI operations outside a build: tag, share, copy and deregister
//!
//! The free functions work against any [`ImageApi`] so they can be tested with
//! a mock; [`ImageOperations`] binds them to real EC2 clients and picks a
//! client for the right region.

use crate::aws::{AwsContext, Ec2ImageClient, ImageApi};
use crate::error::BuildError;
use crate::executor::{BatchExecutor, ErrorPolicy};
use crate::wait::{Readiness, WaitConfig, wait_for_resource};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// EC2 image states a copy never leaves
const TERMINAL_FAILURE_STATES: &[&str] = &["failed", "invalid", "error", "deregistered"];

/// Snapshots handled while deregistering an image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeregisterReport {
    pub deleted_snapshots: Vec<String>,
    /// Snapshots that could not be deleted and must be removed by hand
    pub remaining_snapshots: Vec<String>,
}

/// Apply `tags` to every resource in one request. Empty input is a no-op.
pub async fn tag_resources<E: ImageApi>(
    images: &E,
    resource_ids: &[String],
    tags: &BTreeMap<String, String>,
) -> Result<()> {
    if resource_ids.is_empty() || tags.is_empty() {
        return Ok(());
    }
    images.create_tags(resource_ids, tags).await
}

/// Grant launch permission on an image to other accounts.
pub async fn share_image<E: ImageApi>(images: &E, image_id: &str, account_ids: &[String]) -> Result<()> {
    if account_ids.is_empty() {
        return Err(BuildError::Validation("no account IDs to share with".to_string()).into());
    }
    let invalid: Vec<&str> = account_ids
        .iter()
        .map(String::as_str)
        .filter(|id| id.len() != 12 || !id.bytes().all(|b| b.is_ascii_digit()))
        .collect();
    if !invalid.is_empty() {
        return Err(BuildError::Validation(format!(
            "invalid AWS account IDs: {}",
            invalid.join(", ")
        ))
        .into());
    }

    images.share_image(image_id, account_ids).await?;
    info!(image = %image_id, accounts = account_ids.len(), "Shared image");
    Ok(())
}

/// Copy an image into the region of `destination` and wait until it is available.
///
/// Returns the new image ID.
pub async fn copy_image<E: ImageApi>(
    destination: &E,
    image_id: &str,
    source_region: &str,
    wait: &WaitConfig,
    cancel: &CancellationToken,
) -> Result<String> {
    let name = format!("{image_id}-copy");
    let copied = destination.copy_image(image_id, source_region, &name).await?;
    info!(source = %image_id, copy = %copied, "Image copy started");

    let copied_id = copied.as_str();
    wait_for_resource(
        wait,
        cancel,
        || async move {
            Ok(match destination.describe_image(copied_id).await? {
                Some(info) if info.state == "available" => Readiness::Ready,
                Some(info) if TERMINAL_FAILURE_STATES.contains(&info.state.as_str()) => {
                    Readiness::Failed(info.state)
                }
                _ => Readiness::Pending,
            })
        },
        copied_id,
    )
    .await
    .with_context(|| format!("Copy {copied} of {image_id} did not become available"))?;

    info!(copy = %copied, "Image copy available");
    Ok(copied)
}

/// Deregister an image, then delete its EBS snapshots.
///
/// Snapshot deletion is best effort: every snapshot is attempted and the ones
/// left behind are reported rather than failing the call.
pub async fn deregister_image<E: ImageApi>(
    images: &E,
    executor: &BatchExecutor,
    image_id: &str,
    cancel: &CancellationToken,
) -> Result<DeregisterReport> {
    let info = images
        .describe_image(image_id)
        .await?
        .with_context(|| format!("Image {image_id} not found"))?;

    images.deregister_image(image_id).await?;
    info!(image = %image_id, snapshots = info.snapshot_ids.len(), "Deregistered image");

    let outcome = executor
        .run(
            "delete snapshots",
            info.snapshot_ids.clone(),
            ErrorPolicy::CollectAll,
            cancel,
            |_, snapshot| async move {
                images.delete_snapshot(&snapshot).await?;
                Ok(snapshot)
            },
        )
        .await;

    let (deleted, error) = outcome.into_parts();
    let deleted_snapshots: Vec<String> = deleted.into_iter().map(|(_, id)| id).collect();
    let remaining_snapshots: Vec<String> = info
        .snapshot_ids
        .into_iter()
        .filter(|id| !deleted_snapshots.contains(id))
        .collect();
    if let Some(error) = error {
        warn!(error = %format!("{error:#}"), remaining = ?remaining_snapshots, "Some snapshots were not deleted");
    }

    Ok(DeregisterReport {
        deleted_snapshots,
        remaining_snapshots,
    })
}

/// AMI operations bound to EC2 clients
pub struct ImageOperations {
    context: AwsContext,
    home: Ec2ImageClient,
    executor: BatchExecutor,
    wait: WaitConfig,
}

impl ImageOperations {
    pub fn new(context: AwsContext, executor: BatchExecutor) -> Self {
        let home = Ec2ImageClient::from_context(&context);
        Self {
            context,
            home,
            executor,
            wait: WaitConfig::default(),
        }
    }

    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn region(&self) -> &str {
        self.context.region()
    }

    pub async fn tag(&self, resource_ids: &[String], tags: &BTreeMap<String, String>) -> Result<()> {
        tag_resources(&self.home, resource_ids, tags).await
    }

    #[instrument(skip(self))]
    pub async fn share(&self, image_id: &str, account_ids: &[String]) -> Result<()> {
        share_image(&self.home, image_id, account_ids).await
    }

    /// Copy `image_id` from `source_region` into `dest_region`.
    #[instrument(skip(self, cancel))]
    pub async fn copy(
        &self,
        image_id: &str,
        source_region: &str,
        dest_region: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let destination = self.client_for(dest_region).await;
        copy_image(&destination, image_id, source_region, &self.wait, cancel).await
    }

    /// Deregister `image_id` in `region`, or in this context's region when unset.
    #[instrument(skip(self, cancel))]
    pub async fn deregister(
        &self,
        image_id: &str,
        region: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DeregisterReport> {
        match region.filter(|r| *r != self.region()) {
            Some(region) => {
                let client = self.client_for(region).await;
                deregister_image(&client, &self.executor, image_id, cancel).await
            }
            None => deregister_image(&self.home, &self.executor, image_id, cancel).await,
        }
    }

    async fn client_for(&self, region: &str) -> Ec2ImageClient {
        if region == self.region() {
            Ec2ImageClient::from_context(&self.context)
        } else {
            Ec2ImageClient::from_context(&self.context.for_region(region).await)
        }
    }
}
