//! EC2 Image Builder client

mod operations;
mod types;

pub use operations::ImageBuilderApi;
pub use types::{
    BlockDevice, ComponentRequest, DistributionRequest, ImageSnapshot, InfrastructureRequest,
    OutputAmi, PipelineRequest, RecipeRequest, ResourceSummary, WorkflowStepLog, build_log_group,
    image_name_from_arn, log_group_console_url, version_from_arn,
};

#[cfg(test)]
pub use operations::MockImageBuilderApi;

use crate::aws::context::AwsContext;
use crate::aws::error::sdk_error;
use crate::aws::logs::BuildLogsClient;
use amiforge_common::defaults::DEFAULT_VOLUME_TYPE;
use amiforge_common::tags::TAG_TOOL;
use amiforge_common::{Platform, ResourceKind};
use anyhow::{Context, Result};
use aws_sdk_imagebuilder::Client;
use aws_sdk_imagebuilder::types::{
    AmiDistributionConfiguration, ComponentConfiguration, Distribution,
    EbsInstanceBlockDeviceSpecification, EbsVolumeType, FastLaunchConfiguration,
    FastLaunchSnapshotConfiguration, Filter, InstanceBlockDeviceMapping, Ownership,
    PipelineStatus,
};
use std::collections::HashMap;
use tracing::debug;

/// Image Builder client for managing build resources
pub struct ImageBuilderClient {
    pub(crate) client: Client,
    pub(crate) logs: BuildLogsClient,
    pub(crate) region: String,
}

fn name_filter(name: &str) -> Filter {
    Filter::builder().name("name").values(name).build()
}

fn owned_tags(tags: Option<&HashMap<String, String>>) -> HashMap<String, String> {
    tags.cloned().unwrap_or_default()
}

/// Parse a volume type, falling back to gp3 for anything unrecognized.
pub fn parse_volume_type(value: &str) -> EbsVolumeType {
    match value.to_ascii_lowercase().as_str() {
        "gp2" => EbsVolumeType::Gp2,
        "gp3" => EbsVolumeType::Gp3,
        "io1" => EbsVolumeType::Io1,
        "io2" => EbsVolumeType::Io2,
        "sc1" => EbsVolumeType::Sc1,
        "st1" => EbsVolumeType::St1,
        "standard" => EbsVolumeType::Standard,
        _ => EbsVolumeType::from(DEFAULT_VOLUME_TYPE),
    }
}

impl ImageBuilderClient {
    /// Create a new Image Builder client (loads AWS config from environment)
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create an Image Builder client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.imagebuilder_client(),
            logs: BuildLogsClient::from_context(ctx),
            region: ctx.region().to_string(),
        }
    }

    /// List resources of one kind, optionally narrowed by a name filter.
    pub async fn list(&self, kind: ResourceKind, name: Option<&str>) -> Result<Vec<ResourceSummary>> {
        let summaries = match kind {
            ResourceKind::Pipeline => self.list_pipelines(name).await?,
            ResourceKind::Recipe => self.list_recipes(name).await?,
            ResourceKind::DistributionConfig => self.list_distributions(name).await?,
            ResourceKind::InfrastructureConfig => self.list_infrastructure(name).await?,
            ResourceKind::Component => self.list_components(name).await?,
        };
        debug!(kind = %kind, name = ?name, count = summaries.len(), "Listed resources");
        Ok(summaries)
    }

    /// List resources of one kind that carry the tool tag
    pub async fn list_managed(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>> {
        let summaries = self.list(kind, None).await?;
        Ok(summaries
            .into_iter()
            .filter(|s| s.tags.contains_key(TAG_TOOL))
            .collect())
    }

    async fn list_pipelines(&self, name: Option<&str>) -> Result<Vec<ResourceSummary>> {
        let mut summaries = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .client
                .list_image_pipelines()
                .set_filters(name.map(|n| vec![name_filter(n)]))
                .set_next_token(next_token)
                .send()
                .await
                .map_err(sdk_error)
                .context("Failed to list image pipelines")?;

            for pipeline in response.image_pipeline_list() {
                if let (Some(arn), Some(name)) = (pipeline.arn(), pipeline.name()) {
                    summaries.push(ResourceSummary {
                        kind: ResourceKind::Pipeline,
                        name: name.to_string(),
                        version: None,
                        arn: arn.to_string(),
                        tags: owned_tags(pipeline.tags()),
                    });
                }
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(summaries);
            }
        }
    }

    async fn list_recipes(&self, name: Option<&str>) -> Result<Vec<ResourceSummary>> {
        let mut summaries = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .client
                .list_image_recipes()
                .owner(Ownership::Self_)
                .set_filters(name.map(|n| vec![name_filter(n)]))
                .set_next_token(next_token)
                .send()
                .await
                .map_err(sdk_error)
                .context("Failed to list image recipes")?;

            for recipe in response.image_recipe_summary_list() {
                if let (Some(arn), Some(name)) = (recipe.arn(), recipe.name()) {
                    summaries.push(ResourceSummary {
                        kind: ResourceKind::Recipe,
                        name: name.to_string(),
                        version: version_from_arn(arn).map(str::to_string),
                        arn: arn.to_string(),
                        tags: owned_tags(recipe.tags()),
                    });
                }
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(summaries);
            }
        }
    }

    async fn list_distributions(&self, name: Option<&str>) -> Result<Vec<ResourceSummary>> {
        let mut summaries = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .client
                .list_distribution_configurations()
                .set_filters(name.map(|n| vec![name_filter(n)]))
                .set_next_token(next_token)
                .send()
                .await
                .map_err(sdk_error)
                .context("Failed to list distribution configurations")?;

            for dist in response.distribution_configuration_summary_list() {
                if let (Some(arn), Some(name)) = (dist.arn(), dist.name()) {
                    summaries.push(ResourceSummary {
                        kind: ResourceKind::DistributionConfig,
                        name: name.to_string(),
                        version: None,
                        arn: arn.to_string(),
                        tags: owned_tags(dist.tags()),
                    });
                }
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(summaries);
            }
        }
    }

    async fn list_infrastructure(&self, name: Option<&str>) -> Result<Vec<ResourceSummary>> {
        let mut summaries = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .client
                .list_infrastructure_configurations()
                .set_filters(name.map(|n| vec![name_filter(n)]))
                .set_next_token(next_token)
                .send()
                .await
                .map_err(sdk_error)
                .context("Failed to list infrastructure configurations")?;

            for infra in response.infrastructure_configuration_summary_list() {
                if let (Some(arn), Some(name)) = (infra.arn(), infra.name()) {
                    summaries.push(ResourceSummary {
                        kind: ResourceKind::InfrastructureConfig,
                        name: name.to_string(),
                        version: None,
                        arn: arn.to_string(),
                        tags: owned_tags(infra.tags()),
                    });
                }
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(summaries);
            }
        }
    }

    /// List component build versions. Deleting a component needs the
    /// build-version ARN, so each component version is expanded.
    async fn list_components(&self, name: Option<&str>) -> Result<Vec<ResourceSummary>> {
        let mut version_arns = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .client
                .list_components()
                .owner(Ownership::Self_)
                .set_filters(name.map(|n| vec![name_filter(n)]))
                .set_next_token(next_token)
                .send()
                .await
                .map_err(sdk_error)
                .context("Failed to list components")?;

            version_arns.extend(
                response
                    .component_version_list()
                    .iter()
                    .filter_map(|v| v.arn().map(str::to_string)),
            );

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        let mut summaries = Vec::new();
        for version_arn in version_arns {
            let mut next_token = None;
            loop {
                let response = self
                    .client
                    .list_component_build_versions()
                    .component_version_arn(&version_arn)
                    .set_next_token(next_token)
                    .send()
                    .await
                    .map_err(sdk_error)
                    .with_context(|| format!("Failed to list build versions of {version_arn}"))?;

                for build in response.component_summary_list() {
                    if let (Some(arn), Some(name)) = (build.arn(), build.name()) {
                        summaries.push(ResourceSummary {
                            kind: ResourceKind::Component,
                            name: name.to_string(),
                            version: build.version().map(str::to_string),
                            arn: arn.to_string(),
                            tags: owned_tags(build.tags()),
                        });
                    }
                }

                next_token = response.next_token().map(str::to_string);
                if next_token.is_none() {
                    break;
                }
            }
        }
        Ok(summaries)
    }

    /// Delete a resource by ARN
    pub async fn delete(&self, kind: ResourceKind, arn: &str) -> Result<()> {
        match kind {
            ResourceKind::Pipeline => {
                self.client
                    .delete_image_pipeline()
                    .image_pipeline_arn(arn)
                    .send()
                    .await
                    .map_err(sdk_error)
                    .context("Failed to delete image pipeline")?;
            }
            ResourceKind::Recipe => {
                self.client
                    .delete_image_recipe()
                    .image_recipe_arn(arn)
                    .send()
                    .await
                    .map_err(sdk_error)
                    .context("Failed to delete image recipe")?;
            }
            ResourceKind::DistributionConfig => {
                self.client
                    .delete_distribution_configuration()
                    .distribution_configuration_arn(arn)
                    .send()
                    .await
                    .map_err(sdk_error)
                    .context("Failed to delete distribution configuration")?;
            }
            ResourceKind::InfrastructureConfig => {
                self.client
                    .delete_infrastructure_configuration()
                    .infrastructure_configuration_arn(arn)
                    .send()
                    .await
                    .map_err(sdk_error)
                    .context("Failed to delete infrastructure configuration")?;
            }
            ResourceKind::Component => {
                self.client
                    .delete_component()
                    .component_build_version_arn(arn)
                    .send()
                    .await
                    .map_err(sdk_error)
                    .context("Failed to delete component")?;
            }
        }
        debug!(kind = %kind, arn = %arn, "Deleted resource");
        Ok(())
    }

    pub async fn create_component(&self, request: &ComponentRequest) -> Result<String> {
        let platform = match request.platform {
            Platform::Linux => aws_sdk_imagebuilder::types::Platform::Linux,
            Platform::Windows => aws_sdk_imagebuilder::types::Platform::Windows,
        };

        let response = self
            .client
            .create_component()
            .name(&request.name)
            .semantic_version(&request.version)
            .description(&request.description)
            .platform(platform)
            .data(&request.document)
            .set_tags(Some(request.tags.clone()))
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to create component")?;

        response
            .component_build_version_arn()
            .map(str::to_string)
            .context("No component ARN in response")
    }

    pub async fn create_infrastructure_config(&self, request: &InfrastructureRequest) -> Result<String> {
        let security_groups =
            (!request.security_group_ids.is_empty()).then(|| request.security_group_ids.clone());

        let response = self
            .client
            .create_infrastructure_configuration()
            .name(&request.name)
            .description(&request.description)
            .set_instance_types(Some(request.instance_types.clone()))
            .instance_profile_name(&request.instance_profile)
            .set_subnet_id(request.subnet_id.clone())
            .set_security_group_ids(security_groups)
            .terminate_instance_on_failure(true)
            .set_tags(Some(request.tags.clone()))
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to create infrastructure configuration")?;

        response
            .infrastructure_configuration_arn()
            .map(str::to_string)
            .context("No infrastructure configuration ARN in response")
    }

    pub async fn create_distribution_config(&self, request: &DistributionRequest) -> Result<String> {
        let ami = AmiDistributionConfiguration::builder()
            .name(&request.ami_name)
            .description(&request.description)
            .set_ami_tags((!request.ami_tags.is_empty()).then(|| request.ami_tags.clone()))
            .build();

        let fast_launch = request.fast_launch.as_ref().map(|fl| {
            vec![
                FastLaunchConfiguration::builder()
                    .enabled(true)
                    .max_parallel_launches(fl.max_parallel_launches())
                    .snapshot_configuration(
                        FastLaunchSnapshotConfiguration::builder()
                            .target_resource_count(fl.target_resource_count())
                            .build(),
                    )
                    .build(),
            ]
        });

        let distribution = Distribution::builder()
            .region(&request.region)
            .ami_distribution_configuration(ami)
            .set_fast_launch_configurations(fast_launch)
            .build()
            .context("Failed to build distribution")?;

        let response = self
            .client
            .create_distribution_configuration()
            .name(&request.name)
            .description(&request.description)
            .distributions(distribution)
            .set_tags(Some(request.tags.clone()))
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to create distribution configuration")?;

        response
            .distribution_configuration_arn()
            .map(str::to_string)
            .context("No distribution configuration ARN in response")
    }

    pub async fn create_image_recipe(&self, request: &RecipeRequest) -> Result<String> {
        let components = request
            .component_arns
            .iter()
            .map(|arn| {
                ComponentConfiguration::builder()
                    .component_arn(arn)
                    .build()
                    .context("Failed to build component configuration")
            })
            .collect::<Result<Vec<_>>>()?;

        let block_device = InstanceBlockDeviceMapping::builder()
            .device_name(&request.block_device.device_name)
            .ebs(
                EbsInstanceBlockDeviceSpecification::builder()
                    .volume_size(request.block_device.volume_size)
                    .volume_type(parse_volume_type(&request.block_device.volume_type))
                    .delete_on_termination(true)
                    .build(),
            )
            .build();

        let response = self
            .client
            .create_image_recipe()
            .name(&request.name)
            .description(&request.description)
            .semantic_version(&request.version)
            .parent_image(&request.parent_image)
            .set_components(Some(components))
            .block_device_mappings(block_device)
            .set_tags(Some(request.tags.clone()))
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to create image recipe")?;

        response
            .image_recipe_arn()
            .map(str::to_string)
            .context("No image recipe ARN in response")
    }

    pub async fn create_image_pipeline(&self, request: &PipelineRequest) -> Result<String> {
        let response = self
            .client
            .create_image_pipeline()
            .name(&request.name)
            .description(&request.description)
            .image_recipe_arn(&request.recipe_arn)
            .infrastructure_configuration_arn(&request.infrastructure_arn)
            .distribution_configuration_arn(&request.distribution_arn)
            .enhanced_image_metadata_enabled(true)
            .status(PipelineStatus::Enabled)
            .set_tags(Some(request.tags.clone()))
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to create image pipeline")?;

        response
            .image_pipeline_arn()
            .map(str::to_string)
            .context("No image pipeline ARN in response")
    }

    pub async fn start_pipeline_execution(&self, pipeline_arn: &str) -> Result<String> {
        let response = self
            .client
            .start_image_pipeline_execution()
            .image_pipeline_arn(pipeline_arn)
            .client_token(uuid::Uuid::now_v7().to_string())
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to start image pipeline execution")?;

        response
            .image_build_version_arn()
            .map(str::to_string)
            .context("No image build version ARN in response")
    }

    pub async fn get_image(&self, image_build_arn: &str) -> Result<ImageSnapshot> {
        let response = self
            .client
            .get_image()
            .image_build_version_arn(image_build_arn)
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to get image")?;

        let Some(image) = response.image() else {
            return Ok(ImageSnapshot::default());
        };

        let state = image.state();
        let output_amis = image
            .output_resources()
            .map(|resources| {
                resources
                    .amis()
                    .iter()
                    .filter_map(|ami| {
                        Some(OutputAmi {
                            image_id: ami.image()?.to_string(),
                            region: ami.region().unwrap_or(&self.region).to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ImageSnapshot {
            status: state
                .and_then(|s| s.status())
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            reason: state.and_then(|s| s.reason()).map(str::to_string),
            output_amis,
        })
    }

    /// List the workflow executions of an image build. Each failed workflow is
    /// followed by its step executions.
    pub async fn list_workflow_steps(&self, image_build_arn: &str) -> Result<Vec<WorkflowStepLog>> {
        let executions = self
            .client
            .list_workflow_executions()
            .image_build_version_arn(image_build_arn)
            .send()
            .await
            .map_err(sdk_error)
            .context("Failed to list workflow executions")?;

        let mut logs = Vec::new();
        for execution in executions.workflow_executions() {
            let Some(execution_id) = execution.workflow_execution_id() else {
                continue;
            };
            let log = WorkflowStepLog {
                name: execution
                    .workflow_build_version_arn()
                    .unwrap_or(execution_id)
                    .to_string(),
                status: execution
                    .status()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                message: execution.message().map(str::to_string),
            };
            let failed = log.status == "FAILED";
            logs.push(log);
            if !failed {
                continue;
            }

            let steps = self
                .client
                .list_workflow_step_executions()
                .workflow_execution_id(execution_id)
                .send()
                .await
                .map_err(sdk_error)
                .with_context(|| format!("Failed to list steps of workflow {execution_id}"))?;
            logs.extend(steps.steps().iter().map(|step| WorkflowStepLog {
                name: step.name().unwrap_or_default().to_string(),
                status: step
                    .status()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                message: step.message().map(str::to_string),
            }));
        }

        debug!(image_build_arn, entries = logs.len(), "Listed workflow executions");
        Ok(logs)
    }
}
