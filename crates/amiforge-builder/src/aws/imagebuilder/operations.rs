//! Image Builder operations trait for testing

use super::ImageBuilderClient;
use super::types::{
    ComponentRequest, DistributionRequest, ImageSnapshot, InfrastructureRequest, PipelineRequest,
    RecipeRequest, ResourceSummary, WorkflowStepLog,
};
use crate::aws::error::{ErrorClass, classify_anyhow_error};
use crate::aws::logs::LogPage;
use amiforge_common::ResourceKind;
use anyhow::Result;

/// Provider operations the orchestration core depends on.
///
/// Abstracts the Image Builder client so resource management, pipeline
/// monitoring and rollback can be tested without hitting real AWS.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait ImageBuilderApi: Send + Sync {
    /// Region the client talks to
    fn region(&self) -> String;

    /// List resources of `kind` whose name is exactly `name`.
    ///
    /// Components and recipes return one entry per version.
    async fn list_resources(&self, kind: ResourceKind, name: &str) -> Result<Vec<ResourceSummary>>;

    /// List every resource of `kind` carrying the tool tag.
    async fn list_managed(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>>;

    /// Delete a resource by ARN
    async fn delete_resource(&self, kind: ResourceKind, arn: &str) -> Result<()>;

    /// Create a component, returning its build-version ARN
    async fn create_component(&self, request: &ComponentRequest) -> Result<String>;

    async fn create_infrastructure_config(&self, request: &InfrastructureRequest) -> Result<String>;

    async fn create_distribution_config(&self, request: &DistributionRequest) -> Result<String>;

    async fn create_image_recipe(&self, request: &RecipeRequest) -> Result<String>;

    async fn create_image_pipeline(&self, request: &PipelineRequest) -> Result<String>;

    /// Start a pipeline execution, returning the image build-version ARN
    async fn start_pipeline_execution(&self, pipeline_arn: &str) -> Result<String>;

    /// Read the current state of an image build
    async fn get_image(&self, image_build_arn: &str) -> Result<ImageSnapshot>;

    /// Workflow executions of an image build, each failed workflow followed
    /// by its steps
    async fn list_workflow_steps(&self, image_build_arn: &str) -> Result<Vec<WorkflowStepLog>>;

    /// Newest build output in `log_group`, continuing from `next_token`.
    /// A log group that does not exist yet yields an empty page.
    async fn tail_build_logs(&self, log_group: &str, next_token: Option<String>) -> Result<LogPage>;

    /// Classify an error returned by any of the operations above
    fn classify(&self, error: &anyhow::Error) -> ErrorClass;
}

impl ImageBuilderApi for ImageBuilderClient {
    fn region(&self) -> String {
        self.region.clone()
    }

    async fn list_resources(&self, kind: ResourceKind, name: &str) -> Result<Vec<ResourceSummary>> {
        let summaries = ImageBuilderClient::list(self, kind, Some(name)).await?;
        Ok(summaries.into_iter().filter(|s| s.name == name).collect())
    }

    async fn list_managed(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>> {
        ImageBuilderClient::list_managed(self, kind).await
    }

    async fn delete_resource(&self, kind: ResourceKind, arn: &str) -> Result<()> {
        ImageBuilderClient::delete(self, kind, arn).await
    }

    async fn create_component(&self, request: &ComponentRequest) -> Result<String> {
        ImageBuilderClient::create_component(self, request).await
    }

    async fn create_infrastructure_config(&self, request: &InfrastructureRequest) -> Result<String> {
        ImageBuilderClient::create_infrastructure_config(self, request).await
    }

    async fn create_distribution_config(&self, request: &DistributionRequest) -> Result<String> {
        ImageBuilderClient::create_distribution_config(self, request).await
    }

    async fn create_image_recipe(&self, request: &RecipeRequest) -> Result<String> {
        ImageBuilderClient::create_image_recipe(self, request).await
    }

    async fn create_image_pipeline(&self, request: &PipelineRequest) -> Result<String> {
        ImageBuilderClient::create_image_pipeline(self, request).await
    }

    async fn start_pipeline_execution(&self, pipeline_arn: &str) -> Result<String> {
        ImageBuilderClient::start_pipeline_execution(self, pipeline_arn).await
    }

    async fn get_image(&self, image_build_arn: &str) -> Result<ImageSnapshot> {
        ImageBuilderClient::get_image(self, image_build_arn).await
    }

    async fn list_workflow_steps(&self, image_build_arn: &str) -> Result<Vec<WorkflowStepLog>> {
        ImageBuilderClient::list_workflow_steps(self, image_build_arn).await
    }

    async fn tail_build_logs(&self, log_group: &str, next_token: Option<String>) -> Result<LogPage> {
        self.logs.tail(log_group, next_token).await
    }

    fn classify(&self, error: &anyhow::Error) -> ErrorClass {
        classify_anyhow_error(error)
    }
}
