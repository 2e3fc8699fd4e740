//! Shared test utilities for integration tests
//!
//! In-memory Image Builder and EC2 fakes. They keep resources in a map, count
//! every call and fail on demand, so orchestration can be exercised without AWS.
#![allow(dead_code)]

use amiforge_builder::aws::imagebuilder::{
    ComponentRequest, DistributionRequest, ImageSnapshot, InfrastructureRequest, OutputAmi,
    PipelineRequest, RecipeRequest, ResourceSummary, WorkflowStepLog,
};
use amiforge_builder::aws::{
    AwsError, BuildInstance, ErrorClass, ImageApi, ImageBuilderApi, ImageInfo, LogPage,
    classify_anyhow_error,
};
use amiforge_common::ResourceKind;
use amiforge_common::tags::{TAG_TOOL, TAG_TOOL_VALUE};
use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub const REGION: &str = "us-east-1";
pub const AMI_ID: &str = "ami-0fake0000000000001";
/// Image build ARN returned by every pipeline start
pub const IMAGE_BUILD_ARN: &str = "arn:aws:imagebuilder:us-east-1:123456789012:image/fake/1.0.0/1";

/// One observable call, in the order it was made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(ResourceKind, String),
    Delete(ResourceKind, String),
    Start(String),
    Poll,
}

#[derive(Default)]
struct State {
    resources: Vec<ResourceSummary>,
    events: Vec<Event>,
    create_calls: HashMap<ResourceKind, usize>,
    delete_attempts: usize,
    fail_create: HashSet<ResourceKind>,
    fail_create_message: HashMap<ResourceKind, String>,
    fail_delete: HashSet<String>,
    statuses: VecDeque<Result<ImageSnapshot, String>>,
    workflow_steps: Vec<WorkflowStepLog>,
    log_pages: VecDeque<LogPage>,
    tail_calls: Vec<(String, Option<String>)>,
}

/// In-memory Image Builder
#[derive(Default)]
pub struct FakeImageBuilder {
    state: Mutex<State>,
}

pub fn arn(kind: ResourceKind, name: &str, version: Option<&str>) -> String {
    let kind = match kind {
        ResourceKind::Pipeline => "image-pipeline",
        ResourceKind::Recipe => "image-recipe",
        ResourceKind::DistributionConfig => "distribution-configuration",
        ResourceKind::InfrastructureConfig => "infrastructure-configuration",
        ResourceKind::Component => "component",
    };
    match version {
        Some(v) => format!("arn:aws:imagebuilder:{REGION}:123456789012:{kind}/{name}/{v}"),
        None => format!("arn:aws:imagebuilder:{REGION}:123456789012:{kind}/{name}"),
    }
}

/// A completed image snapshot with [`AMI_ID`]
pub fn available() -> ImageSnapshot {
    ImageSnapshot {
        status: "AVAILABLE".to_string(),
        reason: None,
        output_amis: vec![OutputAmi {
            image_id: AMI_ID.to_string(),
            region: REGION.to_string(),
        }],
    }
}

pub fn status(status: &str) -> ImageSnapshot {
    ImageSnapshot {
        status: status.to_string(),
        ..Default::default()
    }
}

pub fn failed(reason: &str) -> ImageSnapshot {
    ImageSnapshot {
        status: "FAILED".to_string(),
        reason: Some(reason.to_string()),
        output_amis: Vec::new(),
    }
}

impl FakeImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource as if an earlier run had created it. Returns its ARN.
    pub fn seed(&self, kind: ResourceKind, name: &str, version: Option<&str>) -> String {
        let arn = arn(kind, name, version);
        self.state.lock().unwrap().resources.push(ResourceSummary {
            kind,
            name: name.to_string(),
            version: version.map(str::to_string),
            arn: arn.clone(),
            tags: HashMap::from([(TAG_TOOL.to_string(), TAG_TOOL_VALUE.to_string())]),
        });
        arn
    }

    /// Make every create of `kind` fail
    pub fn fail_create(&self, kind: ResourceKind, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.fail_create.insert(kind);
        state.fail_create_message.insert(kind, message.to_string());
    }

    /// Make deletes of `arn` fail
    pub fn fail_delete(&self, arn: &str) {
        self.state.lock().unwrap().fail_delete.insert(arn.to_string());
    }

    /// Queue image statuses returned by successive polls. The last one repeats.
    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = ImageSnapshot>) {
        let mut state = self.state.lock().unwrap();
        state.statuses.extend(statuses.into_iter().map(Ok));
    }

    /// Queue a transient read failure
    pub fn push_throttle(&self) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .push_back(Err("throttled".to_string()));
    }

    /// Workflow executions reported for every image build
    pub fn set_workflow_steps(&self, steps: Vec<WorkflowStepLog>) {
        self.state.lock().unwrap().workflow_steps = steps;
    }

    /// Queue pages returned by successive log tails. Once drained, tails
    /// return an empty page with the token they were given.
    pub fn push_log_pages(&self, pages: impl IntoIterator<Item = LogPage>) {
        self.state.lock().unwrap().log_pages.extend(pages);
    }

    /// `(log group, token)` of every log tail, in order
    pub fn tail_calls(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().unwrap().tail_calls.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn create_calls(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .create_calls
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_creates(&self) -> usize {
        self.state.lock().unwrap().create_calls.values().sum()
    }

    pub fn delete_attempts(&self) -> usize {
        self.state.lock().unwrap().delete_attempts
    }

    pub fn polls(&self) -> usize {
        self.events().iter().filter(|e| **e == Event::Poll).count()
    }

    pub fn deleted(&self) -> Vec<(ResourceKind, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Delete(kind, arn) => Some((kind, arn)),
                _ => None,
            })
            .collect()
    }

    /// Resources currently present
    pub fn resources(&self) -> Vec<ResourceSummary> {
        self.state.lock().unwrap().resources.clone()
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.resources().iter().filter(|r| r.kind == kind).count()
    }

    fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        version: Option<&str>,
        tags: &HashMap<String, String>,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        *state.create_calls.entry(kind).or_default() += 1;
        state.events.push(Event::Create(kind, name.to_string()));

        if state.fail_create.contains(&kind) {
            let message = state
                .fail_create_message
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| "create failed".to_string());
            return Err(anyhow!(message));
        }
        let exists = state.resources.iter().any(|r| {
            r.kind == kind && r.name == name && r.version.as_deref() == version
        });
        if exists {
            return Err(anyhow!(AwsError::AlreadyExists {
                message: format!("{name} already exists"),
            }));
        }

        let arn = match kind {
            ResourceKind::Component => format!("{}/1", arn(kind, name, version)),
            _ => arn(kind, name, version),
        };
        let mut tags = tags.clone();
        tags.insert(TAG_TOOL.to_string(), TAG_TOOL_VALUE.to_string());
        state.resources.push(ResourceSummary {
            kind,
            name: name.to_string(),
            version: version.map(str::to_string),
            arn: arn.clone(),
            tags,
        });
        Ok(arn)
    }
}

impl ImageBuilderApi for FakeImageBuilder {
    fn region(&self) -> String {
        REGION.to_string()
    }

    async fn list_resources(&self, kind: ResourceKind, name: &str) -> Result<Vec<ResourceSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .resources
            .iter()
            .filter(|r| r.kind == kind && r.name == name)
            .cloned()
            .collect())
    }

    async fn list_managed(&self, kind: ResourceKind) -> Result<Vec<ResourceSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .resources
            .iter()
            .filter(|r| r.kind == kind && r.tags.contains_key(TAG_TOOL))
            .cloned()
            .collect())
    }

    async fn delete_resource(&self, kind: ResourceKind, arn: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.delete_attempts += 1;
        state.events.push(Event::Delete(kind, arn.to_string()));
        if state.fail_delete.contains(arn) {
            return Err(anyhow!("resource {arn} is in use"));
        }
        let before = state.resources.len();
        state.resources.retain(|r| r.arn != arn);
        if state.resources.len() == before {
            return Err(anyhow!(AwsError::NotFound {
                resource_type: "resource",
                resource_id: arn.to_string(),
            }));
        }
        Ok(())
    }

    async fn create_component(&self, request: &ComponentRequest) -> Result<String> {
        self.create(
            ResourceKind::Component,
            &request.name,
            Some(&request.version),
            &request.tags,
        )
    }

    async fn create_infrastructure_config(&self, request: &InfrastructureRequest) -> Result<String> {
        self.create(ResourceKind::InfrastructureConfig, &request.name, None, &request.tags)
    }

    async fn create_distribution_config(&self, request: &DistributionRequest) -> Result<String> {
        self.create(ResourceKind::DistributionConfig, &request.name, None, &request.tags)
    }

    async fn create_image_recipe(&self, request: &RecipeRequest) -> Result<String> {
        self.create(
            ResourceKind::Recipe,
            &request.name,
            Some(&request.version),
            &request.tags,
        )
    }

    async fn create_image_pipeline(&self, request: &PipelineRequest) -> Result<String> {
        self.create(ResourceKind::Pipeline, &request.name, None, &request.tags)
    }

    async fn start_pipeline_execution(&self, pipeline_arn: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Start(pipeline_arn.to_string()));
        Ok(IMAGE_BUILD_ARN.to_string())
    }

    async fn get_image(&self, _image_build_arn: &str) -> Result<ImageSnapshot> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Poll);
        let next = if state.statuses.len() > 1 {
            state.statuses.pop_front()
        } else {
            state.statuses.front().cloned()
        };
        match next {
            Some(Ok(snapshot)) => Ok(snapshot),
            Some(Err(_)) => Err(anyhow!(AwsError::Throttled)),
            None => Ok(status("BUILDING")),
        }
    }

    async fn list_workflow_steps(&self, _image_build_arn: &str) -> Result<Vec<WorkflowStepLog>> {
        Ok(self.state.lock().unwrap().workflow_steps.clone())
    }

    async fn tail_build_logs(&self, log_group: &str, next_token: Option<String>) -> Result<LogPage> {
        let mut state = self.state.lock().unwrap();
        state
            .tail_calls
            .push((log_group.to_string(), next_token.clone()));
        Ok(state.log_pages.pop_front().unwrap_or(LogPage {
            events: Vec::new(),
            next_token,
        }))
    }

    fn classify(&self, error: &anyhow::Error) -> ErrorClass {
        classify_anyhow_error(error)
    }
}

/// In-memory EC2 image operations
#[derive(Default)]
pub struct FakeImages {
    state: Mutex<ImagesState>,
}

#[derive(Default)]
struct ImagesState {
    tag_calls: Vec<(Vec<String>, BTreeMap<String, String>)>,
    fail_tags: bool,
    build_instance: Option<BuildInstance>,
    instance_lookups: usize,
}

impl FakeImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_tags(&self) {
        self.state.lock().unwrap().fail_tags = true;
    }

    pub fn tag_calls(&self) -> Vec<(Vec<String>, BTreeMap<String, String>)> {
        self.state.lock().unwrap().tag_calls.clone()
    }

    /// Report a running build instance on every lookup
    pub fn set_build_instance(&self, instance_id: &str) {
        self.state.lock().unwrap().build_instance = Some(BuildInstance {
            instance_id: instance_id.to_string(),
            instance_type: "t3.medium".to_string(),
            state: "running".to_string(),
            state_reason: None,
            private_ip: None,
            availability_zone: None,
        });
    }

    pub fn instance_lookups(&self) -> usize {
        self.state.lock().unwrap().instance_lookups
    }
}

impl ImageApi for FakeImages {
    async fn create_tags(&self, resource_ids: &[String], tags: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.tag_calls.push((resource_ids.to_vec(), tags.clone()));
        if state.fail_tags {
            return Err(anyhow!("UnauthorizedOperation: not allowed to tag"));
        }
        Ok(())
    }

    async fn share_image(&self, _image_id: &str, _account_ids: &[String]) -> Result<()> {
        Ok(())
    }

    async fn copy_image(&self, image_id: &str, _source_region: &str, _name: &str) -> Result<String> {
        Ok(format!("{image_id}-copied"))
    }

    async fn describe_image(&self, _image_id: &str) -> Result<Option<ImageInfo>> {
        Ok(Some(ImageInfo {
            state: "available".to_string(),
            snapshot_ids: Vec::new(),
        }))
    }

    async fn deregister_image(&self, _image_id: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_snapshot(&self, _snapshot_id: &str) -> Result<()> {
        Ok(())
    }

    async fn find_build_instance(&self, _image_name: &str) -> Result<Option<BuildInstance>> {
        let mut state = self.state.lock().unwrap();
        state.instance_lookups += 1;
        Ok(state.build_instance.clone())
    }
}
