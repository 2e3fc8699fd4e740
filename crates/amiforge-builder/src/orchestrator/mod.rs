//! Build orchestration
//!
//! The orchestrator drives one build attempt end to end: components, then the
//! infrastructure and distribution configs, the recipe and the pipeline, then
//! the image build itself. Every resource created along the way is recorded in
//! a [`CreatedResources`] ledger so a failed attempt can be rolled back.

pub mod build;
pub mod ledger;
pub mod plan;
pub mod remediation;

pub use ledger::CreatedResources;
pub use plan::{BuildPlan, ComponentPlan};
pub use remediation::{Remediation, remediate, remediation_of, validate_prerequisites};

use crate::aws::{ImageApi, ImageBuilderApi};
use crate::config::BuilderConfig;
use crate::executor::BatchExecutor;
use crate::pipeline::PipelineRunner;
use crate::resources::ResourceManager;
use std::fmt;
use std::sync::Arc;

/// Stages of a build attempt that can fail after resources start to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Components,
    Configurations,
    Recipe,
    Pipeline,
    Execution,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStage::Components => "creating components",
            BuildStage::Configurations => "creating infrastructure and distribution configurations",
            BuildStage::Recipe => "creating the image recipe",
            BuildStage::Pipeline => "creating the image pipeline",
            BuildStage::Execution => "running the image build",
        })
    }
}

/// Drives build attempts against an Image Builder client and an EC2 image client
pub struct Orchestrator<C, E> {
    client: Arc<C>,
    images: Arc<E>,
    resources: ResourceManager<C>,
    pipeline: PipelineRunner<C>,
    executor: BatchExecutor,
    config: BuilderConfig,
}

impl<C: ImageBuilderApi, E: ImageApi> Orchestrator<C, E> {
    pub fn new(client: Arc<C>, images: Arc<E>, config: BuilderConfig) -> Self {
        let executor = BatchExecutor::new(config.concurrency());
        let resources = ResourceManager::new(Arc::clone(&client), executor)
            .with_force_recreate(config.force_recreate());
        let pipeline = PipelineRunner::new(Arc::clone(&client), config.poll_config());
        Self {
            client,
            images,
            resources,
            pipeline,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn resources(&self) -> &ResourceManager<C> {
        &self.resources
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn images(&self) -> &E {
        &self.images
    }
}
