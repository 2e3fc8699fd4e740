//! One build attempt, from validation to a tagged AMI

use super::ledger::CreatedResources;
use super::plan::{BuildPlan, ComponentPlan};
use super::remediation::remediate;
use super::{BuildStage, Orchestrator};
use crate::aws::imagebuilder::{
    ComponentRequest, DistributionRequest, InfrastructureRequest, PipelineRequest, RecipeRequest,
};
use crate::aws::tags::{component_tags, image_tags, resource_tags};
use crate::aws::{ImageApi, ImageBuilderApi};
use crate::error::BuildError;
use crate::executor::ErrorPolicy;
use crate::monitor::BuildMonitor;
use crate::pipeline::CompletedImage;
use crate::resources::{Provisioned, ResourceHandle};
use amiforge_common::{BuildResult, BuildSpec, ResourceKind, SemanticVersion, generate_build_id};
use anyhow::Result;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// What the build stages produced, for finalization
struct Built {
    image: CompletedImage,
    pipeline: ResourceHandle,
}

impl<C: ImageBuilderApi, E: ImageApi> Orchestrator<C, E> {
    /// Run one build attempt.
    ///
    /// A spec that fails validation is rejected before anything is created.
    /// Any later failure, including cancellation, rolls back the resources
    /// this attempt created and returns the cause with remediation context.
    #[instrument(skip_all, fields(build = %spec.name))]
    pub async fn build(&self, spec: &BuildSpec, cancel: &CancellationToken) -> Result<BuildResult> {
        let started = Instant::now();
        let plan = BuildPlan::resolve(spec, &self.config, &self.client.region())?;
        let build_id = generate_build_id();
        info!(
            build_id = %build_id,
            version = %plan.version,
            region = %plan.region,
            components = plan.components.len(),
            force_recreate = self.resources.force_recreate(),
            "Starting build"
        );

        let mut notes = Vec::new();
        if self.resources.force_recreate() {
            let report = self.resources.cleanup_build(&plan.names, cancel).await;
            if report.failed > 0 {
                notes.push(format!(
                    "pre-build cleanup could not remove {} resource(s)",
                    report.failed
                ));
            }
        }

        let mut ledger = CreatedResources::new();
        let mut stage = BuildStage::Components;
        let built = match self
            .run_stages(&plan, &build_id, &mut ledger, &mut stage, cancel)
            .await
        {
            Ok(built) => built,
            Err(error) => {
                warn!(stage = %stage, error = %format!("{error:#}"), "Build failed, rolling back");
                let report = ledger.rollback(self.client.as_ref(), &self.executor).await;
                let error = if report.failed > 0 {
                    error.context(format!(
                        "rollback left {} resource(s) behind",
                        report.failed
                    ))
                } else {
                    error
                };
                return Err(remediate(
                    error,
                    format!("Build '{}' failed while {stage}", plan.build_name),
                ));
            }
        };

        let kept = ledger.commit();
        info!(created = kept.len(), ami = %built.image.ami_id, "Build succeeded");
        self.finalize(&plan, &build_id, &built, &mut notes, cancel).await;

        Ok(BuildResult {
            ami_id: built.image.ami_id,
            region: built.image.region,
            build_id,
            duration: started.elapsed(),
            notes,
        })
    }

    /// Create everything and run the pipeline, recording creations as they happen.
    async fn run_stages(
        &self,
        plan: &BuildPlan,
        build_id: &str,
        ledger: &mut CreatedResources,
        stage: &mut BuildStage,
        cancel: &CancellationToken,
    ) -> Result<Built> {
        *stage = BuildStage::Components;
        let component_arns = self.create_components(plan, build_id, ledger, cancel).await?;

        *stage = BuildStage::Configurations;
        ensure_active(cancel)?;
        let (infrastructure_arn, distribution_arn) =
            self.create_configurations(plan, build_id, ledger).await?;

        *stage = BuildStage::Recipe;
        ensure_active(cancel)?;
        let version = plan.version_string();
        let recipe = RecipeRequest {
            name: plan.names.recipe(),
            description: format!("Image recipe for {}", plan.build_name),
            version: version.clone(),
            parent_image: plan.parent_image.clone(),
            component_arns,
            block_device: plan.block_device.clone(),
            tags: resource_tags(&plan.build_name, build_id, Some(&version)),
        };
        let recipe = self
            .resources
            .get_or_create(ResourceKind::Recipe, &recipe.name, Some(&version), || {
                self.client.create_image_recipe(&recipe)
            })
            .await?;
        ledger.record_provisioned(&recipe);

        *stage = BuildStage::Pipeline;
        ensure_active(cancel)?;
        let pipeline = PipelineRequest {
            name: plan.names.pipeline(),
            description: format!("Image pipeline for {}", plan.build_name),
            recipe_arn: recipe.handle.arn.clone(),
            infrastructure_arn,
            distribution_arn,
            tags: resource_tags(&plan.build_name, build_id, Some(&version)),
        };
        let pipeline = self
            .resources
            .get_or_create(ResourceKind::Pipeline, &pipeline.name, None, || {
                self.client.create_image_pipeline(&pipeline)
            })
            .await?;
        ledger.record_provisioned(&pipeline);

        *stage = BuildStage::Execution;
        ensure_active(cancel)?;
        let mut monitor = BuildMonitor::new(
            Arc::clone(&self.client),
            Arc::clone(&self.images),
            &self.config.monitor,
        );
        let image = self
            .pipeline
            .execute_observed(&pipeline.handle.arn, cancel, &mut monitor)
            .await?;
        Ok(Built {
            image,
            pipeline: pipeline.handle,
        })
    }

    /// Create every component concurrently, failing fast.
    ///
    /// Components that were created before a failure are still recorded.
    /// Returns the component ARNs in provisioner order.
    async fn create_components(
        &self,
        plan: &BuildPlan,
        build_id: &str,
        ledger: &mut CreatedResources,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let requested: Vec<(String, SemanticVersion)> = plan
            .components
            .iter()
            .map(|c| (c.name.clone(), c.version))
            .collect();
        let versions = self
            .resources
            .resolve_component_versions(&requested, cancel)
            .await?;
        let components: Vec<ComponentPlan> = plan
            .components
            .iter()
            .cloned()
            .zip(versions)
            .map(|(component, version)| ComponentPlan { version, ..component })
            .collect();

        let outcome = self
            .executor
            .run(
                "create components",
                components,
                ErrorPolicy::FailFast,
                cancel,
                |_, component| self.create_component(plan, build_id, component),
            )
            .await;

        let (mut created, error) = outcome.into_parts();
        for (_, provisioned) in &created {
            ledger.record_provisioned(provisioned);
        }
        if let Some(error) = error {
            return Err(error);
        }

        created.sort_by_key(|(index, _)| *index);
        Ok(created.into_iter().map(|(_, p)| p.handle.arn).collect())
    }

    async fn create_component(
        &self,
        plan: &BuildPlan,
        build_id: &str,
        component: ComponentPlan,
    ) -> Result<Provisioned> {
        let version = component.version.to_string();
        let request = ComponentRequest {
            tags: component_tags(&plan.build_name, build_id, &version, component.kind),
            description: format!(
                "{} provisioner {} for {}",
                component.kind, component.index, plan.build_name
            ),
            name: component.name,
            version,
            platform: component.platform,
            document: component.document,
        };
        self.resources.create_component(&request).await
    }

    /// Get or create the infrastructure and distribution configs concurrently.
    async fn create_configurations(
        &self,
        plan: &BuildPlan,
        build_id: &str,
        ledger: &mut CreatedResources,
    ) -> Result<(String, String)> {
        let infrastructure = InfrastructureRequest {
            name: plan.names.infrastructure(),
            description: format!("Build infrastructure for {}", plan.build_name),
            instance_types: vec![plan.instance_type.clone()],
            instance_profile: plan.instance_profile.clone(),
            subnet_id: plan.subnet_id.clone(),
            security_group_ids: plan.security_group_ids.clone(),
            tags: resource_tags(&plan.build_name, build_id, None),
        };
        let distribution = DistributionRequest {
            name: plan.names.distribution(),
            description: format!("Distribution for {}", plan.build_name),
            region: plan.region.clone(),
            ami_name: plan.ami_name.clone(),
            ami_tags: plan.ami_tags.clone().into_iter().collect(),
            fast_launch: plan.fast_launch,
            tags: resource_tags(&plan.build_name, build_id, None),
        };

        let (infrastructure, distribution) = futures::future::join(
            self.resources.get_or_create(
                ResourceKind::InfrastructureConfig,
                &infrastructure.name,
                None,
                || self.client.create_infrastructure_config(&infrastructure),
            ),
            self.resources.get_or_create(
                ResourceKind::DistributionConfig,
                &distribution.name,
                None,
                || self.client.create_distribution_config(&distribution),
            ),
        )
        .await;

        for provisioned in [&infrastructure, &distribution].into_iter().flatten() {
            ledger.record_provisioned(provisioned);
        }
        Ok((infrastructure?.handle.arn, distribution?.handle.arn))
    }

    /// Tag the AMI, remove the pipeline and, after a forced rebuild, prune old
    /// component versions. Failures here do not fail the build.
    async fn finalize(
        &self,
        plan: &BuildPlan,
        build_id: &str,
        built: &Built,
        notes: &mut Vec<String>,
        cancel: &CancellationToken,
    ) {
        let tags = image_tags(&plan.ami_tags, &plan.build_name, build_id);
        if let Err(e) = self
            .images
            .create_tags(std::slice::from_ref(&built.image.ami_id), &tags)
            .await
        {
            warn!(ami = %built.image.ami_id, error = %format!("{e:#}"), "Failed to tag AMI");
            notes.push(format!("failed to tag {}: {e:#}", built.image.ami_id));
        }

        match self.resources.delete(&built.pipeline).await {
            Ok(()) => info!(pipeline = %built.pipeline.name, "Removed pipeline"),
            Err(e) => {
                warn!(pipeline = %built.pipeline.name, error = %format!("{e:#}"), "Failed to remove pipeline");
                notes.push(format!(
                    "pipeline {} was not removed: {e:#}",
                    built.pipeline.name
                ));
            }
        }

        if self.resources.force_recreate() {
            let keep = self.config.flags.keep_component_versions;
            for component in &plan.components {
                if let Err(e) = self
                    .resources
                    .cleanup_old_component_versions(&component.name, keep, cancel)
                    .await
                {
                    warn!(component = %component.name, error = %format!("{e:#}"), "Failed to prune component versions");
                    notes.push(format!(
                        "old versions of {} were not all removed: {e:#}",
                        component.name
                    ));
                }
            }
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(BuildError::Cancelled.into())
    } else {
        Ok(())
    }
}
