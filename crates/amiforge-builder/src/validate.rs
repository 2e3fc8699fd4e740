//! Read-only validation report for a build spec
//!
//! Used by `amiforge validate` before a build is attempted. Errors are the
//! problems that would stop the orchestrator; warnings and info describe what
//! the build would do. [`report_existing`] adds which of the build's
//! resources are already present in the account.

use crate::aws::ImageBuilderApi;
use crate::config::BuilderConfig;
use crate::orchestrator::BuildPlan;
use crate::resources::{ResourceCheck, ResourceManager};
use amiforge_common::{BuildSpec, Platform, ResourceKind};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
}

/// Validate `spec` against `config`, resolving defaults for `region`.
pub fn validate_spec(spec: &BuildSpec, config: &BuilderConfig, region: &str) -> ValidationReport {
    let mut report = ValidationReport::default();
    let plan = match BuildPlan::resolve(spec, config, region) {
        Ok(plan) => plan,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        }
    };

    if plan.subnet_id.is_none() {
        report
            .warnings
            .push("no subnet set, the build instance runs in the default VPC".to_string());
    }
    if !plan.security_group_ids.is_empty() && plan.subnet_id.is_none() {
        report
            .warnings
            .push("security groups are ignored without a subnet".to_string());
    }
    if plan.fast_launch.is_some() && plan.platform() != Platform::Windows {
        report
            .warnings
            .push("fast launch only applies to Windows images".to_string());
    }

    report.info.push(format!(
        "build '{}' version {} in {}",
        plan.build_name, plan.version, plan.region
    ));
    report.info.push(format!(
        "instance type {} with profile {}",
        plan.instance_type, plan.instance_profile
    ));
    report.info.push(format!("parent image {}", plan.parent_image));
    report.info.push(format!("AMI name {}", plan.ami_name));
    for component in &plan.components {
        report.info.push(format!(
            "component {} ({}, {}) at {}",
            component.name, component.kind, component.platform, component.version
        ));
    }

    report.valid = true;
    report
}

/// Note which of the build's resources already exist. A failed lookup reads
/// as absent; an invalid report is left untouched.
pub async fn report_existing<C: ImageBuilderApi>(
    report: &mut ValidationReport,
    spec: &BuildSpec,
    config: &BuilderConfig,
    region: &str,
    resources: &ResourceManager<C>,
    cancel: &CancellationToken,
) {
    if !report.valid {
        return;
    }
    let Ok(plan) = BuildPlan::resolve(spec, config, region) else {
        return;
    };

    let mut checks = vec![
        ResourceCheck::new(ResourceKind::InfrastructureConfig, plan.names.infrastructure()),
        ResourceCheck::new(ResourceKind::DistributionConfig, plan.names.distribution()),
        ResourceCheck::new(ResourceKind::Recipe, plan.names.recipe()),
        ResourceCheck::new(ResourceKind::Pipeline, plan.names.pipeline()),
    ];
    checks.extend(
        plan.components
            .iter()
            .map(|c| ResourceCheck::new(ResourceKind::Component, &c.name)),
    );
    let keys: Vec<String> = checks.iter().map(ResourceCheck::key).collect();
    let existence = resources.check_existence(checks, cancel).await;

    let existing: Vec<&String> = keys
        .iter()
        .filter(|key| existence.get(*key).copied().unwrap_or(false))
        .collect();
    if existing.is_empty() {
        report.info.push("no resources of this build exist yet".to_string());
        return;
    }
    for key in &existing {
        report.info.push(format!("{key} already exists"));
    }
    if config.force_recreate() {
        report.warnings.push(format!(
            "{} existing resource(s) would be deleted or re-versioned",
            existing.len()
        ));
    }
}
