//! Resolve a build spec and configuration into concrete resource settings
//!
//! Everything that can be checked without talking to the provider is checked
//! here, so a malformed spec fails before any resource exists.

use crate::aws::component::render_document;
use crate::aws::imagebuilder::{BlockDevice, parse_volume_type};
use crate::config::BuilderConfig;
use crate::error::BuildError;
use crate::orchestrator::remediation::validate_prerequisites;
use amiforge_common::spec::ProvisionerKind;
use amiforge_common::version::normalize;
use amiforge_common::{BuildSpec, FastLaunch, Platform, ResourceNames, SemanticVersion, normalize_ami_name};
use garde::Validate;
use std::collections::BTreeMap;

/// One provisioner, ready to become a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentPlan {
    /// Position in the spec's provisioner list
    pub index: usize,
    pub name: String,
    pub kind: ProvisionerKind,
    pub platform: Platform,
    /// Requested version; force-recreate may advance it
    pub version: SemanticVersion,
    pub document: String,
}

/// A validated build spec with every default applied
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub build_name: String,
    pub names: ResourceNames,
    pub version: SemanticVersion,
    pub region: String,
    pub instance_type: String,
    pub instance_profile: String,
    pub subnet_id: Option<String>,
    pub security_group_ids: Vec<String>,
    pub parent_image: String,
    pub ami_name: String,
    pub ami_tags: BTreeMap<String, String>,
    /// Only set when fast launch is enabled
    pub fast_launch: Option<FastLaunch>,
    pub block_device: BlockDevice,
    pub components: Vec<ComponentPlan>,
}

impl BuildPlan {
    /// Validate `spec` and resolve it against `config`.
    ///
    /// `client_region` is used when the target names no region.
    pub fn resolve(
        spec: &BuildSpec,
        config: &BuilderConfig,
        client_region: &str,
    ) -> Result<Self, BuildError> {
        spec.validate()
            .map_err(|report| BuildError::Validation(report.to_string()))?;
        let target = spec
            .ami_target()
            .map_err(|e| BuildError::Validation(e.to_string()))?;
        let version = spec
            .semantic_version()
            .map_err(|e| BuildError::Validation(e.to_string()))?;

        let region = non_empty(target.region.as_deref()).or(non_empty(Some(client_region)));
        let instance_profile = non_empty(target.instance_profile.as_deref())
            .or(non_empty(config.defaults.instance_profile.as_deref()));
        let parent_image = non_empty(spec.base_image.as_deref())
            .or(non_empty(config.defaults.parent_image.as_deref()));
        validate_prerequisites(region, instance_profile, parent_image)?;
        let (Some(region), Some(instance_profile), Some(parent_image)) =
            (region, instance_profile, parent_image)
        else {
            return Err(BuildError::Validation("missing prerequisites".to_string()));
        };

        if spec.provisioners.is_empty() {
            return Err(BuildError::Validation(
                "at least one provisioner is required".to_string(),
            ));
        }

        let names = ResourceNames::new(&spec.name, config.name_prefix());
        let mut components = Vec::with_capacity(spec.provisioners.len());
        for (index, provisioner) in spec.provisioners.iter().enumerate() {
            let component_version = match provisioner.component_version.as_deref() {
                Some(v) => normalize(v).map_err(|e| {
                    BuildError::Validation(format!("provisioner {index}: {e}"))
                })?,
                None => version,
            };
            let platform = Platform::of(provisioner);
            let name = names.component(index, provisioner.kind);
            let document = render_document(&name, provisioner, platform).ok_or_else(|| {
                BuildError::Validation(format!(
                    "provisioner {index} ({}) has nothing to run",
                    provisioner.kind
                ))
            })?;
            components.push(ComponentPlan {
                index,
                name,
                kind: provisioner.kind,
                platform,
                version: component_version,
                document,
            });
        }

        let instance_type = non_empty(target.instance_type.as_deref())
            .unwrap_or(&config.defaults.instance_type)
            .to_string();
        let volume_type = parse_volume_type(&config.defaults.volume_type)
            .as_str()
            .to_string();

        Ok(Self {
            build_name: spec.name.clone(),
            version,
            region: region.to_string(),
            instance_type,
            instance_profile: instance_profile.to_string(),
            subnet_id: non_empty(target.subnet_id.as_deref()).map(str::to_string),
            security_group_ids: target.security_group_ids.clone(),
            parent_image: parent_image.to_string(),
            ami_name: normalize_ami_name(target.ami_name.as_deref(), names.base()),
            ami_tags: target.ami_tags.clone(),
            fast_launch: target.fast_launch.filter(|fl| fl.enabled),
            block_device: BlockDevice {
                device_name: config.defaults.device_name.clone(),
                volume_size: target.volume_size.unwrap_or(config.defaults.volume_size),
                volume_type,
            },
            components,
            names,
        })
    }

    pub fn version_string(&self) -> String {
        self.version.to_string()
    }

    /// Platform of the image, Windows if any component targets Windows
    pub fn platform(&self) -> Platform {
        if self.components.iter().any(|c| c.platform == Platform::Windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
