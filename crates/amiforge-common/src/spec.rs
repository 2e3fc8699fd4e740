//! Build spec shared between the CLI and the orchestrator
//!
//! The CLI deserializes this from a JSON file and the orchestrator consumes it.
//! Structural validation is done via `garde::Validate`; semantic checks that need
//! the whole spec (exactly one AMI target, well-formed versions) live in
//! [`BuildSpec::ami_target`] and [`BuildSpec::semantic_version`].

use crate::defaults::{DEFAULT_FAST_LAUNCH_MAX_PARALLEL, DEFAULT_FAST_LAUNCH_TARGET_RESOURCES};
use crate::version::{self, SemanticVersion, VersionError};
use anyhow::{Context, Result};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Target kind that produces a machine image
pub const AMI_TARGET: &str = "ami";

/// Semantic problems with an otherwise well-formed spec
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("no AMI target found in build spec")]
    NoImageTarget,

    #[error("build spec has {0} AMI targets, expected exactly one")]
    MultipleImageTargets(usize),

    #[error(transparent)]
    Version(#[from] VersionError),
}

/// A build spec: what to build and where
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BuildSpec {
    /// Build name, the root of every resource name
    #[garde(length(min = 1, max = 100), pattern(r"^[A-Za-z0-9][A-Za-z0-9._-]*$"))]
    pub name: String,

    /// Semantic version of the build (empty or "latest" means 1.0.0)
    #[serde(default)]
    #[garde(skip)]
    pub version: String,

    /// Parent image (AMI ID or Image Builder image ARN)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub base_image: Option<String>,

    /// Provisioning steps, one component each
    #[serde(default)]
    #[garde(dive)]
    pub provisioners: Vec<Provisioner>,

    /// Deployment targets
    #[garde(length(min = 1), dive)]
    pub targets: Vec<Target>,
}

impl BuildSpec {
    /// Load a build spec from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build spec: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid build spec: {}", path.display()))
    }

    /// Parse and structurally validate a build spec
    pub fn from_json(content: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(content).context("Failed to parse build spec")?;
        spec.validate()?;
        Ok(spec)
    }

    /// The single AMI target of this spec
    pub fn ami_target(&self) -> Result<&Target, SpecError> {
        let mut amis = self.targets.iter().filter(|t| t.kind == AMI_TARGET);
        match (amis.next(), amis.count()) {
            (None, _) => Err(SpecError::NoImageTarget),
            (Some(target), 0) => Ok(target),
            (Some(_), rest) => Err(SpecError::MultipleImageTargets(rest + 1)),
        }
    }

    /// The normalized build version
    pub fn semantic_version(&self) -> Result<SemanticVersion, SpecError> {
        Ok(version::normalize(&self.version)?)
    }
}

/// A deployment target
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Target {
    /// Target kind ("ami" is the only kind this tool builds)
    #[serde(rename = "type")]
    #[garde(length(min = 1))]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub instance_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub instance_profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub subnet_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[garde(skip)]
    pub security_group_ids: Vec<String>,

    /// Output AMI name template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub ami_name: Option<String>,

    /// Tags applied to the produced AMI
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[garde(skip)]
    pub ami_tags: BTreeMap<String, String>,

    /// Root volume size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1))]
    pub volume_size: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub fast_launch: Option<FastLaunch>,
}

/// Windows fast launch settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FastLaunch {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_parallel_launches: Option<i32>,
    #[serde(default)]
    pub target_resource_count: Option<i32>,
}

impl FastLaunch {
    /// Parallel launches, falling back to the provider default when unset or zero
    pub fn max_parallel_launches(&self) -> i32 {
        self.max_parallel_launches
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_FAST_LAUNCH_MAX_PARALLEL)
    }

    /// Pre-provisioned snapshots, falling back to the provider default when unset or zero
    pub fn target_resource_count(&self) -> i32 {
        self.target_resource_count
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_FAST_LAUNCH_TARGET_RESOURCES)
    }
}

/// Kind of provisioning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionerKind {
    Shell,
    Script,
    Ansible,
    Powershell,
}

impl ProvisionerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionerKind::Shell => "shell",
            ProvisionerKind::Script => "script",
            ProvisionerKind::Ansible => "ansible",
            ProvisionerKind::Powershell => "powershell",
        }
    }
}

impl fmt::Display for ProvisionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioning step, compiled into one Image Builder component
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Provisioner {
    #[serde(rename = "type")]
    #[garde(skip)]
    pub kind: ProvisionerKind,

    /// Inline commands (shell, powershell)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[garde(skip)]
    pub inline: Vec<String>,

    /// Script paths (script, powershell)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[garde(skip)]
    pub scripts: Vec<String>,

    /// Playbook path (ansible)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub playbook_path: Option<String>,

    /// Extra variables (ansible)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[garde(skip)]
    pub extra_vars: BTreeMap<String, String>,

    /// Environment for inline commands
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[garde(skip)]
    pub environment: BTreeMap<String, String>,

    /// Explicit component version, overriding the build version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub component_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub working_dir: Option<String>,
}

impl Provisioner {
    /// A provisioner of the given kind with no content
    pub fn new(kind: ProvisionerKind) -> Self {
        Self {
            kind,
            inline: Vec::new(),
            scripts: Vec::new(),
            playbook_path: None,
            extra_vars: BTreeMap::new(),
            environment: BTreeMap::new(),
            component_version: None,
            working_dir: None,
        }
    }
}

/// Outcome of a successful build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub ami_id: String,
    pub region: String,
    pub build_id: String,
    pub duration: Duration,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "name": "web",
        "version": "1.2.0",
        "base_image": "ami-0123456789abcdef0",
        "provisioners": [
            {"type": "shell", "inline": ["echo hi"]},
            {"type": "ansible", "playbook_path": "site.yml", "extra_vars": {"ansible_shell_type": "powershell"}}
        ],
        "targets": [
            {"type": "ami", "region": "us-west-2", "instance_profile": "builder",
             "fast_launch": {"enabled": true}}
        ]
    }"#;

    #[test]
    fn parse_minimal_spec() {
        let spec = BuildSpec::from_json(MINIMAL).unwrap();
        assert_eq!(spec.name, "web");
        assert_eq!(spec.provisioners.len(), 2);
        assert_eq!(spec.provisioners[1].kind, ProvisionerKind::Ansible);
        let target = spec.ami_target().unwrap();
        assert_eq!(target.region.as_deref(), Some("us-west-2"));
        assert_eq!(spec.semantic_version().unwrap().to_string(), "1.2.0");
    }

    #[test]
    fn fast_launch_defaults_when_unset() {
        let spec = BuildSpec::from_json(MINIMAL).unwrap();
        let fl = spec.ami_target().unwrap().fast_launch.unwrap();
        assert!(fl.enabled);
        assert_eq!(fl.max_parallel_launches(), 6);
        assert_eq!(fl.target_resource_count(), 5);

        let explicit = FastLaunch {
            enabled: true,
            max_parallel_launches: Some(10),
            target_resource_count: Some(0),
        };
        assert_eq!(explicit.max_parallel_launches(), 10);
        assert_eq!(explicit.target_resource_count(), 5);
    }

    #[test]
    fn rejects_unknown_provisioner_kind() {
        let json = r#"{"name": "x", "provisioners": [{"type": "chef"}], "targets": [{"type": "ami"}]}"#;
        assert!(BuildSpec::from_json(json).is_err());
    }

    #[test]
    fn rejects_empty_name_and_targets() {
        assert!(BuildSpec::from_json(r#"{"name": "", "targets": [{"type": "ami"}]}"#).is_err());
        assert!(BuildSpec::from_json(r#"{"name": "x", "targets": []}"#).is_err());
        assert!(BuildSpec::from_json(r#"{"name": "has space", "targets": [{"type": "ami"}]}"#).is_err());
    }

    #[test]
    fn ami_target_cardinality() {
        let none = BuildSpec::from_json(r#"{"name": "x", "targets": [{"type": "container"}]}"#)
            .unwrap();
        assert!(matches!(none.ami_target(), Err(SpecError::NoImageTarget)));

        let two = BuildSpec::from_json(
            r#"{"name": "x", "targets": [{"type": "ami"}, {"type": "container"}, {"type": "ami"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            two.ami_target(),
            Err(SpecError::MultipleImageTargets(2))
        ));
    }

    #[test]
    fn malformed_version_is_rejected() {
        let spec = BuildSpec::from_json(
            r#"{"name": "x", "version": "v1.2.3", "targets": [{"type": "ami"}]}"#,
        )
        .unwrap();
        assert!(matches!(spec.semantic_version(), Err(SpecError::Version(_))));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let spec = BuildSpec::load(file.path()).unwrap();
        assert_eq!(spec.name, "web");
    }

    #[test]
    fn load_missing_file_mentions_path() {
        let err = BuildSpec::load(Path::new("/nonexistent/spec.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/spec.json"));
    }
}
