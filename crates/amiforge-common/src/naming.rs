//! Deterministic resource naming
//!
//! Every Image Builder resource name is derived from the build name so that a
//! repeated invocation with the same name finds what an earlier one created.

use crate::spec::ProvisionerKind;
use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt::Write;

/// The placeholder Image Builder expands into the build date
pub const BUILD_DATE_PLACEHOLDER: &str = "{{ imagebuilder:buildDate }}";

/// Names of all resources belonging to one build name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    base: String,
}

impl ResourceNames {
    /// Names for `build_name`, optionally prefixed with `{prefix}-`
    pub fn new(build_name: &str, prefix: Option<&str>) -> Self {
        let base = match prefix.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => format!("{p}-{build_name}"),
            None => build_name.to_string(),
        };
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn infrastructure(&self) -> String {
        format!("{}-infra", self.base)
    }

    pub fn distribution(&self) -> String {
        format!("{}-dist", self.base)
    }

    pub fn recipe(&self) -> String {
        format!("{}-recipe", self.base)
    }

    pub fn pipeline(&self) -> String {
        format!("{}-pipeline", self.base)
    }

    /// `{name}-{index}`, the per-provisioner component base name
    pub fn component_base(&self, index: usize) -> String {
        format!("{}-{index}", self.base)
    }

    /// `{name}-{index}-{kind}`, the name the component is registered under
    pub fn component(&self, index: usize, kind: ProvisionerKind) -> String {
        format!("{}-{kind}", self.component_base(index))
    }
}

/// Ensure an AMI name template carries the build-date placeholder Image Builder requires.
pub fn normalize_ami_name(template: Option<&str>, build_name: &str) -> String {
    let template = template.map(str::trim).unwrap_or_default();
    if template.is_empty() {
        return format!("{build_name}-{BUILD_DATE_PLACEHOLDER}");
    }

    let mut name = template.to_string();
    for alias in [
        "{{timestamp}}",
        "{{ timestamp }}",
        "{{imagebuilder:buildDate}}",
    ] {
        name = name.replace(alias, BUILD_DATE_PLACEHOLDER);
    }
    if !name.contains(BUILD_DATE_PLACEHOLDER) {
        name.push('-');
        name.push_str(BUILD_DATE_PLACEHOLDER);
    }
    name
}

/// Unique identifier for one build attempt: `YYYYmmdd-HHMMSS-xxxxxxxx`.
///
/// Falls back to the bare timestamp if the OS random source fails.
pub fn generate_build_id() -> String {
    build_id_with(|buf| OsRng.try_fill_bytes(buf).map_err(|_| ()))
}

fn build_id_with(fill: impl FnOnce(&mut [u8; 4]) -> Result<(), ()>) -> String {
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let mut bytes = [0u8; 4];
    if fill(&mut bytes).is_err() {
        return timestamp;
    }
    let mut id = timestamp;
    id.push('-');
    for b in bytes {
        let _ = write!(id, "{b:02x}");
    }
    id
}
