//! Remediation guidance for failed build stages
//!
//! Errors are classified by message text; the hint is attached as an
//! `anyhow` context so the original cause stays in the chain.

use crate::error::BuildError;
use std::fmt;

/// Stage context and hint attached to a failed stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remediation {
    pub context: String,
    pub hint: Option<&'static str>,
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hint {
            Some(hint) => write!(f, "{}\n  Hint: {}", self.context, hint),
            None => f.write_str(&self.context),
        }
    }
}

const RULES: &[(&[&str], &str)] = &[
    (
        &["already exists"],
        "Re-run with --force to replace the existing resources, or use a different build name",
    ),
    (
        &["instance profile", "instanceprofile"],
        "Create an instance profile with the EC2InstanceProfileForImageBuilder and \
         AmazonSSMManagedInstanceCore policies and set it on the target",
    ),
    (
        &["security group"],
        "Check that the security groups exist in the subnet's VPC and allow outbound HTTPS",
    ),
    (
        &["subnet"],
        "Check that the subnet exists in the build region and has outbound internet access",
    ),
    (
        &["ami not found", "parent image", "invalidamiid"],
        "Check that the base image exists in the build region and is shared with this account",
    ),
    (
        &["instance type", "instancetype"],
        "Choose an instance type offered in the build region that matches the image architecture",
    ),
    (
        &["access denied", "accessdenied", "unauthorized", "not authorized"],
        "Check that your credentials allow imagebuilder:* and the EC2 image operations",
    ),
    (
        &["version"],
        "Use a MAJOR.MINOR.PATCH version, or bump it to one that is not yet registered",
    ),
    (
        &["limit", "quota"],
        "Request a service quota increase or delete unused Image Builder resources",
    ),
    (
        &["pipeline failed", "image build failed"],
        "Inspect the image build logs in the Image Builder console",
    ),
    (
        &["region"],
        "Check that Image Builder is available in the region and the region name is valid",
    ),
];

/// Find a remediation hint for an error message
pub fn hint_for(message: &str) -> Option<&'static str> {
    let message = message.to_lowercase();
    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| message.contains(n)))
        .map(|(_, hint)| *hint)
}

/// Attach stage context and a remediation hint to an error.
pub fn remediate(error: anyhow::Error, context: impl Into<String>) -> anyhow::Error {
    let hint = hint_for(&format!("{error:#}"));
    error.context(Remediation {
        context: context.into(),
        hint,
    })
}

/// The remediation attached to an error, if any
pub fn remediation_of(error: &anyhow::Error) -> Option<&Remediation> {
    error.downcast_ref::<Remediation>()
}

/// Check the prerequisites a build cannot start without.
///
/// Reports every missing prerequisite at once.
pub fn validate_prerequisites(
    region: Option<&str>,
    instance_profile: Option<&str>,
    parent_image: Option<&str>,
) -> Result<(), BuildError> {
    let missing: Vec<&str> = [
        ("region", region),
        ("instance profile", instance_profile),
        ("parent image", parent_image),
    ]
    .into_iter()
    .filter(|(_, value)| value.is_none_or(|v| v.trim().is_empty()))
    .map(|(name, _)| name)
    .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(BuildError::Validation(format!(
            "missing prerequisites: {}",
            missing.join(", ")
        )))
    }
}
