//! Tag builders for Image Builder resources and EC2 images
//!
//! Image Builder takes tags as a plain string map while EC2 wants a list of
//! `Tag` values, so both shapes are produced from the same inputs here.

use amiforge_common::spec::ProvisionerKind;
use amiforge_common::tags::{TAG_TYPE, TAG_VERSION, standard_tags};
use std::collections::{BTreeMap, HashMap};

/// Tags applied to every Image Builder resource created for a build.
/// `version` is set on versioned resources.
pub fn resource_tags(
    build_name: &str,
    build_id: &str,
    version: Option<&str>,
) -> HashMap<String, String> {
    let mut tags = standard_tags(build_name, build_id);
    if let Some(version) = version {
        tags.insert(TAG_VERSION.to_string(), version.to_string());
    }
    tags
}

/// Resource tags plus the provisioner kind the component was generated from.
pub fn component_tags(
    build_name: &str,
    build_id: &str,
    version: &str,
    kind: ProvisionerKind,
) -> HashMap<String, String> {
    let mut tags = resource_tags(build_name, build_id, Some(version));
    tags.insert(TAG_TYPE.to_string(), kind.as_str().to_string());
    tags
}

/// Tags applied to the produced AMI: the user's output tags layered over the
/// standard discovery tags.
pub fn image_tags(
    user_tags: &BTreeMap<String, String>,
    build_name: &str,
    build_id: &str,
) -> BTreeMap<String, String> {
    let mut tags: BTreeMap<String, String> =
        standard_tags(build_name, build_id).into_iter().collect();
    for (key, value) in user_tags {
        tags.insert(key.clone(), value.clone());
    }
    tags
}

/// Convert a tag map into EC2 `Tag` values.
pub fn ec2_tags(tags: &BTreeMap<String, String>) -> Vec<aws_sdk_ec2::types::Tag> {
    tags.iter()
        .map(|(key, value)| {
            aws_sdk_ec2::types::Tag::builder()
                .key(key)
                .value(value)
                .build()
        })
        .collect()
}
