//! Build spec fixtures

use amiforge_common::BuildSpec;
use serde_json::json;

/// JSON for a valid spec with `provisioners` shell steps and one AMI target.
pub fn sample_spec_json(name: &str, provisioners: usize) -> String {
    let steps: Vec<_> = (0..provisioners)
        .map(|i| json!({"type": "shell", "inline": [format!("echo step {i}")]}))
        .collect();
    json!({
        "name": name,
        "version": "1.0.0",
        "base_image": "ami-0123456789abcdef0",
        "provisioners": steps,
        "targets": [{
            "type": "ami",
            "instance_profile": "amiforge-builder",
            "ami_tags": {"Environment": "test"}
        }]
    })
    .to_string()
}

/// A parsed and validated [`sample_spec_json`].
pub fn sample_spec(name: &str, provisioners: usize) -> BuildSpec {
    BuildSpec::from_json(&sample_spec_json(name, provisioners))
        .expect("sample spec is valid")
}
