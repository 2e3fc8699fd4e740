//! Image Builder component documents
//!
//! Each provisioner becomes one component with a single `build` phase step.
//! The document is emitted as JSON, which Image Builder accepts as YAML.

use amiforge_common::Platform;
use amiforge_common::spec::{Provisioner, ProvisionerKind};
use serde_json::json;

const SCHEMA_VERSION: &str = "1.0";

/// Render the component document for a provisioner.
///
/// Returns `None` when the provisioner carries nothing to execute.
pub fn render_document(name: &str, provisioner: &Provisioner, platform: Platform) -> Option<String> {
    let commands = commands_for(provisioner, platform);
    if commands.is_empty() {
        return None;
    }

    let action = match platform {
        Platform::Linux => "ExecuteBash",
        Platform::Windows => "ExecutePowerShell",
    };

    let document = json!({
        "name": name,
        "description": format!("{} provisioner", provisioner.kind),
        "schemaVersion": SCHEMA_VERSION,
        "phases": [{
            "name": "build",
            "steps": [{
                "name": "Provision",
                "action": action,
                "inputs": { "commands": commands },
            }],
        }],
    });
    Some(document.to_string())
}

fn commands_for(provisioner: &Provisioner, platform: Platform) -> Vec<String> {
    let body: Vec<String> = match provisioner.kind {
        ProvisionerKind::Shell => provisioner.inline.clone(),
        ProvisionerKind::Script | ProvisionerKind::Powershell => {
            let mut commands = provisioner.inline.clone();
            commands.extend(provisioner.scripts.iter().map(|path| match platform {
                Platform::Linux => format!("bash {path}"),
                Platform::Windows => format!("& '{path}'"),
            }));
            commands
        }
        ProvisionerKind::Ansible => match &provisioner.playbook_path {
            Some(playbook) => {
                let mut command = format!("ansible-playbook {playbook}");
                for (key, value) in &provisioner.extra_vars {
                    command.push_str(&format!(" -e {key}={value}"));
                }
                vec![command]
            }
            None => Vec::new(),
        },
    };
    if body.is_empty() {
        return body;
    }

    let mut commands = Vec::with_capacity(body.len() + provisioner.environment.len() + 1);
    for (key, value) in &provisioner.environment {
        commands.push(match platform {
            Platform::Linux => format!("export {key}='{value}'"),
            Platform::Windows => format!("$env:{key} = '{value}'"),
        });
    }
    if let Some(dir) = &provisioner.working_dir {
        commands.push(match platform {
            Platform::Linux => format!("cd {dir}"),
            Platform::Windows => format!("Set-Location '{dir}'"),
        });
    }
    commands.extend(body);
    commands
}
