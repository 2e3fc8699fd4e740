//! Platform detection from provisioners

use crate::spec::{Provisioner, ProvisionerKind};
use std::fmt;

/// Operating system family a component targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    #[default]
    Linux,
    Windows,
}

impl Platform {
    /// Detect the platform a provisioner runs on.
    ///
    /// PowerShell provisioners always target Windows. Ansible provisioners target
    /// Windows when `ansible_shell_type` is `powershell` or `cmd`. Everything else
    /// is Linux.
    pub fn of(provisioner: &Provisioner) -> Self {
        match provisioner.kind {
            ProvisionerKind::Powershell => Platform::Windows,
            ProvisionerKind::Ansible => {
                let windows_shell = provisioner
                    .extra_vars
                    .get("ansible_shell_type")
                    .is_some_and(|shell| {
                        shell.eq_ignore_ascii_case("powershell") || shell.eq_ignore_ascii_case("cmd")
                    });
                if windows_shell {
                    Platform::Windows
                } else {
                    Platform::Linux
                }
            }
            ProvisionerKind::Shell | ProvisionerKind::Script => Platform::Linux,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Linux => "Linux",
            Platform::Windows => "Windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
