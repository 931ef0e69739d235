//! Well-known file and object locations shared by the provisioning crates.

use std::fmt;
use std::path::{Path, PathBuf};

/// Blueprint file written at the workspace root.
pub const BLUEPRINT_FILE: &str = "cluster.yaml";

/// Credential blob written at the workspace root.
pub const CREDENTIALS_FILE: &str = "cloud_credentials";

/// Environment variable pointing infrastructure commands at the credential file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Infrastructure state snapshot inside the engine directory.
pub const TF_STATE_FILE: &str = "terraform.tfstate";

/// Node roles that receive a bootstrap script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapRole {
    Controller,
    Login,
    Compute,
}

impl BootstrapRole {
    pub const ALL: [BootstrapRole; 3] = [
        BootstrapRole::Controller,
        BootstrapRole::Login,
        BootstrapRole::Compute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapRole::Controller => "controller",
            BootstrapRole::Login => "login",
            BootstrapRole::Compute => "compute",
        }
    }

    /// Template / object file name (`bootstrap_{role}.sh`).
    pub fn file_name(&self) -> String {
        format!("bootstrap_{}.sh", self.as_str())
    }

    /// Object path of the published script for a cluster.
    pub fn object_path(&self, cluster_id: &str) -> String {
        format!("clusters/{cluster_id}/{}", self.file_name())
    }
}

impl fmt::Display for BootstrapRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory the blueprint compiler emits the infrastructure module into.
pub fn engine_dir(workspace: &Path, cloud_id: &str) -> PathBuf {
    workspace.join(cloud_id).join("primary")
}
