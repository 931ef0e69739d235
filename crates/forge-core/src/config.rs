//! forge.toml configuration parser.
//!
//! A single `ForgeConfig` value is loaded once by the binary and handed to
//! every component at construction time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root for cluster workspaces (`{base_dir}/clusters/cluster_{id}`).
    pub base_dir: PathBuf,
    /// Object storage bucket holding bootstrap scripts and job logs.
    pub bucket: String,
    /// Cloud project the orchestrator itself runs in.
    pub project_id: String,
    /// Shared command-and-control topic name.
    #[serde(default = "default_c2_topic")]
    pub c2_topic: String,
    /// Directory with `bootstrap_{role}.sh` templates overriding the built-ins.
    pub templates_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub blueprint_compiler: Option<PathBuf>,
    pub terraform: Option<PathBuf>,
    pub ssh_keygen: Option<PathBuf>,
    pub gcloud: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    pub path: Option<PathBuf>,
}

fn default_c2_topic() -> String {
    "forge-c2".to_string()
}

impl ForgeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ForgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal forge.toml.
    pub fn scaffold(base_dir: &Path, bucket: &str, project_id: &str) -> Self {
        ForgeConfig {
            server: ServerConfig {
                base_dir: base_dir.to_path_buf(),
                bucket: bucket.to_string(),
                project_id: project_id.to_string(),
                c2_topic: default_c2_topic(),
                templates_dir: None,
            },
            tools: ToolsConfig {
                blueprint_compiler: None,
                terraform: Some(PathBuf::from("terraform")),
                ssh_keygen: Some(PathBuf::from("ssh-keygen")),
                gcloud: Some(PathBuf::from("gcloud")),
            },
            state: StateConfig { path: None },
        }
    }

    /// Directory holding all cluster workspaces.
    pub fn clusters_dir(&self) -> PathBuf {
        self.server.base_dir.join("clusters")
    }

    /// Workspace directory for a single cluster.
    pub fn cluster_dir(&self, cluster_id: &str) -> PathBuf {
        self.clusters_dir().join(format!("cluster_{cluster_id}"))
    }

    /// The blueprint compiler binary. Defaults to `ghpc` next to `base_dir`.
    pub fn blueprint_compiler(&self) -> PathBuf {
        match &self.tools.blueprint_compiler {
            Some(path) => path.clone(),
            None => self
                .server
                .base_dir
                .parent()
                .unwrap_or(&self.server.base_dir)
                .join("ghpc"),
        }
    }

    pub fn terraform(&self) -> PathBuf {
        self.tools
            .terraform
            .clone()
            .unwrap_or_else(|| PathBuf::from("terraform"))
    }

    pub fn ssh_keygen(&self) -> PathBuf {
        self.tools
            .ssh_keygen
            .clone()
            .unwrap_or_else(|| PathBuf::from("ssh-keygen"))
    }

    pub fn gcloud(&self) -> PathBuf {
        self.tools
            .gcloud
            .clone()
            .unwrap_or_else(|| PathBuf::from("gcloud"))
    }

    /// Path of the redb entity store.
    pub fn state_path(&self) -> PathBuf {
        self.state
            .path
            .clone()
            .unwrap_or_else(|| self.server.base_dir.join("forge.redb"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold_round_trips_through_toml() {
        let config = ForgeConfig::scaffold(Path::new("/srv/forge"), "forge-bucket", "proj-a");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("forge-bucket"));

        let parsed: ForgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.project_id, "proj-a");
        assert_eq!(parsed.server.c2_topic, "forge-c2");
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[server]
base_dir = "/srv/forge/data"
bucket = "b"
project_id = "p"
"#;
        let config: ForgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.c2_topic, "forge-c2");
        assert_eq!(config.blueprint_compiler(), PathBuf::from("/srv/forge/ghpc"));
        assert_eq!(config.terraform(), PathBuf::from("terraform"));
        assert_eq!(config.state_path(), PathBuf::from("/srv/forge/data/forge.redb"));
    }

    #[test]
    fn test_cluster_dir_is_scoped_by_id() {
        let config = ForgeConfig::scaffold(Path::new("/srv/forge"), "b", "p");
        assert_eq!(
            config.cluster_dir("7"),
            PathBuf::from("/srv/forge/clusters/cluster_7")
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forge.toml");
        let config = ForgeConfig::scaffold(dir.path(), "bucket-x", "proj-x");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = ForgeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.server.bucket, "bucket-x");
    }
}
