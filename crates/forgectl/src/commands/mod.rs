pub mod catalog;
pub mod cluster;
pub mod init;
pub mod lifecycle;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use forge_core::ForgeConfig;
use forge_lifecycle::{CloudServices, ClusterLifecycle};
use forge_provision::ProcessRunner;
use forge_state::StateStore;

pub(crate) fn load_config(path: &Path) -> anyhow::Result<ForgeConfig> {
    ForgeConfig::from_file(path).with_context(|| format!("failed to load {}", path.display()))
}

pub(crate) fn open_store(config: &ForgeConfig) -> anyhow::Result<StateStore> {
    let path = config.state_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    StateStore::open(&path).with_context(|| format!("failed to open state store {}", path.display()))
}

/// Controller wired to the real toolchain and the `gcloud` CLI.
pub(crate) fn open_lifecycle(config_path: &Path) -> anyhow::Result<Arc<ClusterLifecycle>> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let cloud = CloudServices::gcloud(&config);
    let lifecycle = ClusterLifecycle::new(config, store, Arc::new(ProcessRunner), cloud)?;
    Ok(Arc::new(lifecycle))
}
