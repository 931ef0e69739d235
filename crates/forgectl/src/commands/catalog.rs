use std::path::Path;

use tracing::warn;

use forge_state::{CloudCredential, InstanceType, project_id_from_detail};

use super::{load_config, open_store};

pub fn add_credential(config_path: &Path, id: &str, file: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    let detail = std::fs::read_to_string(file)?;
    serde_json::from_str::<serde_json::Value>(&detail)
        .map_err(|e| anyhow::anyhow!("{} is not a JSON credential: {e}", file.display()))?;
    match project_id_from_detail(&detail) {
        Some(project) => println!("credential {id} (project {project})"),
        None => warn!(credential = id, "credential has no project_id"),
    }

    store.put_credential(&CloudCredential {
        id: id.to_string(),
        detail,
    })?;
    println!("✓ Stored credential {id}");
    Ok(())
}

pub fn add_instance_type(
    config_path: &Path,
    name: &str,
    cpus: Option<u32>,
    memory_mb: Option<u64>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    store.put_instance_type(&InstanceType {
        name: name.to_string(),
        cpus,
        memory_mb,
    })?;
    println!("✓ Registered instance type {name}");
    Ok(())
}
