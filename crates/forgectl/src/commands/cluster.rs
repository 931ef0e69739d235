use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use forge_state::{Cluster, MountPoint, Partition, SharedFilesystem, SubnetRef};

use super::{load_config, open_lifecycle, open_store};

/// Cluster definition as written by operators.
#[derive(Debug, Deserialize)]
struct ClusterFile {
    id: String,
    name: String,
    cloud_id: String,
    region: String,
    zone: String,
    subnet: SubnetRef,
    #[serde(default = "default_login_nodes")]
    num_login_nodes: u32,
    spack_dir: Option<String>,
    credential: Option<String>,
    shared_fs: Option<SharedFilesystem>,
    #[serde(default)]
    mount_points: Vec<MountPoint>,
    #[serde(default)]
    partitions: Vec<Partition>,
}

fn default_login_nodes() -> u32 {
    1
}

impl ClusterFile {
    fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn into_cluster(self, now: u64) -> Cluster {
        let mut cluster = Cluster::new(
            &self.id,
            &self.name,
            &self.cloud_id,
            &self.region,
            &self.zone,
            self.subnet,
        );
        cluster.num_login_nodes = self.num_login_nodes;
        if let Some(spack_dir) = self.spack_dir {
            cluster.spack_dir = spack_dir;
        }
        cluster.cloud_credential = self.credential;
        cluster.shared_fs = self.shared_fs;
        cluster.mount_points = self.mount_points;
        cluster.partitions = self.partitions;
        cluster.created_at = now;
        cluster.updated_at = now;
        cluster
    }
}

pub fn import(config_path: &Path, file: &Path) -> anyhow::Result<()> {
    let definition = ClusterFile::parse(&std::fs::read_to_string(file)?)?;
    let lifecycle = open_lifecycle(config_path)?;

    if lifecycle.store().get_cluster(&definition.id)?.is_some() {
        let id = definition.id.clone();
        lifecycle.reconfigure(&id, definition.mount_points, definition.partitions)?;
        println!("✓ Replaced layout of cluster {id}");
        return Ok(());
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let cluster = definition.into_cluster(now);
    lifecycle.store().put_cluster(&cluster)?;
    println!("✓ Imported cluster {} ({})", cluster.id, cluster.name);
    Ok(())
}

pub fn status(config_path: &Path, id: &str, format: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let cluster = store.require_cluster(id)?;
    let instances = store.list_instances_for_cluster(id)?;

    match format {
        "json" => {
            let doc = serde_json::json!({ "cluster": cluster, "instances": instances });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        _ => {
            println!("cluster {} ({})", cluster.id, cluster.name);
            println!("  status:      {} [{}]", cluster.status, cluster.status.code());
            println!("  cloud state: {}", cluster.cloud_state);
            println!("  region:      {} / {}", cluster.cloud_region, cluster.cloud_zone);
            if let Some(controller) = &cluster.controller_node {
                println!("  controller:  {controller}");
            }
            if cluster.c2_degraded {
                println!("  c2 channel:  degraded (run repair-permissions)");
            }
            for instance in &instances {
                println!(
                    "  {:<24} {:<10} {:<16} {}",
                    instance.key,
                    instance.role.as_str(),
                    instance.address().unwrap_or("-"),
                    instance.instance_type.as_deref().unwrap_or("-"),
                );
            }
        }
    }
    Ok(())
}

pub fn render(config_path: &Path, id: &str) -> anyhow::Result<()> {
    let lifecycle = open_lifecycle(config_path)?;
    print!("{}", lifecycle.render_blueprint(id)?);
    Ok(())
}

pub fn list(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let clusters = store.list_clusters()?;
    if clusters.is_empty() {
        println!("no clusters");
    }
    for cluster in &clusters {
        println!(
            "{:<8} {:<20} {:<12} {}",
            cluster.id,
            cluster.name,
            cluster.status.to_string(),
            cluster.cloud_state
        );
    }
    Ok(())
}

pub fn remove(config_path: &Path, id: &str) -> anyhow::Result<()> {
    let lifecycle = open_lifecycle(config_path)?;
    lifecycle.remove(id)?;
    println!("✓ Removed cluster {id}");
    Ok(())
}
