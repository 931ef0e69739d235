//! Blueprint generator: builds the blueprint for a cluster.
//!
//! `render` is a pure function of the cluster's network, mount points,
//! partitions and login-node count plus the credential's project id.
//! Resource ids are positional over the sorted mount points and the
//! partition list, so an unchanged cluster re-renders to identical text
//! and the infrastructure engine sees a no-op diff.

use std::path::{Path, PathBuf};

use forge_core::BootstrapRole;
use forge_core::layout::BLUEPRINT_FILE;
use forge_state::{CloudCredential, Cluster, MountPoint, Partition};
use serde_yaml::Value;
use tracing::debug;

use crate::error::{BlueprintError, BlueprintResult};
use crate::model::{Blueprint, BlueprintVars, Resource, ResourceGroup, Settings};

pub const NETWORK_ID: &str = "hpc_network";
pub const SERVICE_ACCOUNT_ID: &str = "hpc_service_account";
pub const CONTROLLER_ID: &str = "slurm_controller";
pub const LOGIN_ID: &str = "slurm_login";

/// Server address used for exports served by the cluster's own controller.
const CONTROLLER_ADDRESS: &str = "$controller";

const SERVICE_ACCOUNT_EMAIL: &str = "$(hpc_service_account.email)";

/// Capabilities granted to the node service account.
const SERVICE_ACCOUNT_ROLES: [&str; 7] = [
    "compute.instanceAdmin.v1",
    "iam.serviceAccountUser",
    "monitoring.metricWriter",
    "logging.logWriter",
    "storage.objectAdmin",
    "pubsub.publisher",
    "pubsub.subscriber",
];

const COMPUTE_SCOPES: [&str; 4] = [
    "https://www.googleapis.com/auth/monitoring.write",
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/devstorage.read_write",
    "https://www.googleapis.com/auth/pubsub",
];

const LOGIN_SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/monitoring.write",
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/devstorage.read_write",
];

mod source {
    pub const NETWORK: &str = "resources/network/pre-existing-vpc";
    pub const FILESYSTEM: &str = "resources/file-system/pre-existing-network-storage";
    pub const SERVICE_ACCOUNT: &str = "resources/project/service-account";
    pub const PARTITION: &str = "resources/third-party/compute/SchedMD-slurm-on-gcp-partition";
    pub const CONTROLLER: &str = "resources/third-party/scheduler/SchedMD-slurm-on-gcp-controller";
    pub const LOGIN: &str = "resources/third-party/scheduler/SchedMD-slurm-on-gcp-login-node";
}

/// Builds blueprints for clusters whose bootstrap scripts live in `bucket`.
#[derive(Debug, Clone)]
pub struct BlueprintGenerator {
    bucket: String,
}

impl BlueprintGenerator {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
        }
    }

    /// Build the typed blueprint for `cluster`.
    pub fn build(&self, cluster: &Cluster, credential: &CloudCredential) -> BlueprintResult<Blueprint> {
        let project_id = credential
            .project_id()
            .ok_or_else(|| BlueprintError::MissingCredential(cluster.id.clone()))?;

        let mut resources = vec![network_resource(cluster)];

        let mounts = cluster.ordered_mount_points();
        let mut fs_ids = Vec::with_capacity(mounts.len());
        for (index, mp) in mounts.into_iter().enumerate() {
            let resource = filesystem_resource(cluster, mp, index);
            fs_ids.push(resource.id.clone());
            resources.push(resource);
        }

        resources.push(service_account_resource(cluster, &project_id));

        let partition_uses = refs(&[NETWORK_ID], &fs_ids, &[]);
        let mut partition_ids = Vec::with_capacity(cluster.partitions.len());
        for (index, part) in cluster.partitions.iter().enumerate() {
            let resource = partition_resource(cluster, part, index, partition_uses.clone());
            partition_ids.push(resource.id.clone());
            resources.push(resource);
        }

        let mut controller_uses = refs(&[NETWORK_ID], &partition_ids, &[]);
        controller_uses.extend(fs_ids.iter().cloned());
        resources.push(self.controller_resource(cluster, controller_uses));

        let login_uses = refs(&[NETWORK_ID], &fs_ids, &[CONTROLLER_ID]);
        resources.push(self.login_resource(cluster, login_uses));

        debug!(
            cluster = %cluster.id,
            resources = resources.len(),
            "blueprint built"
        );

        Ok(Blueprint {
            blueprint_name: cluster.cloud_id.clone(),
            vars: BlueprintVars {
                project_id,
                deployment_name: cluster.cloud_id.clone(),
                region: cluster.cloud_region.clone(),
                zone: cluster.cloud_zone.clone(),
            },
            resource_groups: vec![ResourceGroup {
                group: "primary".to_string(),
                resources,
            }],
        })
    }

    /// Render the blueprint text for `cluster`.
    pub fn render(&self, cluster: &Cluster, credential: &CloudCredential) -> BlueprintResult<String> {
        Ok(self.build(cluster, credential)?.to_yaml()?)
    }

    /// Render and write the blueprint to the workspace root.
    pub fn write(
        &self,
        workspace: &Path,
        cluster: &Cluster,
        credential: &CloudCredential,
    ) -> BlueprintResult<PathBuf> {
        let text = self.render(cluster, credential)?;
        let path = workspace.join(BLUEPRINT_FILE);
        std::fs::write(&path, text)?;
        debug!(cluster = %cluster.id, path = %path.display(), "blueprint written");
        Ok(path)
    }

    fn startup_script(&self, cluster: &Cluster, role: BootstrapRole, banner: bool) -> String {
        let mut script = String::from("#!/bin/bash\n");
        if banner {
            script.push_str(&format!("echo \"**** CALLING {} STARTUP\"\n", role.as_str().to_uppercase()));
        }
        script.push_str(&format!(
            "gsutil cp gs://{}/{} - | bash\n",
            self.bucket,
            role.object_path(&cluster.id)
        ));
        script
    }

    fn controller_resource(&self, cluster: &Cluster, uses: Vec<String>) -> Resource {
        let settings = Settings::new()
            .set("login_node_count", cluster.num_login_nodes)
            .set("controller_service_account", SERVICE_ACCOUNT_EMAIL)
            .set(
                "controller_startup_script",
                self.startup_script(cluster, BootstrapRole::Controller, true),
            )
            .set("compute_node_service_account", SERVICE_ACCOUNT_EMAIL)
            .set("compute_node_scopes", strings(&COMPUTE_SCOPES))
            .set(
                "compute_startup_script",
                self.startup_script(cluster, BootstrapRole::Compute, false),
            );
        Resource::terraform(source::CONTROLLER, CONTROLLER_ID)
            .with_settings(settings)
            .with_uses(uses)
    }

    fn login_resource(&self, cluster: &Cluster, uses: Vec<String>) -> Resource {
        let settings = Settings::new()
            .set("login_node_count", cluster.num_login_nodes)
            .set("subnetwork_name", cluster.subnet.cloud_id.as_str())
            .set("login_service_account", SERVICE_ACCOUNT_EMAIL)
            .set("login_scopes", strings(&LOGIN_SCOPES))
            .set(
                "login_startup_script",
                self.startup_script(cluster, BootstrapRole::Login, true),
            );
        Resource::terraform(source::LOGIN, LOGIN_ID)
            .with_settings(settings)
            .with_uses(uses)
    }
}

fn network_resource(cluster: &Cluster) -> Resource {
    Resource::terraform(source::NETWORK, NETWORK_ID).with_settings(
        Settings::new()
            .set("network_name", cluster.subnet.vpc_cloud_id.as_str())
            .set("subnetwork_name", cluster.subnet.cloud_id.as_str()),
    )
}

fn filesystem_resource(cluster: &Cluster, mp: &MountPoint, index: usize) -> Resource {
    let server_ip = if cluster.owns_export(&mp.export.id) {
        CONTROLLER_ADDRESS
    } else {
        mp.export.server_name.as_str()
    };
    Resource::terraform(source::FILESYSTEM, &format!("mount_num_{index}")).with_settings(
        Settings::new()
            .set("server_ip", server_ip)
            .set("remote_mount", mp.export.export_name.as_str())
            .set("local_mount", mp.mount_path.as_str())
            .set("mount_options", mp.mount_options.as_str())
            .set("fs_type", mp.fs_type.as_str()),
    )
}

fn service_account_resource(cluster: &Cluster, project_id: &str) -> Resource {
    Resource::terraform(source::SERVICE_ACCOUNT, SERVICE_ACCOUNT_ID).with_settings(
        Settings::new()
            .set("project_id", project_id)
            .set("names", vec![format!("{}-sa", cluster.cloud_id)])
            .set("project_roles", strings(&SERVICE_ACCOUNT_ROLES)),
    )
}

fn partition_resource(cluster: &Cluster, part: &Partition, index: usize, uses: Vec<String>) -> Resource {
    let settings = Settings::new()
        .set("partition_name", part.name.as_str())
        .set("subnetwork_name", cluster.subnet.cloud_id.as_str())
        .set("max_node_count", part.max_node_count)
        .set("machine_type", part.machine_type.as_str())
        .set("enable_placement", part.enable_placement)
        .set("image_hyperthreads", part.enable_hyperthreads)
        .set("exclusive", part.exclusive())
        .set_opt("image", part.image.clone());
    Resource::terraform(source::PARTITION, &format!("partition_{index}"))
        .with_settings(settings)
        .with_uses(uses)
}

fn refs(head: &[&str], middle: &[String], tail: &[&str]) -> Vec<String> {
    head.iter()
        .map(|s| s.to_string())
        .chain(middle.iter().cloned())
        .chain(tail.iter().map(|s| s.to_string()))
        .collect()
}

fn strings(items: &[&str]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::String(s.to_string())).collect())
}
