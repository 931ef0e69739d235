//! Domain types for the ForgeHPC entity store.
//!
//! A `Cluster` is the root aggregate. Its mount points and partitions are
//! embedded; compute instances are separate records materialized from the
//! infrastructure engine's state after a successful apply.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use forge_core::{ClusterId, CredentialId, ExportId, InstallLocationId, InstanceKey};

// ── Lifecycle states ──────────────────────────────────────────────

/// Lifecycle status of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    New,
    Preparing,
    Configuring,
    Initializing,
    Ready,
    Error,
    Terminating,
    Destroyed,
}

impl ClusterStatus {
    /// Single-letter status code used in operator output.
    pub fn code(&self) -> char {
        match self {
            ClusterStatus::New => 'n',
            ClusterStatus::Preparing => 'p',
            ClusterStatus::Configuring => 'c',
            ClusterStatus::Initializing => 'i',
            ClusterStatus::Ready => 'r',
            ClusterStatus::Error => 'e',
            ClusterStatus::Terminating => 't',
            ClusterStatus::Destroyed => 'd',
        }
    }

    /// The transition table. `Terminating -> Terminating` is an operator
    /// re-running `stop` after a failed destroy.
    pub fn can_transition_to(&self, next: ClusterStatus) -> bool {
        use ClusterStatus::*;
        matches!(
            (self, next),
            (New, Preparing)
                | (Preparing, New)
                | (Preparing, Configuring)
                | (Configuring, Initializing)
                | (Configuring, Error)
                | (Initializing, Ready)
                | (Initializing, Error)
                | (Ready, Terminating)
                | (Error, Terminating)
                | (Terminating, Terminating)
                | (Terminating, Destroyed)
        )
    }

    /// States in which nothing has been applied to the cloud yet.
    pub fn is_pre_apply(&self) -> bool {
        matches!(
            self,
            ClusterStatus::New | ClusterStatus::Preparing | ClusterStatus::Configuring
        )
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClusterStatus::New => "new",
            ClusterStatus::Preparing => "preparing",
            ClusterStatus::Configuring => "configuring",
            ClusterStatus::Initializing => "initializing",
            ClusterStatus::Ready => "ready",
            ClusterStatus::Error => "error",
            ClusterStatus::Terminating => "terminating",
            ClusterStatus::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// Provisioning phase of the cloud resources behind a cluster or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudState {
    NotProvisioned,
    Provisioned,
    Destroying,
    Destroyed,
}

impl fmt::Display for CloudState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloudState::NotProvisioned => "not_provisioned",
            CloudState::Provisioned => "provisioned",
            CloudState::Destroying => "destroying",
            CloudState::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// A status change rejected by the transition table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cluster transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ClusterStatus,
    pub to: ClusterStatus,
}

// ── Cluster ───────────────────────────────────────────────────────

/// Root aggregate describing one HPC cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    /// Name used for cloud resources and the blueprint deployment.
    pub cloud_id: String,
    pub cloud_region: String,
    pub cloud_zone: String,
    pub subnet: SubnetRef,
    /// Filesystem exported by this cluster's own controller, if any.
    pub shared_fs: Option<SharedFilesystem>,
    pub mount_points: Vec<MountPoint>,
    pub partitions: Vec<Partition>,
    pub num_login_nodes: u32,
    pub status: ClusterStatus,
    pub cloud_state: CloudState,
    pub controller_node: Option<InstanceKey>,
    /// Where the cluster's spack tree lives on the mounted filesystems.
    pub spack_dir: String,
    pub spack_install: Option<InstallLocationId>,
    pub cloud_credential: Option<CredentialId>,
    /// Set when the command-and-control grant was denied.
    #[serde(default)]
    pub c2_degraded: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Pre-existing network the cluster attaches to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubnetRef {
    pub vpc_cloud_id: String,
    pub cloud_id: String,
}

/// Exports served by the cluster's controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SharedFilesystem {
    pub exports: Vec<ExportId>,
}

/// A filesystem export that can be mounted by cluster nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilesystemExport {
    pub id: ExportId,
    pub server_name: String,
    pub export_name: String,
}

/// Mount of a filesystem export on every node of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MountPoint {
    pub export: FilesystemExport,
    pub mount_path: String,
    pub mount_options: String,
    pub fs_type: String,
    pub mount_order: u32,
}

/// Compute pool definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Partition {
    pub name: String,
    pub machine_type: String,
    pub max_node_count: u32,
    pub enable_placement: bool,
    pub enable_hyperthreads: bool,
    pub enable_node_reuse: bool,
    /// Optional boot image override.
    pub image: Option<String>,
}

impl Partition {
    /// Nodes are exclusive when placement is on or reuse is off.
    pub fn exclusive(&self) -> bool {
        self.enable_placement || !self.enable_node_reuse
    }
}

impl Cluster {
    /// Create a cluster in the `New` state.
    pub fn new(id: &str, name: &str, cloud_id: &str, region: &str, zone: &str, subnet: SubnetRef) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            cloud_id: cloud_id.to_string(),
            cloud_region: region.to_string(),
            cloud_zone: zone.to_string(),
            subnet,
            shared_fs: None,
            mount_points: Vec::new(),
            partitions: Vec::new(),
            num_login_nodes: 1,
            status: ClusterStatus::New,
            cloud_state: CloudState::NotProvisioned,
            controller_node: None,
            spack_dir: "/opt/cluster/spack".to_string(),
            spack_install: None,
            cloud_credential: None,
            c2_degraded: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Move to `next` if the transition table allows it.
    pub fn transition(&mut self, next: ClusterStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Whether the export is served by this cluster's own controller.
    pub fn owns_export(&self, export_id: &str) -> bool {
        self.shared_fs
            .as_ref()
            .is_some_and(|fs| fs.exports.iter().any(|e| e == export_id))
    }

    /// Mount points and partitions may only change before provisioning starts.
    pub fn layout_locked(&self) -> bool {
        !self.status.is_pre_apply() || self.cloud_state != CloudState::NotProvisioned
    }

    /// Mount points in `mount_order`, ties broken by path.
    pub fn ordered_mount_points(&self) -> Vec<&MountPoint> {
        let mut mounts: Vec<&MountPoint> = self.mount_points.iter().collect();
        mounts.sort_by(|a, b| {
            a.mount_order
                .cmp(&b.mount_order)
                .then_with(|| a.mount_path.cmp(&b.mount_path))
        });
        mounts
    }
}

// ── Compute instance ──────────────────────────────────────────────

/// Role a reconciled instance plays in its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Controller,
    Login,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Controller => "controller",
            NodeRole::Login => "login",
        }
    }
}

/// A controller or login node derived from provisioning results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeInstance {
    pub key: InstanceKey,
    pub cluster_id: ClusterId,
    pub role: NodeRole,
    /// Cloud instance name.
    pub cloud_id: Option<String>,
    /// Resolved machine type; unset when not in the catalog.
    pub instance_type: Option<String>,
    pub internal_ip: Option<String>,
    pub public_ip: Option<String>,
    pub service_account: Option<String>,
    pub cloud_region: String,
    pub cloud_zone: String,
    pub cloud_state: CloudState,
}

impl ComputeInstance {
    /// Build the composite key for the instances table.
    pub fn table_key(cluster_id: &str, role: NodeRole, index: usize) -> InstanceKey {
        format!("{cluster_id}:{}-{index}", role.as_str())
    }

    /// Preferred address for operators: public when present.
    pub fn address(&self) -> Option<&str> {
        self.public_ip.as_deref().or(self.internal_ip.as_deref())
    }
}

// ── Install location ──────────────────────────────────────────────

/// Where a software stack is installed: an export plus a relative path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationInstallationLocation {
    pub id: InstallLocationId,
    pub export_id: ExportId,
    pub path: String,
}

impl ApplicationInstallationLocation {
    /// Build the lookup key for the install locations table.
    pub fn table_key(export_id: &str, path: &str) -> String {
        format!("{export_id}:{path}")
    }
}

// ── Credentials & catalog ─────────────────────────────────────────

/// Opaque provider credential (a service-account JSON document).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudCredential {
    pub id: CredentialId,
    pub detail: String,
}

impl CloudCredential {
    /// The `project_id` field of the credential document, if present.
    pub fn project_id(&self) -> Option<String> {
        project_id_from_detail(&self.detail)
    }
}

/// Extract `project_id` from a raw credential blob.
pub fn project_id_from_detail(detail: &str) -> Option<String> {
    let doc: serde_json::Value = serde_json::from_str(detail).ok()?;
    doc.get("project_id")?
        .as_str()
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// A machine type the orchestrator knows about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceType {
    pub name: String,
    pub cpus: Option<u32>,
    pub memory_mb: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet() -> SubnetRef {
        SubnetRef {
            vpc_cloud_id: "vpc-1".to_string(),
            cloud_id: "subnet-1".to_string(),
        }
    }

    #[test]
    fn happy_path_transitions_are_allowed() {
        let mut cluster = Cluster::new("1", "c", "c-cloud", "us-central1", "us-central1-a", subnet());
        for next in [
            ClusterStatus::Preparing,
            ClusterStatus::Configuring,
            ClusterStatus::Initializing,
            ClusterStatus::Ready,
            ClusterStatus::Terminating,
            ClusterStatus::Destroyed,
        ] {
            cluster.transition(next).unwrap();
        }
        assert_eq!(cluster.status, ClusterStatus::Destroyed);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut cluster = Cluster::new("1", "c", "c-cloud", "r", "z", subnet());
        let err = cluster.transition(ClusterStatus::Ready).unwrap_err();
        assert_eq!(err.from, ClusterStatus::New);
        assert_eq!(err.to, ClusterStatus::Ready);
        assert_eq!(cluster.status, ClusterStatus::New);
    }

    #[test]
    fn destroyed_is_terminal() {
        for next in [
            ClusterStatus::New,
            ClusterStatus::Preparing,
            ClusterStatus::Configuring,
            ClusterStatus::Ready,
            ClusterStatus::Terminating,
        ] {
            assert!(!ClusterStatus::Destroyed.can_transition_to(next));
        }
    }

    #[test]
    fn failed_destroy_can_be_rerun() {
        assert!(ClusterStatus::Terminating.can_transition_to(ClusterStatus::Terminating));
        assert!(!ClusterStatus::Terminating.can_transition_to(ClusterStatus::Error));
    }

    #[test]
    fn layout_locks_once_started() {
        let mut cluster = Cluster::new("1", "c", "c-cloud", "r", "z", subnet());
        assert!(!cluster.layout_locked());
        cluster.status = ClusterStatus::Configuring;
        assert!(!cluster.layout_locked());
        cluster.status = ClusterStatus::Initializing;
        assert!(cluster.layout_locked());
    }

    #[test]
    fn partition_exclusive_flag() {
        let mut part = Partition {
            name: "batch".to_string(),
            machine_type: "c2-standard-60".to_string(),
            max_node_count: 4,
            enable_placement: false,
            enable_hyperthreads: false,
            enable_node_reuse: true,
            image: None,
        };
        assert!(!part.exclusive());
        part.enable_node_reuse = false;
        assert!(part.exclusive());
        part.enable_node_reuse = true;
        part.enable_placement = true;
        assert!(part.exclusive());
    }

    #[test]
    fn credential_project_id() {
        let cred = CloudCredential {
            id: "cred".to_string(),
            detail: r#"{"type":"service_account","project_id":"hpc-proj"}"#.to_string(),
        };
        assert_eq!(cred.project_id().as_deref(), Some("hpc-proj"));

        assert_eq!(project_id_from_detail("not json"), None);
        assert_eq!(project_id_from_detail(r#"{"project_id":""}"#), None);
        assert_eq!(project_id_from_detail(r#"{"client_email":"x"}"#), None);
    }

    #[test]
    fn instance_keys_are_stable() {
        assert_eq!(
            ComputeInstance::table_key("7", NodeRole::Login, 1),
            "7:login-1"
        );
        assert_eq!(
            ComputeInstance::table_key("7", NodeRole::Controller, 0),
            "7:controller-0"
        );
    }
}
