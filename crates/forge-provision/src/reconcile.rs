//! Deriving controller and login records from the engine's state snapshot.
//!
//! The snapshot is terraform's JSON state: a top-level `resources` array of
//! `{module, name, instances: [{attributes}]}`. A resource is selected by
//! exact `(module, name)` match; each of its instances becomes one record.
//! Attribute extraction is field-by-field: a missing field leaves only that
//! field unset.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use forge_state::{CloudState, Cluster, ComputeInstance, NodeRole, StateStore};

use crate::error::{ProvisionError, ProvisionResult};

/// Exact `(module, name)` pair identifying a resource in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceFilter {
    pub module: &'static str,
    pub name: &'static str,
}

pub const CONTROLLER_FILTER: ResourceFilter = ResourceFilter {
    module: "module.slurm_controller.module.slurm_cluster_controller",
    name: "controller_node",
};

pub const LOGIN_FILTER: ResourceFilter = ResourceFilter {
    module: "module.slurm_login.module.slurm_cluster_login_node",
    name: "login_node",
};

#[derive(Debug, Clone, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub resources: Vec<StateResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateResource {
    #[serde(default)]
    pub module: Option<String>,
    pub name: String,
    #[serde(default)]
    pub instances: Vec<StateInstance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateInstance {
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl StateSnapshot {
    pub fn parse(text: &str) -> ProvisionResult<Self> {
        serde_json::from_str(text).map_err(|e| ProvisionError::InvalidState(e.to_string()))
    }

    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// First resource matching `filter`.
    pub fn resource(&self, filter: ResourceFilter) -> ProvisionResult<&StateResource> {
        self.resources
            .iter()
            .find(|r| r.module.as_deref() == Some(filter.module) && r.name == filter.name)
            .ok_or_else(|| ProvisionError::ResourceNotFound {
                module: filter.module.to_string(),
                name: filter.name.to_string(),
            })
    }
}

/// Machine types the orchestrator recognizes.
pub trait InstanceTypeCatalog {
    /// Canonical catalog name for a machine type, or `None` if unknown.
    fn resolve(&self, machine_type: &str) -> Option<String>;
}

impl InstanceTypeCatalog for StateStore {
    fn resolve(&self, machine_type: &str) -> Option<String> {
        match self.get_instance_type(machine_type) {
            Ok(found) => found.map(|t| t.name),
            Err(e) => {
                warn!(machine_type, error = %e, "instance type lookup failed");
                None
            }
        }
    }
}

impl InstanceTypeCatalog for BTreeSet<String> {
    fn resolve(&self, machine_type: &str) -> Option<String> {
        self.get(machine_type).cloned()
    }
}

/// Attributes pulled from one instance of a matched resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceRecord {
    pub name: Option<String>,
    pub machine_type: Option<String>,
    pub internal_ip: Option<String>,
    pub public_ip: Option<String>,
    pub service_account: Option<String>,
}

/// Records for every instance of the resource matching `filter`.
pub fn extract_instances(
    snapshot: &StateSnapshot,
    filter: ResourceFilter,
    catalog: &dyn InstanceTypeCatalog,
) -> ProvisionResult<Vec<InstanceRecord>> {
    let resource = snapshot.resource(filter)?;
    Ok(resource
        .instances
        .iter()
        .map(|instance| extract_record(&instance.attributes, catalog))
        .collect())
}

fn extract_record(attrs: &Map<String, Value>, catalog: &dyn InstanceTypeCatalog) -> InstanceRecord {
    let nic = first(attrs, "network_interface");
    let machine_type = str_field(attrs, "machine_type").and_then(|raw| {
        // Machine types may be full resource URLs.
        let short = raw.rsplit('/').next().unwrap_or(raw);
        let resolved = catalog.resolve(short);
        if resolved.is_none() {
            debug!(machine_type = short, "machine type not in catalog");
        }
        resolved
    });

    InstanceRecord {
        name: str_field(attrs, "name").map(str::to_string),
        machine_type,
        internal_ip: nic
            .and_then(|n| str_field(n, "network_ip"))
            .map(str::to_string),
        public_ip: nic
            .and_then(|n| first(n, "access_config"))
            .and_then(|ac| str_field(ac, "nat_ip"))
            .map(str::to_string),
        service_account: first(attrs, "service_account")
            .and_then(|sa| str_field(sa, "email"))
            .map(str::to_string),
    }
}

fn first<'a>(attrs: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    attrs.get(key)?.as_array()?.first()?.as_object()
}

fn str_field<'a>(attrs: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    attrs.get(key)?.as_str().filter(|s| !s.is_empty())
}

/// Service accounts used by a cluster's nodes. Compute nodes run as the
/// login account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceAccounts {
    pub controller: Option<String>,
    pub login: Option<String>,
}

impl ServiceAccounts {
    pub fn compute(&self) -> Option<&str> {
        self.login.as_deref()
    }

    pub fn distinct(&self) -> BTreeSet<String> {
        self.controller.iter().chain(self.login.iter()).cloned().collect()
    }

    /// Recover the accounts from already-stored instance records.
    pub fn from_instances(instances: &[ComputeInstance]) -> Self {
        let by_role = |role: NodeRole| {
            instances
                .iter()
                .filter(|i| i.role == role)
                .min_by(|a, b| a.key.cmp(&b.key))
                .and_then(|i| i.service_account.clone())
        };
        Self {
            controller: by_role(NodeRole::Controller),
            login: by_role(NodeRole::Login),
        }
    }
}

/// Outcome of reconciling one cluster.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub controller: Option<ComputeInstance>,
    pub logins: Vec<ComputeInstance>,
    pub service_accounts: ServiceAccounts,
}

impl Reconciled {
    pub fn instance_count(&self) -> usize {
        self.logins.len() + usize::from(self.controller.is_some())
    }
}

/// Materializes instance records in the entity store.
pub struct Reconciler {
    store: StateStore,
}

impl Reconciler {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Replace the cluster's controller and login records with those found
    /// in `snapshot`, and point `cluster.controller_node` at the controller.
    ///
    /// The caller persists `cluster`.
    pub fn reconcile(&self, cluster: &mut Cluster, snapshot: &StateSnapshot) -> ProvisionResult<Reconciled> {
        let controllers = extract_instances(snapshot, CONTROLLER_FILTER, &self.store)?;
        let logins = extract_instances(snapshot, LOGIN_FILTER, &self.store)?;

        if controllers.len() != 1 {
            warn!(
                cluster = %cluster.id,
                found = controllers.len(),
                expected = 1,
                "unexpected number of controller nodes"
            );
        }
        if logins.len() != cluster.num_login_nodes as usize {
            warn!(
                cluster = %cluster.id,
                found = logins.len(),
                expected = cluster.num_login_nodes,
                "unexpected number of login nodes"
            );
        }

        self.store.delete_instances_with_role(&cluster.id, NodeRole::Controller)?;
        self.store.delete_instances_with_role(&cluster.id, NodeRole::Login)?;

        let controller = match controllers.into_iter().next() {
            Some(record) => {
                let node = self.materialize(cluster, NodeRole::Controller, 0, record)?;
                info!(
                    cluster = %cluster.id,
                    address = node.address().unwrap_or("unknown"),
                    "controller node recorded"
                );
                Some(node)
            }
            None => None,
        };
        cluster.controller_node = controller.as_ref().map(|c| c.key.clone());

        let mut login_nodes = Vec::with_capacity(logins.len());
        for (index, record) in logins.into_iter().enumerate() {
            let node = self.materialize(cluster, NodeRole::Login, index, record)?;
            info!(
                cluster = %cluster.id,
                address = node.address().unwrap_or("unknown"),
                "login node recorded"
            );
            login_nodes.push(node);
        }

        let service_accounts = ServiceAccounts {
            controller: controller.as_ref().and_then(|c| c.service_account.clone()),
            login: login_nodes.first().and_then(|l| l.service_account.clone()),
        };
        Ok(Reconciled {
            controller,
            logins: login_nodes,
            service_accounts,
        })
    }

    fn materialize(
        &self,
        cluster: &Cluster,
        role: NodeRole,
        index: usize,
        record: InstanceRecord,
    ) -> ProvisionResult<ComputeInstance> {
        let instance = ComputeInstance {
            key: ComputeInstance::table_key(&cluster.id, role, index),
            cluster_id: cluster.id.clone(),
            role,
            cloud_id: record.name,
            instance_type: record.machine_type,
            internal_ip: record.internal_ip,
            public_ip: record.public_ip,
            service_account: record.service_account,
            cloud_region: cluster.cloud_region.clone(),
            cloud_zone: cluster.cloud_zone.clone(),
            cloud_state: CloudState::Provisioned,
        };
        self.store.put_instance(&instance)?;
        Ok(instance)
    }
}
