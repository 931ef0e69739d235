//! StateStore: redb-backed persistence for ForgeHPC entities.
//!
//! Provides typed CRUD over clusters, compute instances, installation
//! locations, credentials and the instance-type catalog. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult, StorageOp};
use crate::tables::*;
use crate::types::*;

/// Convert a redb error into `StateError::Storage` for the given step.
macro_rules! map_err {
    ($op:ident) => {
        |e| StateError::Storage {
            op: StorageOp::$op,
            message: e.to_string(),
        }
    };
}

fn encode<T: Serialize>(key: &str, value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StateError::Encode {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Thread-safe entity store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [CLUSTERS, INSTANCES, INSTALL_LOCATIONS, CREDENTIALS, INSTANCE_TYPES] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON table access ──────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = encode(key, value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T = decode(key, guard.value())?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `prefix` (empty prefix lists everything).
    fn scan_json<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T = decode(key.value(), value.value())?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn delete_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert or update a cluster.
    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        self.put_json(CLUSTERS, &cluster.id, cluster)?;
        debug!(cluster = %cluster.id, status = %cluster.status, "cluster stored");
        Ok(())
    }

    /// Get a cluster by ID.
    pub fn get_cluster(&self, cluster_id: &str) -> StateResult<Option<Cluster>> {
        self.get_json(CLUSTERS, cluster_id)
    }

    /// Get a cluster by ID, failing with `ClusterNotFound` when absent.
    pub fn require_cluster(&self, cluster_id: &str) -> StateResult<Cluster> {
        self.get_cluster(cluster_id)?
            .ok_or_else(|| StateError::ClusterNotFound(cluster_id.to_string()))
    }

    /// List all clusters.
    pub fn list_clusters(&self) -> StateResult<Vec<Cluster>> {
        self.scan_json(CLUSTERS, "")
    }

    /// Delete a cluster by ID. Returns true if it existed.
    pub fn delete_cluster(&self, cluster_id: &str) -> StateResult<bool> {
        self.delete_key(CLUSTERS, cluster_id)
    }

    // ── Compute instances ──────────────────────────────────────────

    /// Insert or update a compute instance.
    pub fn put_instance(&self, instance: &ComputeInstance) -> StateResult<()> {
        self.put_json(INSTANCES, &instance.key, instance)
    }

    /// Get a compute instance by its composite key.
    pub fn get_instance(&self, key: &str) -> StateResult<Option<ComputeInstance>> {
        self.get_json(INSTANCES, key)
    }

    /// List all compute instances belonging to a cluster.
    pub fn list_instances_for_cluster(&self, cluster_id: &str) -> StateResult<Vec<ComputeInstance>> {
        self.scan_json(INSTANCES, &format!("{cluster_id}:"))
    }

    /// List the login nodes of a cluster.
    pub fn list_login_nodes(&self, cluster_id: &str) -> StateResult<Vec<ComputeInstance>> {
        Ok(self
            .list_instances_for_cluster(cluster_id)?
            .into_iter()
            .filter(|i| i.role == NodeRole::Login)
            .collect())
    }

    /// Delete every compute instance of a cluster with the given role.
    /// Returns the number deleted.
    pub fn delete_instances_with_role(&self, cluster_id: &str, role: NodeRole) -> StateResult<u32> {
        let prefix = format!("{cluster_id}:{}-", role.as_str());
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster = %cluster_id, role = role.as_str(), count, "instances deleted");
        Ok(count)
    }

    // ── Install locations ──────────────────────────────────────────

    /// Return the location for `(export_id, path)`, creating it when absent.
    ///
    /// Lookup and creation share one write transaction, so concurrent
    /// callers never produce duplicates.
    pub fn lookup_or_create_install_location(
        &self,
        export_id: &str,
        path: &str,
    ) -> StateResult<ApplicationInstallationLocation> {
        let key = ApplicationInstallationLocation::table_key(export_id, path);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (location, created) = {
            let mut table = txn.open_table(INSTALL_LOCATIONS).map_err(map_err!(Table))?;
            let existing: Option<ApplicationInstallationLocation> =
                match table.get(key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(decode(&key, guard.value())?),
                    None => None,
                };
            match existing {
                Some(location) => (location, false),
                None => {
                    let mut seqs = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
                    let next = seqs
                        .get(INSTALL_LOCATION_SEQ)
                        .map_err(map_err!(Read))?
                        .map(|g| g.value())
                        .unwrap_or(0)
                        .checked_add(1)
                        .ok_or(StateError::SequenceExhausted(INSTALL_LOCATION_SEQ))?;
                    seqs.insert(INSTALL_LOCATION_SEQ, next)
                        .map_err(map_err!(Write))?;
                    let location = ApplicationInstallationLocation {
                        id: next,
                        export_id: export_id.to_string(),
                        path: path.to_string(),
                    };
                    let bytes = encode(&key, &location)?;
                    table
                        .insert(key.as_str(), bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    (location, true)
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, id = location.id, created, "install location resolved");
        Ok(location)
    }

    /// Get an installation location by numeric ID.
    pub fn get_install_location(
        &self,
        id: InstallLocationId,
    ) -> StateResult<Option<ApplicationInstallationLocation>> {
        Ok(self
            .list_install_locations()?
            .into_iter()
            .find(|loc| loc.id == id))
    }

    /// List all installation locations.
    pub fn list_install_locations(&self) -> StateResult<Vec<ApplicationInstallationLocation>> {
        self.scan_json(INSTALL_LOCATIONS, "")
    }

    // ── Credentials ────────────────────────────────────────────────

    /// Insert or update a cloud credential.
    pub fn put_credential(&self, credential: &CloudCredential) -> StateResult<()> {
        self.put_json(CREDENTIALS, &credential.id, credential)
    }

    /// Get a cloud credential by ID.
    pub fn get_credential(&self, id: &str) -> StateResult<Option<CloudCredential>> {
        self.get_json(CREDENTIALS, id)
    }

    // ── Instance types ─────────────────────────────────────────────

    /// Register a machine type in the catalog.
    pub fn put_instance_type(&self, instance_type: &InstanceType) -> StateResult<()> {
        self.put_json(INSTANCE_TYPES, &instance_type.name, instance_type)
    }

    /// Look up a machine type by name.
    pub fn get_instance_type(&self, name: &str) -> StateResult<Option<InstanceType>> {
        self.get_json(INSTANCE_TYPES, name)
    }
}
