//! Exclusive per-cluster leases.
//!
//! A lease is held for the whole of a state-mutating operation and released
//! when the guard drops, on every exit path.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ClusterLeases {
    held: Arc<Mutex<HashSet<String>>>,
}

impl ClusterLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `cluster_id`, or `None` if someone else holds it.
    pub fn try_acquire(&self, cluster_id: &str) -> Option<ClusterLease> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(cluster_id.to_string()) {
            return None;
        }
        debug!(cluster = cluster_id, "lease acquired");
        Some(ClusterLease {
            cluster_id: cluster_id.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, cluster_id: &str) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains(cluster_id)
    }
}

/// Guard for one held lease.
#[derive(Debug)]
pub struct ClusterLease {
    cluster_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl ClusterLease {
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }
}

impl Drop for ClusterLease {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.cluster_id);
        debug!(cluster = %self.cluster_id, "lease released");
    }
}
