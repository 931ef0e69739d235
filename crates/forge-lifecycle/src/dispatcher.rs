//! Background execution of long-running lifecycle operations.
//!
//! Jobs run on the tokio runtime. At most one job per cluster is in flight;
//! a second submission for the same cluster is rejected with `Busy` until
//! the first finishes. Progress is observed through the persisted cluster
//! status rather than by awaiting the job.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use forge_core::ClusterId;

use crate::controller::ClusterLifecycle;
use crate::error::{LifecycleError, LifecycleResult};
use crate::lease::ClusterLeases;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Update(ClusterId),
    Start(ClusterId),
    Stop(ClusterId),
    RepairPermissions(ClusterId),
}

impl Job {
    pub fn cluster_id(&self) -> &str {
        match self {
            Job::Update(id) | Job::Start(id) | Job::Stop(id) | Job::RepairPermissions(id) => id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::Update(_) => "update",
            Job::Start(_) => "start",
            Job::Stop(_) => "stop",
            Job::RepairPermissions(_) => "repair-permissions",
        }
    }
}

pub struct JobDispatcher {
    lifecycle: Arc<ClusterLifecycle>,
    in_flight: ClusterLeases,
}

impl JobDispatcher {
    pub fn new(lifecycle: Arc<ClusterLifecycle>) -> Self {
        Self {
            lifecycle,
            in_flight: ClusterLeases::new(),
        }
    }

    pub fn lifecycle(&self) -> &Arc<ClusterLifecycle> {
        &self.lifecycle
    }

    /// Spawn `job`. Fails with `Busy` if the cluster already has one running.
    pub fn submit(&self, job: Job) -> LifecycleResult<JoinHandle<LifecycleResult<()>>> {
        let lease = self
            .in_flight
            .try_acquire(job.cluster_id())
            .ok_or_else(|| LifecycleError::Busy(job.cluster_id().to_string()))?;
        let lifecycle = Arc::clone(&self.lifecycle);
        info!(cluster = job.cluster_id(), job = job.name(), "job dispatched");

        Ok(tokio::spawn(async move {
            let _lease = lease;
            let result = match &job {
                Job::Update(id) => lifecycle.update(id).await,
                Job::Start(id) => lifecycle.start(id).await,
                Job::Stop(id) => lifecycle.stop(id).await,
                Job::RepairPermissions(id) => lifecycle.repair_permissions(id).await.map(|_| ()),
            };
            match &result {
                Ok(()) => info!(cluster = job.cluster_id(), job = job.name(), "job finished"),
                Err(e) => error!(cluster = job.cluster_id(), job = job.name(), error = %e, "job failed"),
            }
            result
        }))
    }

    pub fn is_running(&self, cluster_id: &str) -> bool {
        self.in_flight.is_held(cluster_id)
    }
}
