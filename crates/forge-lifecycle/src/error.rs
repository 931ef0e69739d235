use thiserror::Error;

use forge_blueprint::BlueprintError;
use forge_cloud::CloudError;
use forge_provision::ProvisionError;
use forge_state::{ClusterStatus, StateError, TransitionError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// The operation is not allowed in the cluster's current status.
    #[error("cannot {operation} cluster {cluster_id} in status {status}")]
    InvalidOperation {
        operation: &'static str,
        cluster_id: String,
        status: ClusterStatus,
    },

    /// Another lifecycle operation holds the cluster.
    #[error("cluster {0} is busy")]
    Busy(String),

    /// Mount points and partitions can no longer change.
    #[error("cluster {0} layout is locked once provisioning has started")]
    LayoutLocked(String),

    #[error("cluster {0} has no cloud credential")]
    NoCredential(String),

    /// The command-and-control grant was denied; run `repair_permissions`.
    #[error("cluster {0} command channel is degraded")]
    ChannelDegraded(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Blueprint(#[from] BlueprintError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
