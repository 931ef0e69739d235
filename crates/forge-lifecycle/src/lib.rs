//! forge-lifecycle: the cluster state machine.
//!
//! `ClusterLifecycle` sequences workspace preparation, blueprint and
//! bootstrap rendering, the provisioning engine, reconciliation and
//! permission grants, persisting every status change. `JobDispatcher`
//! runs `start`/`stop` in the background, one job per cluster.

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod lease;

pub use controller::{CloudServices, ClusterLifecycle};
pub use dispatcher::{Job, JobDispatcher};
pub use error::{LifecycleError, LifecycleResult};
pub use lease::{ClusterLease, ClusterLeases};
