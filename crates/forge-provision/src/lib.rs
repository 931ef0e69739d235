//! forge-provision: everything between a stored cluster and running nodes.
//!
//! - [`workspace`]: per-cluster directory, credential file, SSH keypair
//! - [`bootstrap`]: per-role startup scripts rendered and uploaded
//! - [`engine`]: blueprint compiler and terraform invocations
//! - [`reconcile`]: controller/login records from the terraform state
//! - [`permissions`]: bucket and command-and-control grants

pub mod bootstrap;
pub mod engine;
pub mod error;
pub mod permissions;
pub mod reconcile;
pub mod runner;
pub mod workspace;

pub use bootstrap::BootstrapPublisher;
pub use engine::{ProvisioningEngine, Stage};
pub use error::{ProvisionError, ProvisionResult};
pub use permissions::{ChannelStatus, PermissionSync};
pub use reconcile::{
    CONTROLLER_FILTER, InstanceRecord, InstanceTypeCatalog, LOGIN_FILTER, Reconciled, Reconciler,
    ResourceFilter, ServiceAccounts, StateSnapshot, extract_instances,
};
pub use runner::{CommandRunner, Invocation, Outcome, ProcessRunner};
pub use workspace::Workspace;
