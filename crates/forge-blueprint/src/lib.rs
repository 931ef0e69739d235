//! forge-blueprint: declarative cluster blueprints.
//!
//! Turns a `Cluster` into the blueprint document consumed by the external
//! blueprint compiler. The blueprint is built as typed values first
//! (`model`) and serialized to YAML last, so identical clusters always
//! produce byte-identical text.
//!
//! # Resource order
//!
//! ```text
//! hpc_network                 pre-existing VPC / subnet
//! mount_num_{n}               one per mount point, in mount order
//! hpc_service_account         node service account + project roles
//! partition_{n}               one per partition
//! slurm_controller            controller + compute startup scripts
//! slurm_login                 login nodes
//! ```

pub mod error;
pub mod generator;
pub mod model;

pub use error::{BlueprintError, BlueprintResult};
pub use generator::{BlueprintGenerator, CONTROLLER_ID, LOGIN_ID, NETWORK_ID, SERVICE_ACCOUNT_ID};
pub use model::{Blueprint, BlueprintVars, Resource, ResourceGroup, Settings};
