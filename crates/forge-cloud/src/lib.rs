//! forge-cloud: the cloud systems a cluster lifecycle touches.
//!
//! Object storage holds bootstrap scripts, IAM grants node service
//! accounts access, and pub/sub carries command-and-control traffic.
//! Each is a trait with a `gcloud`-CLI implementation and an in-memory
//! one.

pub mod c2;
pub mod error;
pub mod gcloud;
pub mod memory;
pub mod traits;

pub use c2::{C2Channel, C2Command, C2CommandKind, C2Mismatch, C2Response, C2Subject, ResponseRouter};
pub use error::{CloudError, CloudResult};
pub use gcloud::GcloudCli;
pub use memory::MemoryCloud;
pub use traits::{IamClient, ObjectStore, PubSubAdmin, service_account_member};
