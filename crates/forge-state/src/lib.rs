//! forge-state: durable entity store for ForgeHPC.
//!
//! Backed by [redb](https://docs.rs/redb), holds clusters (with their
//! embedded mount points and partitions), reconciled compute instances,
//! application installation locations, cloud credentials and the
//! instance-type catalog.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Instance keys (`{cluster_id}:{role}-{index}`) enable prefix scans per
//! cluster. The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod mounts;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult, StorageOp};
pub use mounts::{MountTable, relative_to_mount, resolve_mount};
pub use store::StateStore;
pub use types::*;
