//! Error types for the ForgeHPC entity store.

use std::fmt;

use thiserror::Error;

use crate::types::ClusterId;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// The redb step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Open,
    Transaction,
    Table,
    Read,
    Write,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageOp::Open => "open",
            StorageOp::Transaction => "transaction",
            StorageOp::Table => "table",
            StorageOp::Read => "read",
            StorageOp::Write => "write",
        })
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state store {op} failed: {message}")]
    Storage { op: StorageOp, message: String },

    /// A record could not be encoded for storage.
    #[error("cannot encode record {key}: {message}")]
    Encode { key: String, message: String },

    /// A stored record no longer decodes into its entity type.
    #[error("corrupt record {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("cluster {0} not found")]
    ClusterNotFound(ClusterId),

    #[error("sequence {0} exhausted")]
    SequenceExhausted(&'static str),
}
