//! Blueprint generation errors.

use thiserror::Error;

/// Errors that can occur while building or writing a blueprint.
#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("no project id in cloud credential for cluster {0}")]
    MissingCredential(String),

    #[error("blueprint serialization failed: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("failed to write blueprint: {0}")]
    Io(#[from] std::io::Error),
}

pub type BlueprintResult<T> = Result<T, BlueprintError>;
