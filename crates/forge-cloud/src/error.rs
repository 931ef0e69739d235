//! Cloud collaborator errors.

use thiserror::Error;

/// Errors returned by object storage, IAM and pub/sub operations.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The caller lacks the IAM permission for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{program} exited with code {code}: {stderr}")]
    Command {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("invalid command-and-control message: {0}")]
    InvalidMessage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CloudError::PermissionDenied(_))
    }
}

pub type CloudResult<T> = Result<T, CloudError>;
