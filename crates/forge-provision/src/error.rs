//! Provisioning errors.

use std::path::PathBuf;

use thiserror::Error;

use forge_blueprint::BlueprintError;
use forge_cloud::CloudError;
use forge_state::StateError;

use crate::engine::Stage;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The cluster's workspace directory is already present.
    #[error("workspace already exists: {}", .0.display())]
    WorkspaceExists(PathBuf),

    /// An external tool exited non-zero.
    #[error("{stage} failed with exit code {exit_code}{}", stderr_suffix(.stderr))]
    Command {
        stage: Stage,
        exit_code: i32,
        stderr: Option<String>,
    },

    /// The state snapshot has no resource at the expected module path.
    #[error("no resource {name} in module {module}")]
    ResourceNotFound { module: String, name: String },

    #[error("invalid state snapshot: {0}")]
    InvalidState(String),

    #[error("template {name}: {message}")]
    Template { name: String, message: String },

    /// One or more bootstrap scripts failed to publish.
    #[error("failed to publish bootstrap scripts: {}", .0.join("; "))]
    Publish(Vec<String>),

    #[error(transparent)]
    Blueprint(#[from] BlueprintError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn stderr_suffix(stderr: &Option<String>) -> String {
    match stderr {
        Some(s) if !s.is_empty() => format!(": {s}"),
        _ => String::new(),
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
