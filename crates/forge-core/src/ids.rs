//! Identifier aliases shared across ForgeHPC crates.

/// Unique identifier for a cluster. Also names its workspace directory.
pub type ClusterId = String;

/// Key of a reconciled compute instance (`{cluster_id}:{role}-{index}`).
pub type InstanceKey = String;

/// Identifier of a filesystem export.
pub type ExportId = String;

/// Identifier of a stored cloud credential.
pub type CredentialId = String;

/// Numeric id of an application installation location.
pub type InstallLocationId = u64;
