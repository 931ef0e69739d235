//! redb table definitions for the ForgeHPC entity store.
//!
//! Entity tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Child records use `{parent_id}:{child}` keys for prefix scans.

use redb::TableDefinition;

/// Shape shared by every JSON entity table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Clusters keyed by `{cluster_id}`.
pub const CLUSTERS: JsonTable = TableDefinition::new("clusters");

/// Reconciled compute instances keyed by `{cluster_id}:{role}-{index}`.
pub const INSTANCES: JsonTable = TableDefinition::new("compute_instances");

/// Application installation locations keyed by `{export_id}:{path}`.
pub const INSTALL_LOCATIONS: JsonTable = TableDefinition::new("install_locations");

/// Cloud credentials keyed by `{credential_id}`.
pub const CREDENTIALS: JsonTable = TableDefinition::new("cloud_credentials");

/// Known machine types keyed by `{name}`.
pub const INSTANCE_TYPES: JsonTable = TableDefinition::new("instance_types");

/// Monotonic sequences keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Sequence used to number installation locations.
pub const INSTALL_LOCATION_SEQ: &str = "install_location";
