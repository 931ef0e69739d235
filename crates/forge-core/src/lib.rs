pub mod config;
pub mod ids;
pub mod layout;

pub use config::{ForgeConfig, ServerConfig, StateConfig, ToolsConfig};
pub use ids::*;
pub use layout::BootstrapRole;
