//! Configuration management for mesh-tunnel
//!
//! The configuration file is a JSON document. It is parsed into a generic
//! [`serde_json::Value`] first and then validated field by field into the
//! typed [`TunnelConfig`], so every error names the offending key.

mod model;
mod validate;

pub use model::{MappingSpec, RemoteAddr, ServerConfig, TunnelConfig};
pub use validate::parse_config;

use crate::error::ConfigError;
use std::path::Path;

/// Load and validate configuration from a file
pub fn load_config(path: &Path) -> Result<TunnelConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&content)
}
