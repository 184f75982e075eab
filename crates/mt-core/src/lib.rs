//! mt-core: Core abstractions and configuration for mesh-tunnel
//!
//! This crate provides the validated configuration model, relay URL
//! derivation, and the collaborator traits used by the supervisor.

pub mod config;
pub mod error;
pub mod relay;
pub mod traits;
pub mod types;

pub use config::{load_config, MappingSpec, RemoteAddr, ServerConfig, TunnelConfig};
pub use error::MtError;
pub use relay::RelayUrl;
pub use types::{ConnectionState, Protocol, WorkerState};
