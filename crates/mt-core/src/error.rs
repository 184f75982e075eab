//! Core error types for mesh-tunnel

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the mesh-tunnel ecosystem
#[derive(Error, Debug)]
pub enum MtError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Control connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Tunnel worker error
    #[error("Tunnel error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
///
/// Every variant is fatal at startup and names the offending key or value.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid JSON, or its root is not an object
    #[error("Invalid configuration file: {0}")]
    ParseFailure(String),

    /// Required key is absent
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Required string key is present but empty
    #[error("Empty value for configuration key: {0}")]
    EmptyValue(String),

    /// Key is present with the wrong JSON type
    #[error("Invalid type for configuration key {key}. Expected {expected}, got {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// `mappings` is absent or not an array
    #[error("Invalid or missing mappings in configuration")]
    MissingOrInvalidMappings,

    /// Port outside 1..=65535
    #[error("Invalid {field} in mapping: {value}")]
    InvalidPortRange { field: &'static str, value: i64 },

    /// `remoteIP` is not an IPv4 or IPv6 literal
    #[error("Invalid remoteIP format: {0}")]
    InvalidAddressFormat(String),

    /// Hostname is empty or has an empty host segment
    #[error("Invalid hostname: {0:?}")]
    InvalidHostname(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::ParseFailure(e.to_string())
    }
}

/// Control channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The channel settled in a state other than connected
    #[error("Server connection error: {cause},{message}")]
    Failed { cause: String, message: String },

    /// The channel stayed in `Connecting` for longer than allowed
    #[error("Server connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection attempt could not be initiated
    #[error("Invalid control endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// Tunnel worker errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The worker did not reach the active state after `start`
    #[error("Failed to start tunnel {name}: {reason}")]
    StartFailed { name: String, reason: String },

    /// The control channel is not connected
    #[error("Control channel is not connected")]
    ControlNotConnected,

    /// The protocol has no local binding
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(crate::types::Protocol),

    /// Local port could not be bound
    #[error("Failed to bind local port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Relay session could not be opened or was lost
    #[error("Relay session error: {0}")]
    Relay(String),

    /// Stop did not complete cleanly
    #[error("Error stopping tunnel {name}: {reason}")]
    StopFailed { name: String, reason: String },
}
