//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport protocol of a mapping.
///
/// Configuration files carry the protocol as an integer. Values other than
/// 1 and 2 are kept as [`Protocol::Unmapped`] and produce a relay URL with no
/// port parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP (wire value 1)
    Tcp,
    /// UDP (wire value 2)
    Udp,
    /// Any other wire value
    Unmapped(i64),
}

impl Protocol {
    /// Integer value as it appears in configuration files
    pub fn wire_value(&self) -> i64 {
        match self {
            Protocol::Tcp => 1,
            Protocol::Udp => 2,
            Protocol::Unmapped(v) => *v,
        }
    }

    /// Query parameter prefix used on relay URLs (`tcp` / `udp`)
    pub fn query_prefix(&self) -> Option<&'static str> {
        match self {
            Protocol::Tcp => Some("tcp"),
            Protocol::Udp => Some("udp"),
            Protocol::Unmapped(_) => None,
        }
    }
}

impl From<i64> for Protocol {
    fn from(value: i64) -> Self {
        match value {
            1 => Protocol::Tcp,
            2 => Protocol::Udp,
            other => Protocol::Unmapped(other),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Unmapped(v) => write!(f, "protocol({})", v),
        }
    }
}

/// State of the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting,
    /// Connected and authenticated
    Connected,
    /// Not connected (never connected, failed, or closed)
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Lifecycle state of a tunnel worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Start requested, not yet active
    Starting,
    /// Local binding and relay session are up
    Active,
    /// Stopped on request
    Stopped,
    /// Failed on its own
    Failed,
}

impl WorkerState {
    /// Whether the worker can no longer become active
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Active => write!(f, "active"),
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Failed => write!(f, "failed"),
        }
    }
}

/// Why a control channel left the connected state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Short machine-readable cause (close code, error kind)
    pub cause: String,
    /// Human-readable detail
    pub message: String,
}

impl DisconnectReason {
    /// Create a new disconnect reason
    pub fn new(cause: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.cause, self.message)
    }
}
