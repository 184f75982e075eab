//! Control channel trait

use async_trait::async_trait;
use std::fmt;

use crate::error::ConnectionError;
use crate::relay::RelayUrl;
use crate::types::{ConnectionState, DisconnectReason};

/// Login material for the control channel
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
    /// Optional certificate pinning hint
    pub cert_hash: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("cert_hash", &self.cert_hash)
            .finish()
    }
}

/// Long-lived authenticated connection to the relay coordination service
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Start connecting to `url`.
    ///
    /// Returns once the attempt is under way. Progress is observed through
    /// [`ControlChannel::state`], which reads `Connecting` until the attempt
    /// settles.
    async fn connect(&self, url: &RelayUrl, credentials: &Credentials)
        -> Result<(), ConnectionError>;

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Cause and message of the last failure or close, if any
    fn disconnect_reason(&self) -> Option<DisconnectReason>;

    /// Close the connection
    async fn disconnect(&self);
}
