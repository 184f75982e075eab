//! Validated configuration model

use serde::{Serialize, Serializer};
use std::fmt;
use std::net::{AddrParseError, IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::traits::Credentials;
use crate::types::Protocol;

/// Address used for dispatch when a mapping has no `remoteIP`
pub const DEFAULT_REMOTE_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// A configured `remoteIP`: validated as an IP literal, kept as written.
///
/// The relay URL carries the configured text, so `0:0:0:0:0:0:0:1` is not
/// shortened to `::1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr {
    raw: String,
    ip: IpAddr,
}

impl RemoteAddr {
    /// The address as configured
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed address
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl FromStr for RemoteAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            raw: s.to_string(),
            ip: s.parse()?,
        })
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for RemoteAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Relay server parameters
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    /// Server host, optionally followed by `?key=<access key>`
    pub hostname: String,
    /// Login user
    pub username: String,
    /// Login password
    #[serde(skip_serializing)]
    pub password: String,
    /// Optional certificate pinning hint
    pub cert_hash: Option<String>,
}

impl ServerConfig {
    /// Credentials handed to the control channel
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            cert_hash: self.cert_hash.clone(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("cert_hash", &self.cert_hash)
            .finish()
    }
}

/// One local-to-remote port forwarding rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingSpec {
    /// Tunnel name
    pub name: String,
    /// Display name of the target node
    pub node_name: String,
    /// Routing identifier of the target node
    pub node_id: String,
    /// Transport protocol
    pub protocol: Protocol,
    /// Local port to bind
    pub local_port: u16,
    /// Port on the remote side
    pub remote_port: u16,
    /// Remote address, if configured
    pub remote_addr: Option<RemoteAddr>,
}

impl MappingSpec {
    /// Remote address used when dispatching the tunnel.
    ///
    /// Falls back to loopback; the relay URL itself only carries an address
    /// when one was configured.
    pub fn dispatch_addr(&self) -> IpAddr {
        self.remote_addr
            .as_ref()
            .map_or(DEFAULT_REMOTE_ADDR, RemoteAddr::ip)
    }
}

/// Fully validated configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelConfig {
    /// Relay server parameters
    pub server: ServerConfig,
    /// Mappings in startup order
    pub mappings: Vec<MappingSpec>,
}
