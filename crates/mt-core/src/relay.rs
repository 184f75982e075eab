//! Relay endpoint derivation
//!
//! A configured hostname may carry an access key as `<host>?key=<key>`. The
//! key is split off and re-attached as a query parameter on every derived URL.

use std::fmt;

use crate::config::MappingSpec;

/// Literal separating the host from an embedded access key
pub const ACCESS_KEY_MARKER: &str = "?key=";

/// Path of the control endpoint
pub const CONTROL_PATH: &str = "/control.ashx";

/// Path of the relay endpoint
pub const RELAY_PATH: &str = "/meshrelay.ashx";

/// A composed WebSocket endpoint. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayUrl(String);

impl RelayUrl {
    /// Get the URL as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelayUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Split a configured hostname into host and optional access key.
///
/// Only the first marker counts; everything after it is the key.
pub fn split_access_key(hostname: &str) -> (&str, Option<&str>) {
    match hostname.find(ACCESS_KEY_MARKER) {
        Some(index) => (
            &hostname[..index],
            Some(&hostname[index + ACCESS_KEY_MARKER.len()..]),
        ),
        None => (hostname, None),
    }
}

/// URL of the control endpoint
pub fn control_url(hostname: &str) -> RelayUrl {
    let url = match split_access_key(hostname) {
        (host, Some(key)) => format!("wss://{}{}?key={}", host, CONTROL_PATH, key),
        (host, None) => format!("wss://{}{}", host, CONTROL_PATH),
    };
    RelayUrl(url)
}

/// URL of the relay session for one mapping.
///
/// Parameter order is `nodeid`, `key`, then the protocol port and address.
/// Unmapped protocols get no port parameters.
pub fn relay_url(hostname: &str, mapping: &MappingSpec) -> RelayUrl {
    let (host, key) = split_access_key(hostname);

    let mut url = format!("wss://{}{}?nodeid={}", host, RELAY_PATH, mapping.node_id);
    if let Some(key) = key {
        url.push_str("&key=");
        url.push_str(key);
    }

    if let Some(prefix) = mapping.protocol.query_prefix() {
        url.push_str(&format!("&{}port={}", prefix, mapping.remote_port));
        if let Some(addr) = &mapping.remote_addr {
            url.push_str(&format!("&{}addr={}", prefix, addr.as_str()));
        }
    }

    RelayUrl(url)
}
