//! Validation of the generic JSON document into the typed model
//!
//! Checks run in a fixed order so that the first reported error is
//! deterministic: presence and type of every required field, then port
//! ranges, then the optional address.

use serde_json::{Map, Value};

use super::model::{MappingSpec, RemoteAddr, ServerConfig, TunnelConfig};
use crate::error::ConfigError;
use crate::relay::split_access_key;
use crate::types::Protocol;

type Object = Map<String, Value>;

/// Parse and validate a configuration document
pub fn parse_config(content: &str) -> Result<TunnelConfig, ConfigError> {
    let document: Value = serde_json::from_str(content)?;
    let root = document.as_object().ok_or_else(|| {
        ConfigError::ParseFailure(format!("expected a JSON object, got {}", json_type(&document)))
    })?;

    let hostname = required_str(root, "hostname")?;
    let username = required_str(root, "username")?;
    let password = required_str(root, "password")?;
    let cert_hash = optional_str(root, "certhash")?;

    let (host, _) = split_access_key(&hostname);
    if host.is_empty() {
        return Err(ConfigError::InvalidHostname(hostname));
    }

    let entries = root
        .get("mappings")
        .and_then(Value::as_array)
        .ok_or(ConfigError::MissingOrInvalidMappings)?;

    let mut mappings = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match entry.as_object() {
            Some(fields) => mappings.push(validate_mapping(fields)?),
            None => tracing::warn!(
                "Skipping mapping entry {}: expected an object, got {}",
                index,
                json_type(entry)
            ),
        }
    }

    Ok(TunnelConfig {
        server: ServerConfig {
            hostname,
            username,
            password,
            cert_hash,
        },
        mappings,
    })
}

/// Validate a single mapping object
fn validate_mapping(fields: &Object) -> Result<MappingSpec, ConfigError> {
    let node_name = required_non_empty_str(fields, "nodeName")?;
    let name = required_non_empty_str(fields, "name")?;
    let node_id = required_non_empty_str(fields, "nodeId")?;
    let protocol = required_int(fields, "protocol")?;
    let local_port = required_int(fields, "localPort")?;
    let remote_port = required_int(fields, "remotePort")?;

    let local_port = port_in_range("localPort", local_port)?;
    let remote_port = port_in_range("remotePort", remote_port)?;

    let remote_addr = match fields.get("remoteIP") {
        None => None,
        Some(Value::String(raw)) => Some(
            raw.parse::<RemoteAddr>()
                .map_err(|_| ConfigError::InvalidAddressFormat(raw.clone()))?,
        ),
        Some(other) => {
            return Err(ConfigError::TypeMismatch {
                key: "remoteIP".to_string(),
                expected: "string",
                found: json_type(other),
            })
        }
    };

    let protocol = Protocol::from(protocol);
    if let Protocol::Unmapped(value) = protocol {
        tracing::warn!(
            "Mapping {} uses protocol {}; its relay URL will carry no port parameters",
            name,
            value
        );
    }

    Ok(MappingSpec {
        name,
        node_name,
        node_id,
        protocol,
        local_port,
        remote_port,
        remote_addr,
    })
}

fn required_str(object: &Object, key: &str) -> Result<String, ConfigError> {
    match object.get(key) {
        None => Err(ConfigError::MissingKey(key.to_string())),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: "string",
            found: json_type(other),
        }),
    }
}

fn required_non_empty_str(object: &Object, key: &str) -> Result<String, ConfigError> {
    let value = required_str(object, key)?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

/// Absent is `None`; any present value, `null` included, must be a string.
fn optional_str(object: &Object, key: &str) -> Result<Option<String>, ConfigError> {
    match object.get(key) {
        None => Ok(None),
        Some(_) => required_str(object, key).map(Some),
    }
}

/// Integers must convert to i64 without loss; `8080.0` is rejected.
fn required_int(object: &Object, key: &str) -> Result<i64, ConfigError> {
    let value = object
        .get(key)
        .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;

    value.as_i64().ok_or_else(|| ConfigError::TypeMismatch {
        key: key.to_string(),
        expected: "integer",
        found: json_type(value),
    })
}

fn port_in_range(field: &'static str, value: i64) -> Result<u16, ConfigError> {
    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::InvalidPortRange { field, value }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
