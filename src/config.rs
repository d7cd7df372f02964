//! Device connection attributes.
//!
//! The host hands every device over with a map of protocol sections. The S7
//! section lives under [`PROTOCOL`] and carries string-keyed JSON values that
//! are decoded leniently: numbers may arrive as JSON numbers or as numeric
//! strings.
//!
//! # Example
//!
//! ```
//! use s7_driver::{DeviceConfig, Protocols};
//! use serde_json::json;
//!
//! let mut protocols = Protocols::new();
//! protocols.insert(
//!     "s7".to_owned(),
//!     [
//!         ("Host".to_owned(), json!("192.168.0.10")),
//!         ("Port".to_owned(), json!("102")),
//!         ("Rack".to_owned(), json!(0)),
//!         ("Slot".to_owned(), json!(1)),
//!     ]
//!     .into_iter()
//!     .collect(),
//! );
//!
//! let config = DeviceConfig::from_protocols(&protocols).unwrap();
//! assert_eq!(config.port, 102);
//! assert_eq!(config.timeout_secs, 30);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::client::ClientConfig;
use crate::error::ConfigError;

/// Key of the S7 section in the protocols map.
pub const PROTOCOL: &str = "s7";
/// PLC host attribute.
pub const HOST: &str = "Host";
/// ISO-on-TCP port attribute.
pub const PORT: &str = "Port";
/// CPU rack attribute.
pub const RACK: &str = "Rack";
/// CPU slot attribute.
pub const SLOT: &str = "Slot";
/// Connect timeout attribute, in seconds.
pub const TIMEOUT: &str = "Timeout";
/// Idle timeout attribute, in seconds.
pub const IDLE_TIMEOUT: &str = "IdleTimeout";
/// Resource attribute holding the symbolic address.
pub const NODE_NAME: &str = "NodeName";

/// Used when a timeout attribute is absent or unusable.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub(crate) const MAX_RACK: u16 = 7;
pub(crate) const MAX_SLOT: u16 = 31;

/// Attributes of one protocol section.
pub type ProtocolProperties = HashMap<String, Value>;

/// Protocol sections of a device, keyed by protocol name.
pub type Protocols = HashMap<String, ProtocolProperties>;

/// A device as announced by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    /// Unique device name.
    pub name: String,
    /// Protocol sections.
    pub protocols: Protocols,
}

impl Device {
    /// Creates a device from its name and protocols.
    pub fn new(name: impl Into<String>, protocols: Protocols) -> Self {
        Self {
            name: name.into(),
            protocols,
        }
    }
}

/// Validated connection settings of one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// PLC host name or IP address.
    pub host: String,
    /// ISO-on-TCP port.
    pub port: u16,
    /// CPU rack.
    pub rack: u16,
    /// CPU slot.
    pub slot: u16,
    /// Connect timeout in seconds.
    pub timeout_secs: u64,
    /// Idle timeout in seconds.
    pub idle_timeout_secs: u64,
}

impl DeviceConfig {
    /// Creates a configuration with default timeouts.
    pub fn new(host: impl Into<String>, port: u16, rack: u16, slot: u16) -> Self {
        Self {
            host: host.into(),
            port,
            rack,
            slot,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Sets the connect timeout in seconds.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the idle timeout in seconds.
    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    /// Decodes and validates the S7 section of a device.
    ///
    /// `Host`, `Port`, `Rack` and `Slot` are required. `Timeout` and
    /// `IdleTimeout` fall back to [`DEFAULT_TIMEOUT_SECS`] with a warning.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingProtocol` without an `"s7"` section
    /// - `ConfigError::MissingAttribute` / `InvalidAttribute` for bad required keys
    pub fn from_protocols(protocols: &Protocols) -> Result<Self, ConfigError> {
        let props = protocols
            .get(PROTOCOL)
            .ok_or_else(|| ConfigError::MissingProtocol(PROTOCOL.to_owned()))?;

        let host = string_attribute(props, HOST)?;
        if host.trim().is_empty() {
            return Err(invalid(HOST, "empty host"));
        }
        let port = int_attribute(props, PORT)?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid(PORT, format!("{port} is not a TCP port")))?;
        let rack = bounded(props, RACK, MAX_RACK)?;
        let slot = bounded(props, SLOT, MAX_SLOT)?;

        Ok(Self {
            host,
            port,
            rack,
            slot,
            timeout_secs: timeout_attribute(props, TIMEOUT),
            idle_timeout_secs: timeout_attribute(props, IDLE_TIMEOUT),
        })
    }

    /// Connect timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Idle timeout.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Builds the client settings for this device.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig::new(self.host.clone(), self.rack, self.slot)
            .with_port(self.port)
            .with_timeout(self.timeout())
            .with_idle_timeout(self.idle_timeout())
    }
}

fn invalid(attribute: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidAttribute {
        attribute,
        reason: reason.into(),
    }
}

fn string_attribute(props: &ProtocolProperties, key: &'static str) -> Result<String, ConfigError> {
    match props.get(key) {
        None | Some(Value::Null) => Err(ConfigError::MissingAttribute(key)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(invalid(key, format!("{other} is not a string"))),
    }
}

fn int_attribute(props: &ProtocolProperties, key: &'static str) -> Result<i64, ConfigError> {
    let value = props.get(key).ok_or(ConfigError::MissingAttribute(key))?;
    cast_int(value).ok_or_else(|| invalid(key, format!("{value} is not an integer")))
}

fn bounded(props: &ProtocolProperties, key: &'static str, max: u16) -> Result<u16, ConfigError> {
    let value = int_attribute(props, key)?;
    u16::try_from(value)
        .ok()
        .filter(|v| *v <= max)
        .ok_or_else(|| invalid(key, format!("{value} is outside 0..={max}")))
}

fn timeout_attribute(props: &ProtocolProperties, key: &'static str) -> u64 {
    match props.get(key).and_then(cast_int).map(u64::try_from) {
        Some(Ok(secs)) => secs,
        _ => {
            warn!(
                attribute = key,
                default = DEFAULT_TIMEOUT_SECS,
                "timeout missing or not an integer, using default"
            );
            DEFAULT_TIMEOUT_SECS
        }
    }
}

/// Integer from a JSON number or numeric string. Fractions are truncated.
fn cast_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn protocols(props: Value) -> Protocols {
        let props: ProtocolProperties = serde_json::from_value(props).unwrap();
        let mut protocols = Protocols::new();
        protocols.insert(PROTOCOL.to_owned(), props);
        protocols
    }

    #[test]
    fn test_from_protocols_full() {
        let config = DeviceConfig::from_protocols(&protocols(json!({
            "Host": "10.0.0.5",
            "Port": 102,
            "Rack": "0",
            "Slot": 2,
            "Timeout": "5",
            "IdleTimeout": 60
        })))
        .unwrap();
        assert_eq!(
            config,
            DeviceConfig::new("10.0.0.5", 102, 0, 2)
                .with_timeout_secs(5)
                .with_idle_timeout_secs(60)
        );
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    #[traced_test]
    fn test_timeouts_default_with_warning() {
        let config = DeviceConfig::from_protocols(&protocols(json!({
            "Host": "plc",
            "Port": "102",
            "Rack": 0,
            "Slot": 1,
            "Timeout": "soon"
        })))
        .unwrap();
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.idle_timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(logs_contain("using default"));
    }

    #[test]
    fn test_missing_protocol() {
        let err = DeviceConfig::from_protocols(&Protocols::new()).unwrap_err();
        assert_eq!(err, ConfigError::MissingProtocol("s7".to_owned()));
    }

    #[test]
    fn test_missing_required_attributes() {
        let err = DeviceConfig::from_protocols(&protocols(json!({
            "Port": 102, "Rack": 0, "Slot": 1
        })))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingAttribute(HOST));

        let err = DeviceConfig::from_protocols(&protocols(json!({
            "Host": "plc", "Port": 102, "Rack": 0
        })))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingAttribute(SLOT));
    }

    #[test]
    fn test_invalid_required_attributes() {
        let err = DeviceConfig::from_protocols(&protocols(json!({
            "Host": "plc", "Port": "abc", "Rack": 0, "Slot": 1
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAttribute { attribute: PORT, .. }));

        let err = DeviceConfig::from_protocols(&protocols(json!({
            "Host": "plc", "Port": 70000, "Rack": 0, "Slot": 1
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAttribute { attribute: PORT, .. }));

        let err = DeviceConfig::from_protocols(&protocols(json!({
            "Host": "plc", "Port": 102, "Rack": 8, "Slot": 1
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAttribute { attribute: RACK, .. }));

        let err = DeviceConfig::from_protocols(&protocols(json!({
            "Host": "plc", "Port": 102, "Rack": 0, "Slot": -1
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAttribute { attribute: SLOT, .. }));

        let err = DeviceConfig::from_protocols(&protocols(json!({
            "Host": ["plc"], "Port": 102, "Rack": 0, "Slot": 1
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAttribute { attribute: HOST, .. }));
    }

    #[test]
    fn test_cast_int() {
        assert_eq!(cast_int(&json!(12)), Some(12));
        assert_eq!(cast_int(&json!(" 12 ")), Some(12));
        assert_eq!(cast_int(&json!(12.9)), Some(12));
        assert_eq!(cast_int(&json!("3.5")), Some(3));
        assert_eq!(cast_int(&json!(true)), Some(1));
        assert_eq!(cast_int(&json!(null)), None);
        assert_eq!(cast_int(&json!("x")), None);
    }

    #[test]
    fn test_to_client_config() {
        let client = DeviceConfig::new("plc", 1102, 0, 2)
            .with_timeout_secs(3)
            .to_client_config();
        assert_eq!(client.host, "plc");
        assert_eq!(client.port, 1102);
        assert_eq!(client.remote_tsap().unwrap(), 0x0102);
        assert_eq!(client.timeout, Duration::from_secs(3));
        assert_eq!(client.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_device_config_serde() {
        let config = DeviceConfig::new("plc", 102, 0, 1);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["host"], "plc");
        let back: DeviceConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
