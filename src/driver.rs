//! Host-facing driver service.
//!
//! [`S7Driver`] is constructed once by the host and shared by reference; it
//! owns the connection registry and the retry policy. Every host callback of
//! [`ProtocolDriver`] maps onto it.
//!
//! # Example
//!
//! ```no_run
//! use s7_driver::{CommandRequest, Device, ProtocolDriver, Protocols, S7Driver, ValueType};
//! use serde_json::json;
//!
//! let mut protocols = Protocols::new();
//! protocols.insert(
//!     "s7".to_owned(),
//!     [
//!         ("Host".to_owned(), json!("192.168.0.10")),
//!         ("Port".to_owned(), json!(102)),
//!         ("Rack".to_owned(), json!(0)),
//!         ("Slot".to_owned(), json!(1)),
//!     ]
//!     .into_iter()
//!     .collect(),
//! );
//!
//! let driver = S7Driver::new();
//! driver.initialize(&[Device::new("plc1", protocols.clone())]);
//!
//! let requests = [CommandRequest::new("Speed", ValueType::Uint16).with_node_name("DB1.DBW2")];
//! let values = driver.handle_read_commands("plc1", &protocols, &requests)?;
//! # Ok::<(), s7_driver::DriverError>(())
//! ```

use tracing::{debug, info, warn};

use crate::batch::{BatchExecutor, RetryPolicy};
use crate::client::TcpConnector;
use crate::config::{Device, DeviceConfig, Protocols};
use crate::error::{DriverError, DriverResult};
use crate::registry::{ConnectionRegistry, Connector};
use crate::value::{CommandRequest, CommandValue};

/// Callbacks a device host invokes on a protocol driver.
pub trait ProtocolDriver {
    /// Connects every known device at startup and returns how many are live.
    fn initialize(&self, devices: &[Device]) -> usize;

    /// Reads the requested resources of `device`.
    fn handle_read_commands(
        &self,
        device: &str,
        protocols: &Protocols,
        requests: &[CommandRequest],
    ) -> DriverResult<Vec<Option<CommandValue>>>;

    /// Writes `params[i]` to `requests[i]` on `device`.
    fn handle_write_commands(
        &self,
        device: &str,
        protocols: &Protocols,
        requests: &[CommandRequest],
        params: &[CommandValue],
    ) -> DriverResult<()>;

    /// A device was added.
    fn add_device(&self, device: &str, protocols: &Protocols) -> DriverResult<()>;

    /// A device changed.
    fn update_device(&self, device: &str, protocols: &Protocols) -> DriverResult<()>;

    /// A device was removed.
    fn remove_device(&self, device: &str) -> DriverResult<()>;

    /// Checks the connection attributes of a device.
    fn validate_device(&self, device: &Device) -> DriverResult<()>;

    /// Drops every connection.
    fn stop(&self, force: bool) -> DriverResult<()>;
}

/// S7 protocol driver.
pub struct S7Driver<K: Connector = TcpConnector> {
    registry: ConnectionRegistry<K>,
    retry: RetryPolicy,
}

impl S7Driver<TcpConnector> {
    /// Creates a driver talking to PLCs over TCP.
    pub fn new() -> Self {
        Self::with_connector(TcpConnector)
    }
}

impl Default for S7Driver<TcpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Connector> S7Driver<K> {
    /// Creates a driver building its connections with `connector`.
    pub fn with_connector(connector: K) -> Self {
        Self {
            registry: ConnectionRegistry::new(connector),
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the retry policy used for every request.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry<K> {
        &self.registry
    }

    /// Returns the retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn device_config(&self, device: &str, protocols: &Protocols) -> DriverResult<DeviceConfig> {
        DeviceConfig::from_protocols(protocols).map_err(|e| {
            warn!(device, error = %e, "invalid device configuration");
            DriverError::config(device, e)
        })
    }
}

impl<K: Connector> ProtocolDriver for S7Driver<K> {
    fn initialize(&self, devices: &[Device]) -> usize {
        let configured: Vec<_> = devices
            .iter()
            .filter_map(|device| match DeviceConfig::from_protocols(&device.protocols) {
                Ok(config) => Some((device.name.clone(), config)),
                Err(e) => {
                    warn!(device = %device.name, error = %e, "device skipped");
                    None
                }
            })
            .collect();
        let live = self.registry.replace_all(configured);
        info!(devices = devices.len(), live, "driver initialized");
        live
    }

    fn handle_read_commands(
        &self,
        device: &str,
        protocols: &Protocols,
        requests: &[CommandRequest],
    ) -> DriverResult<Vec<Option<CommandValue>>> {
        debug!(device, requests = requests.len(), "read commands");
        let config = self.device_config(device, protocols)?;
        BatchExecutor::new(&self.registry, &self.retry, device, &config).read(requests)
    }

    fn handle_write_commands(
        &self,
        device: &str,
        protocols: &Protocols,
        requests: &[CommandRequest],
        params: &[CommandValue],
    ) -> DriverResult<()> {
        debug!(device, requests = requests.len(), "write commands");
        let config = self.device_config(device, protocols)?;
        BatchExecutor::new(&self.registry, &self.retry, device, &config).write(requests, params)
    }

    fn add_device(&self, device: &str, protocols: &Protocols) -> DriverResult<()> {
        debug!(device, "device added");
        let config = self.device_config(device, protocols)?;
        self.registry.register(device);
        self.registry
            .replace(device, &config)
            .map_err(|e| DriverError::from_client(device, Vec::new(), 1, e))
    }

    fn update_device(&self, device: &str, protocols: &Protocols) -> DriverResult<()> {
        debug!(device, "device updated");
        let config = self.device_config(device, protocols)?;
        self.registry
            .replace(device, &config)
            .map_err(|e| DriverError::from_client(device, Vec::new(), 1, e))
    }

    fn remove_device(&self, device: &str) -> DriverResult<()> {
        debug!(device, "device removed");
        self.registry.remove(device);
        Ok(())
    }

    fn validate_device(&self, device: &Device) -> DriverResult<()> {
        debug!(device = %device.name, "validating device");
        self.device_config(&device.name, &device.protocols).map(|_| ())
    }

    fn stop(&self, force: bool) -> DriverResult<()> {
        debug!(force, "driver stopping");
        self.registry.clear();
        Ok(())
    }
}

impl<K: Connector> std::fmt::Debug for S7Driver<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S7Driver")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::memory::ElementSize;
    use crate::mock::MockConnector;
    use crate::registry::SlotState;
    use crate::value::{ScalarValue, ValueType};
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use tracing_test::traced_test;

    fn protocols() -> Protocols {
        let mut protocols = Protocols::new();
        protocols.insert(
            "s7".to_owned(),
            serde_json::from_value(json!({
                "Host": "127.0.0.1", "Port": "102", "Rack": 0, "Slot": 1
            }))
            .unwrap(),
        );
        protocols
    }

    fn driver() -> (MockConnector, S7Driver<MockConnector>) {
        let connector = MockConnector::new();
        (connector.clone(), S7Driver::with_connector(connector))
    }

    #[test]
    fn test_plc1_write_then_read() {
        let (connector, driver) = driver();
        let requests = [
            CommandRequest::new("small", ValueType::Uint8).with_node_name("DB1.DBB0"),
            CommandRequest::new("speed", ValueType::Uint16).with_node_name("DB1.DBW2"),
        ];
        let params = [
            CommandValue::new("small", ScalarValue::Uint8(7)),
            CommandValue::new("speed", ScalarValue::Uint16(300)),
        ];

        driver
            .handle_write_commands("plc1", &protocols(), &requests, &params)
            .unwrap();

        assert_eq!(connector.transactions(), vec![2]);
        let sent = connector.sent_items(0);
        assert_eq!((sent[0].start / 8, sent[0].size), (0, ElementSize::Byte));
        assert_eq!((sent[1].start / 8, sent[1].size), (2, ElementSize::Word));
        assert_eq!(connector.peek(1, 0, 4), vec![7, 0, 0x01, 0x2C]);

        let values = driver
            .handle_read_commands("plc1", &protocols(), &requests)
            .unwrap();
        let values: Vec<_> = values.into_iter().map(|v| v.unwrap()).collect();
        assert_eq!(values[0].value, ScalarValue::Uint8(7));
        assert_eq!(values[0].value_type, ValueType::Uint8);
        assert_eq!(values[1].value, ScalarValue::Uint16(300));
        assert_eq!(values[1].resource_name, "speed");
        assert!(values[1].origin > 0);
        assert_eq!(connector.connects(), 1);
    }

    #[test]
    fn test_invalid_protocols_rejected() {
        let (connector, driver) = driver();
        let err = driver
            .handle_read_commands(
                "plc1",
                &Protocols::new(),
                &[CommandRequest::new("a", ValueType::Uint8).with_node_name("DB1.DBB0")],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::Config {
                source: ConfigError::MissingProtocol(_),
                ..
            }
        ));
        assert_eq!(err.device(), "plc1");
        assert_eq!(connector.connects(), 0);
    }

    #[test]
    #[traced_test]
    fn test_initialize_skips_invalid_devices() {
        let (connector, driver) = driver();
        connector.fail_connects(1);
        let devices = [
            Device::new("broken", Protocols::new()),
            Device::new("plc1", protocols()),
            Device::new("plc2", protocols()),
        ];

        assert_eq!(driver.initialize(&devices), 1);
        assert_eq!(driver.registry().state("broken"), None);
        assert_eq!(driver.registry().state("plc1"), Some(SlotState::Absent));
        assert_eq!(driver.registry().state("plc2"), Some(SlotState::Live));
        assert!(logs_contain("device skipped"));
    }

    #[test]
    fn test_device_lifecycle() {
        let (connector, driver) = driver();

        driver.validate_device(&Device::new("plc1", protocols())).unwrap();
        assert!(driver
            .validate_device(&Device::new("plc1", Protocols::new()))
            .is_err());

        connector.fail_connects(1);
        let err = driver.add_device("plc1", &protocols()).unwrap_err();
        assert!(matches!(err, DriverError::Transport { attempts: 1, .. }));
        assert_eq!(driver.registry().state("plc1"), Some(SlotState::Absent));

        driver.update_device("plc1", &protocols()).unwrap();
        assert_eq!(driver.registry().state("plc1"), Some(SlotState::Live));

        driver.remove_device("plc1").unwrap();
        assert_eq!(driver.registry().state("plc1"), None);

        driver.add_device("plc2", &protocols()).unwrap();
        driver.stop(false).unwrap();
        assert!(driver.registry().devices().is_empty());
    }

    #[test]
    fn test_concurrent_devices() {
        let (connector, driver) = driver();
        connector.poke(5, 0, &[0x00, 0x2A]);
        let driver = Arc::new(driver);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let driver = Arc::clone(&driver);
                thread::spawn(move || {
                    let device = format!("plc{}", i % 2);
                    let request =
                        CommandRequest::new("v", ValueType::Int16).with_node_name("DB5.DBW0");
                    driver
                        .handle_read_commands(&device, &protocols(), &[request])
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            let values = handle.join().unwrap();
            assert_eq!(values[0].as_ref().unwrap().value, ScalarValue::Int16(42));
        }
        assert_eq!(driver.registry().devices(), vec!["plc0", "plc1"]);
    }

    #[test]
    fn test_retry_policy_is_used() {
        let connector = MockConnector::new();
        let driver = S7Driver::with_connector(connector.clone())
            .with_retry_policy(RetryPolicy::default().with_max_attempts(5));
        connector.fail_transactions(4);

        let values = driver
            .handle_read_commands(
                "plc1",
                &protocols(),
                &[CommandRequest::new("a", ValueType::Uint8).with_node_name("DB1.DBB0")],
            )
            .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(driver.retry_policy().max_attempts, 5);
        assert_eq!(driver.registry().stats().invalidations, 4);
    }
}
