//! Per-device connection registry.
//!
//! The registry maps each device name to at most one live connection. The map
//! lock is held only while looking up or storing a slot; connecting and every
//! transaction happen outside of it, guarded by the connection's own lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::command::DataItem;
use crate::config::DeviceConfig;
use crate::error::Result;

/// A session able to run multi-item transactions.
pub trait Connection: Send {
    /// Reads every item in one transaction, filling buffers and item errors.
    fn read_multi(&mut self, items: &mut [DataItem]) -> Result<()>;

    /// Writes every item in one transaction, recording item errors.
    fn write_multi(&mut self, items: &mut [DataItem]) -> Result<()>;
}

/// Builds connections for devices.
pub trait Connector: Send + Sync {
    /// Connection type produced.
    type Connection: Connection + 'static;

    /// Connects and completes every handshake.
    fn connect(&self, device: &str, config: &DeviceConfig) -> Result<Self::Connection>;
}

/// A live connection shared between the registry and running transactions.
pub type SharedConnection<C> = Arc<Mutex<C>>;

enum Slot<C> {
    Absent,
    Broken,
    Live(SharedConnection<C>),
}

impl<C> Slot<C> {
    fn state(&self) -> SlotState {
        match self {
            Slot::Absent => SlotState::Absent,
            Slot::Broken => SlotState::Broken,
            Slot::Live(_) => SlotState::Live,
        }
    }
}

/// Observable state of a device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Known device, never connected or last connect failed.
    Absent,
    /// Connection was dropped after a transport failure.
    Broken,
    /// A connection is available.
    Live,
}

/// Counters kept by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Connections successfully built.
    pub connections_created: u64,
    /// Slots marked broken.
    pub invalidations: u64,
    /// Failed connection attempts.
    pub connect_failures: u64,
}

struct Inner<C> {
    slots: HashMap<String, Slot<C>>,
    stats: RegistryStats,
}

/// Device name to connection map.
pub struct ConnectionRegistry<K: Connector> {
    connector: K,
    inner: Mutex<Inner<K::Connection>>,
}

impl<K: Connector> ConnectionRegistry<K> {
    /// Creates an empty registry.
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                stats: RegistryStats::default(),
            }),
        }
    }

    /// Returns the connector used to build connections.
    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Returns the live connection of `device`, connecting first if needed.
    ///
    /// Two callers missing at the same time both connect; the later store
    /// wins and the earlier connection is dropped once its callers finish.
    ///
    /// # Errors
    ///
    /// Returns the connect error; the slot is left without a connection.
    pub fn get_or_create(
        &self,
        device: &str,
        config: &DeviceConfig,
    ) -> Result<SharedConnection<K::Connection>> {
        if let Some(Slot::Live(conn)) = self.inner.lock().slots.get(device) {
            return Ok(Arc::clone(conn));
        }

        debug!(device, "no live connection, connecting");
        let conn = self.build(device, config)?;
        self.inner
            .lock()
            .slots
            .insert(device.to_owned(), Slot::Live(Arc::clone(&conn)));
        Ok(conn)
    }

    fn build(
        &self,
        device: &str,
        config: &DeviceConfig,
    ) -> Result<SharedConnection<K::Connection>> {
        match self.connector.connect(device, config) {
            Ok(conn) => {
                self.inner.lock().stats.connections_created += 1;
                info!(device, host = %config.host, "connection established");
                Ok(Arc::new(Mutex::new(conn)))
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.stats.connect_failures += 1;
                inner
                    .slots
                    .entry(device.to_owned())
                    .or_insert(Slot::Absent);
                drop(inner);
                warn!(device, error = %e, "connection failed");
                Err(e)
            }
        }
    }

    /// Marks the connection of `device` as broken.
    ///
    /// Returns `false` if the device is unknown.
    pub fn invalidate(&self, device: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(device) else {
            return false;
        };
        *slot = Slot::Broken;
        inner.stats.invalidations += 1;
        drop(inner);
        debug!(device, "connection invalidated");
        true
    }

    /// Marks `device` as known without connecting. A live slot is kept.
    pub fn register(&self, device: &str) {
        self.inner
            .lock()
            .slots
            .entry(device.to_owned())
            .or_insert(Slot::Absent);
    }

    /// Builds a fresh connection and swaps it in.
    ///
    /// # Errors
    ///
    /// Returns the connect error and leaves the current slot untouched.
    pub fn replace(&self, device: &str, config: &DeviceConfig) -> Result<()> {
        let conn = self.build(device, config)?;
        self.inner
            .lock()
            .slots
            .insert(device.to_owned(), Slot::Live(conn));
        Ok(())
    }

    /// Connects every given device and returns how many are live.
    ///
    /// Failures are logged; those devices stay registered without a
    /// connection and are retried on first use.
    pub fn replace_all<I>(&self, devices: I) -> usize
    where
        I: IntoIterator<Item = (String, DeviceConfig)>,
    {
        let mut live = 0;
        for (device, config) in devices {
            self.register(&device);
            match self.replace(&device, &config) {
                Ok(()) => live += 1,
                Err(e) => warn!(device = %device, error = %e, "device left without connection"),
            }
        }
        live
    }

    /// Drops the entry of `device`. Returns whether it existed.
    pub fn remove(&self, device: &str) -> bool {
        self.inner.lock().slots.remove(device).is_some()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.lock().slots.clear();
    }

    /// Returns the slot state of `device`, `None` if unknown.
    pub fn state(&self, device: &str) -> Option<SlotState> {
        self.inner.lock().slots.get(device).map(Slot::state)
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> RegistryStats {
        self.inner.lock().stats
    }

    /// Returns the known device names, sorted.
    pub fn devices(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.lock().slots.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<K: Connector> fmt::Debug for ConnectionRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        let slots: HashMap<_, _> = inner
            .slots
            .iter()
            .map(|(name, slot)| (name.as_str(), slot.state()))
            .collect();
        f.debug_struct("ConnectionRegistry")
            .field("slots", &slots)
            .field("stats", &inner.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;
    use tracing_test::traced_test;

    fn config() -> DeviceConfig {
        DeviceConfig::new("127.0.0.1", 102, 0, 1)
    }

    #[test]
    fn test_get_or_create_caches() {
        let connector = MockConnector::new();
        let registry = ConnectionRegistry::new(connector.clone());

        let a = registry.get_or_create("plc1", &config()).unwrap();
        let b = registry.get_or_create("plc1", &config()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.connects(), 1);
        assert_eq!(registry.state("plc1"), Some(SlotState::Live));
        assert_eq!(registry.stats().connections_created, 1);
    }

    #[test]
    fn test_invalidate_forces_reconnect() {
        let connector = MockConnector::new();
        let registry = ConnectionRegistry::new(connector.clone());

        let first = registry.get_or_create("plc1", &config()).unwrap();
        assert!(registry.invalidate("plc1"));
        assert_eq!(registry.state("plc1"), Some(SlotState::Broken));

        let second = registry.get_or_create("plc1", &config()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connects(), 2);
        assert_eq!(registry.stats().invalidations, 1);
    }

    #[test]
    fn test_invalidate_unknown_device() {
        let registry = ConnectionRegistry::new(MockConnector::new());
        assert!(!registry.invalidate("ghost"));
        assert_eq!(registry.stats().invalidations, 0);
        assert_eq!(registry.state("ghost"), None);
    }

    #[test]
    #[traced_test]
    fn test_connect_failure_leaves_slot_empty() {
        let connector = MockConnector::new();
        connector.fail_connects(1);
        let registry = ConnectionRegistry::new(connector.clone());

        assert!(registry.get_or_create("plc1", &config()).is_err());
        assert_eq!(registry.state("plc1"), Some(SlotState::Absent));
        assert_eq!(registry.stats().connect_failures, 1);
        assert!(logs_contain("connection failed"));

        registry.get_or_create("plc1", &config()).unwrap();
        assert_eq!(registry.state("plc1"), Some(SlotState::Live));
    }

    #[test]
    fn test_replace_keeps_slot_on_failure() {
        let connector = MockConnector::new();
        let registry = ConnectionRegistry::new(connector.clone());

        let original = registry.get_or_create("plc1", &config()).unwrap();
        connector.fail_connects(1);
        assert!(registry.replace("plc1", &config()).is_err());
        let current = registry.get_or_create("plc1", &config()).unwrap();
        assert!(Arc::ptr_eq(&original, &current));

        registry.replace("plc1", &config()).unwrap();
        let replaced = registry.get_or_create("plc1", &config()).unwrap();
        assert!(!Arc::ptr_eq(&original, &replaced));
    }

    #[test]
    fn test_replace_all_counts_live() {
        let connector = MockConnector::new();
        connector.fail_connects(1);
        let registry = ConnectionRegistry::new(connector);

        let live = registry.replace_all(vec![
            ("plc1".to_owned(), config()),
            ("plc2".to_owned(), config()),
            ("plc3".to_owned(), config()),
        ]);
        assert_eq!(live, 2);
        assert_eq!(registry.state("plc1"), Some(SlotState::Absent));
        assert_eq!(registry.state("plc2"), Some(SlotState::Live));
        assert_eq!(registry.devices(), vec!["plc1", "plc2", "plc3"]);
    }

    #[test]
    fn test_register_remove_clear() {
        let registry = ConnectionRegistry::new(MockConnector::new());
        registry.register("plc1");
        assert_eq!(registry.state("plc1"), Some(SlotState::Absent));

        registry.get_or_create("plc2", &config()).unwrap();
        registry.register("plc2");
        assert_eq!(registry.state("plc2"), Some(SlotState::Live));

        assert!(registry.remove("plc1"));
        assert!(!registry.remove("plc1"));
        registry.clear();
        assert!(registry.devices().is_empty());
    }

    #[test]
    fn test_registry_debug() {
        let registry = ConnectionRegistry::new(MockConnector::new());
        registry.register("plc1");
        let debug_str = format!("{:?}", registry);
        assert!(debug_str.contains("plc1"));
        assert!(debug_str.contains("Absent"));
    }
}
