//! # S7 Protocol Driver
//!
//! A Rust library that lets a device-management host read and write tag values
//! on Siemens S7 PLCs over ISO-on-TCP (RFC 1006).
//!
//! The crate is layered:
//!
//! - **Addressing** - symbolic tags such as `DB1.DBX100.3` parsed into typed
//!   descriptors
//! - **Codec** - typed scalars to and from the 4-byte item buffer, with range
//!   checks and no silent truncation
//! - **Wire** - TPKT/COTP framing, connection setup, multi-item read and write
//! - **Driver** - a connection registry, batched transactions with
//!   reconnect-on-failure retry, and the host callbacks
//!
//! ## Quick Start
//!
//! ```no_run
//! use s7_driver::{
//!     CommandRequest, CommandValue, Device, ProtocolDriver, Protocols, S7Driver, ScalarValue,
//!     ValueType,
//! };
//! use serde_json::json;
//!
//! fn main() -> s7_driver::DriverResult<()> {
//!     let mut protocols = Protocols::new();
//!     protocols.insert(
//!         "s7".to_owned(),
//!         [
//!             ("Host".to_owned(), json!("192.168.0.10")),
//!             ("Port".to_owned(), json!(102)),
//!             ("Rack".to_owned(), json!(0)),
//!             ("Slot".to_owned(), json!(1)),
//!         ]
//!         .into_iter()
//!         .collect(),
//!     );
//!
//!     let driver = S7Driver::new();
//!     driver.initialize(&[Device::new("plc1", protocols.clone())]);
//!
//!     let requests = [
//!         CommandRequest::new("Count", ValueType::Uint8).with_node_name("DB1.DBB0"),
//!         CommandRequest::new("Speed", ValueType::Uint16).with_node_name("DB1.DBW2"),
//!     ];
//!     driver.handle_write_commands(
//!         "plc1",
//!         &protocols,
//!         &requests,
//!         &[
//!             CommandValue::new("Count", ScalarValue::Uint8(7)),
//!             CommandValue::new("Speed", ScalarValue::Uint16(300)),
//!         ],
//!     )?;
//!
//!     let values = driver.handle_read_commands("plc1", &protocols, &requests)?;
//!     for value in values.into_iter().flatten() {
//!         println!("{} = {}", value.resource_name, value.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Addresses
//!
//! Only data blocks are supported. Inputs, outputs, merkers, timers and
//! counters are recognised and rejected.
//!
//! | Symbol | Element | Wire start |
//! |--------|---------|------------|
//! | `DB1.DBX100.3` | bit | `100 * 8 + 3` |
//! | `DB1.DBB4` | byte | `4 * 8` |
//! | `DB1.DBW2` | word | `2 * 8` |
//! | `DB300.DBD26` | double word | `26 * 8` |
//!
//! ## Low-level client
//!
//! [`Client`] can be used on its own. Each call produces exactly one request
//! and one response; the only implicit traffic is re-establishing a session
//! that has been idle for longer than its idle timeout.
//!
//! ```no_run
//! use s7_driver::{parse_address, Client, ClientConfig, DataItem};
//!
//! let mut client = Client::connect(ClientConfig::new("192.168.0.10", 0, 1))?;
//! let mut items = [DataItem::from_descriptor(&parse_address("DB1.DBX0.0").unwrap())];
//! client.read_multi(&mut items)?;
//! println!("bit = {}", items[0].data[0]);
//! # Ok::<(), s7_driver::S7Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Wire operations return [`S7Error`]; host callbacks return [`DriverError`],
//! which names the device and, where it applies, every offending resource.
//!
//! ## Logging
//!
//! The crate emits [`tracing`](https://docs.rs/tracing) events and installs no
//! subscriber.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod address;
mod batch;
mod client;
pub mod codec;
mod command;
mod config;
mod driver;
mod error;
pub mod header;
mod memory;
mod registry;
mod response;
mod transport;
mod value;

#[cfg(test)]
mod mock;

// Public re-exports
pub use address::{parse as parse_address, AddressDescriptor};
pub use batch::{BatchExecutor, RetryPolicy, MAX_ITEMS_PER_REQUEST};
pub use client::{Client, ClientConfig, ConnectionType, TcpConnector};
pub use command::{
    ConnectRequest, DataItem, ReadVarCommand, SetupCommunication, WriteVarCommand,
    DEFAULT_PDU_LENGTH, LOCAL_TSAP, MAX_ITEMS_PER_PDU,
};
pub use config::{
    Device, DeviceConfig, ProtocolProperties, Protocols, DEFAULT_TIMEOUT_SECS, NODE_NAME,
    PROTOCOL,
};
pub use driver::{ProtocolDriver, S7Driver};
pub use error::{
    AddressError, CodecError, ConfigError, DriverError, DriverResult, ItemError, ResourceFailure,
    Result, S7Error,
};
pub use header::S7Header;
pub use memory::{ElementSize, MemoryArea};
pub use registry::{
    Connection, ConnectionRegistry, Connector, RegistryStats, SharedConnection, SlotState,
};
pub use response::{check_connect_confirm, S7Response};
pub use transport::{TcpTransport, DEFAULT_S7_PORT, DEFAULT_TIMEOUT};
pub use value::{CommandRequest, CommandValue, ScalarValue, ValueType};
