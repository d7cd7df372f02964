//! Example: Writing and reading tags on an S7 PLC
//!
//! Run with: cargo run --example read_write -- 192.168.0.10
//!
//! Set `RUST_LOG=s7_driver=debug` to see the driver's connection and request
//! logs.
//!
//! This example demonstrates:
//! - Describing a device with its protocol attributes
//! - Writing several typed tags in one call
//! - Reading them back, including a value that does not fit its type
//! - Using the low-level client directly

use s7_driver::{
    parse_address, Client, CommandRequest, CommandValue, DataItem, Device, DeviceConfig,
    ProtocolDriver, Protocols, S7Driver, ScalarValue, ValueType,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.0.10".to_owned());

    // =========================================================================
    // Describe the device
    // =========================================================================

    let mut protocols = Protocols::new();
    protocols.insert(
        "s7".to_owned(),
        [
            ("Host".to_owned(), json!(host)),
            ("Port".to_owned(), json!("102")),
            ("Rack".to_owned(), json!(0)),
            ("Slot".to_owned(), json!(1)),
            ("Timeout".to_owned(), json!(5)),
            ("IdleTimeout".to_owned(), json!(30)),
        ]
        .into_iter()
        .collect(),
    );

    let driver = S7Driver::new();
    let live = driver.initialize(&[Device::new("plc1", protocols.clone())]);
    println!("{live} device(s) connected");

    // =========================================================================
    // Write
    // =========================================================================

    println!("\n=== Writing ===\n");

    let requests = [
        CommandRequest::new("Count", ValueType::Uint8).with_node_name("DB1.DBB0"),
        CommandRequest::new("Speed", ValueType::Uint16).with_node_name("DB1.DBW2"),
        CommandRequest::new("Running", ValueType::Bool).with_node_name("DB1.DBX4.0"),
        CommandRequest::new("Level", ValueType::Float32).with_node_name("DB1.DBD6"),
    ];
    let values = [
        CommandValue::new("Count", ScalarValue::Uint8(7)),
        CommandValue::new("Speed", ScalarValue::Uint16(300)),
        CommandValue::new("Running", ScalarValue::Bool(true)),
        CommandValue::new("Level", ScalarValue::Float32(12.5)),
    ];
    driver.handle_write_commands("plc1", &protocols, &requests, &values)?;
    println!("wrote {} tags", values.len());

    // =========================================================================
    // Read back
    // =========================================================================

    println!("\n=== Reading ===\n");

    for (request, value) in requests
        .iter()
        .zip(driver.handle_read_commands("plc1", &protocols, &requests)?)
    {
        match value {
            Some(v) => println!(
                "{:<8} {:<12} = {}",
                v.resource_name,
                request.node_name().unwrap_or("-"),
                v.value
            ),
            None => println!("{:<8} could not be decoded", request.resource_name),
        }
    }

    // Speed (300) read as Uint8 does not fit and comes back as None
    let narrow = [CommandRequest::new("Speed8", ValueType::Uint8).with_node_name("DB1.DBW2")];
    let result = driver.handle_read_commands("plc1", &protocols, &narrow)?;
    println!("Speed as Uint8: {:?}", result[0].as_ref().map(|v| &v.value));

    // =========================================================================
    // Low-level client
    // =========================================================================

    println!("\n=== Low-level client ===\n");

    let config = DeviceConfig::from_protocols(&protocols)?;
    let mut client = Client::connect(config.to_client_config())?;
    println!("negotiated PDU length: {}", client.pdu_length());

    let mut items = [
        DataItem::from_descriptor(&parse_address("DB1.DBB0")?),
        DataItem::from_descriptor(&parse_address("DB1.DBW2")?),
    ];
    client.read_multi(&mut items)?;
    for item in &items {
        println!(
            "DB{} start bit {}: {:02X?} ({:?})",
            item.db_number,
            item.start,
            &item.data[..item.size.byte_len()],
            item.error
        );
    }

    driver.stop(false)?;
    Ok(())
}
