//! Blocking S7 client for Siemens PLCs.
//!
//! The [`Client`] owns one ISO-on-TCP session:
//! - TCP connect, COTP connection request and setup communication
//! - PDU reference correlation and header error checks
//! - multi-item read/write with per-item return codes
//! - a transparent re-establish once the session has been idle too long
//!
//! # Example
//!
//! ```no_run
//! use s7_driver::{parse_address, Client, ClientConfig, DataItem};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new("192.168.0.10", 0, 1).with_timeout(Duration::from_secs(5));
//! let mut client = Client::connect(config)?;
//!
//! let mut items = [
//!     DataItem::from_descriptor(&parse_address("DB1.DBB0").unwrap()),
//!     DataItem::from_descriptor(&parse_address("DB1.DBW2").unwrap()),
//! ];
//! client.read_multi(&mut items)?;
//! println!("DB1.DBW2 = {:02X?}", &items[1].data[..2]);
//! # Ok::<(), s7_driver::S7Error>(())
//! ```

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::command::{
    ConnectRequest, DataItem, ReadVarCommand, SetupCommunication, WriteVarCommand,
    DEFAULT_PDU_LENGTH, FUNCTION_READ_VAR, FUNCTION_WRITE_VAR, LOCAL_TSAP,
};
use crate::config::{DeviceConfig, MAX_RACK, MAX_SLOT};
use crate::error::{Result, S7Error};
use crate::header::{unwrap_data, wrap_data};
use crate::registry::{Connection, Connector};
use crate::response::{check_connect_confirm, S7Response};
use crate::transport::{TcpTransport, DEFAULT_S7_PORT, DEFAULT_TIMEOUT};

/// Role the client takes towards the CPU; part of the remote TSAP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    /// Programming device.
    #[default]
    Pg,
    /// Operator panel.
    Op,
    /// S7 basic communication.
    Basic,
}

impl ConnectionType {
    /// Returns the TSAP high byte.
    pub fn code(self) -> u16 {
        match self {
            ConnectionType::Pg => 0x01,
            ConnectionType::Op => 0x02,
            ConnectionType::Basic => 0x03,
        }
    }
}

/// Configuration for creating an S7 client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// PLC host name or IP address.
    pub host: String,
    /// ISO-on-TCP port.
    pub port: u16,
    /// CPU rack.
    pub rack: u16,
    /// CPU slot.
    pub slot: u16,
    /// Connection role.
    pub connection_type: ConnectionType,
    /// Bound for the connect, the handshake and each socket operation.
    pub timeout: Duration,
    /// Session age without traffic after which the client reconnects first.
    pub idle_timeout: Duration,
    /// PDU length requested during setup.
    pub pdu_length: u16,
}

impl ClientConfig {
    /// Creates a configuration with default port, timeouts and PDU length.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_driver::ClientConfig;
    ///
    /// let config = ClientConfig::new("192.168.0.10", 0, 1);
    /// assert_eq!(config.port, 102);
    /// assert_eq!(config.remote_tsap().unwrap(), 0x0101);
    /// ```
    pub fn new(host: impl Into<String>, rack: u16, slot: u16) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_S7_PORT,
            rack,
            slot,
            connection_type: ConnectionType::default(),
            timeout: DEFAULT_TIMEOUT,
            idle_timeout: DEFAULT_TIMEOUT,
            pdu_length: DEFAULT_PDU_LENGTH,
        }
    }

    /// Sets a custom port (default is 102).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the connect and socket timeout (default is 30 seconds).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the idle timeout (default is 30 seconds).
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the connection role (default is PG).
    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    /// Sets the requested PDU length (default is 480).
    pub fn with_pdu_length(mut self, pdu_length: u16) -> Self {
        self.pdu_length = pdu_length;
        self
    }

    /// Remote TSAP: `(connection_type << 8) + rack * 0x20 + slot`.
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidParameter` if the rack is above 7 or the slot
    /// above 31.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_driver::{ClientConfig, ConnectionType};
    ///
    /// let config = ClientConfig::new("plc", 0, 2).with_connection_type(ConnectionType::Op);
    /// assert_eq!(config.remote_tsap().unwrap(), 0x0202);
    /// assert!(ClientConfig::new("plc", 8, 0).remote_tsap().is_err());
    /// ```
    pub fn remote_tsap(&self) -> Result<u16> {
        if self.rack > MAX_RACK {
            return Err(S7Error::invalid_parameter(
                "rack",
                format!("{} is above {MAX_RACK}", self.rack),
            ));
        }
        if self.slot > MAX_SLOT {
            return Err(S7Error::invalid_parameter(
                "slot",
                format!("{} is above {MAX_SLOT}", self.slot),
            ));
        }
        Ok((self.connection_type.code() << 8) + self.rack * 0x20 + self.slot)
    }

    fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                S7Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for host '{}'", self.host),
                ))
            })
    }
}

/// An established S7 session.
///
/// Each call produces one request and one response. The session is rebuilt
/// before a request once it has been idle longer than
/// [`ClientConfig::idle_timeout`]; no other retries happen here.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    transport: TcpTransport,
    pdu_length: u16,
    pdu_ref: u16,
}

impl Client {
    /// Connects and performs the ISO and S7 handshakes.
    ///
    /// # Errors
    ///
    /// - `S7Error::IsoConnectionFailed` if the PLC refuses the TSAP
    /// - `S7Error::PduNegotiationFailed` if setup communication fails
    /// - `S7Error::Timeout` or `S7Error::Io` on network failures
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let (transport, pdu_length) = establish(&config)?;
        Ok(Self {
            config,
            transport,
            pdu_length,
            pdu_ref: 1,
        })
    }

    /// PDU length agreed with the PLC.
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    /// Returns the configuration the session was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn next_pdu_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1).max(1);
        self.pdu_ref
    }

    fn refresh_if_idle(&mut self) -> Result<()> {
        let idle = self.transport.idle_for();
        if idle <= self.config.idle_timeout {
            return Ok(());
        }
        debug!(
            host = %self.config.host,
            idle_ms = idle.as_millis() as u64,
            "session idle, re-establishing"
        );
        let (transport, pdu_length) = establish(&self.config)?;
        self.transport = transport;
        self.pdu_length = pdu_length;
        Ok(())
    }

    fn check_pdu_size(&self, required: usize) -> Result<()> {
        if required > usize::from(self.pdu_length) {
            return Err(S7Error::PduTooLarge {
                required,
                negotiated: self.pdu_length,
            });
        }
        Ok(())
    }

    fn exchange(&mut self, pdu: &[u8], pdu_ref: u16, function: u8) -> Result<S7Response> {
        let frame = self.transport.send_receive(&wrap_data(pdu)?)?;
        let response = S7Response::from_bytes(unwrap_data(&frame)?)?;
        response.check_pdu_ref(pdu_ref)?;
        response.check_error()?;
        response.check_function(function)?;
        Ok(response)
    }

    /// Reads several items in one request, filling their buffers in place.
    ///
    /// Item-level failures are recorded in [`DataItem::error`] and do not fail
    /// the call.
    ///
    /// # Errors
    ///
    /// - `S7Error::InvalidParameter` for an empty or oversized item list
    /// - `S7Error::PduTooLarge` if request or response exceed the PDU
    /// - `S7Error::PlcError` if the PLC rejects the request
    /// - transport errors otherwise
    pub fn read_multi(&mut self, items: &mut [DataItem]) -> Result<()> {
        self.refresh_if_idle()?;
        let pdu_ref = self.next_pdu_ref();
        let cmd = ReadVarCommand::new(pdu_ref, items)?;
        self.check_pdu_size(cmd.request_size().max(cmd.response_size()))?;

        let response = self.exchange(&cmd.to_bytes(), pdu_ref, FUNCTION_READ_VAR)?;
        response.fill_read_items(items)
    }

    /// Writes several items in one request from their buffers.
    ///
    /// # Errors
    ///
    /// Same as [`Client::read_multi`].
    pub fn write_multi(&mut self, items: &mut [DataItem]) -> Result<()> {
        self.refresh_if_idle()?;
        let pdu_ref = self.next_pdu_ref();
        let cmd = WriteVarCommand::new(pdu_ref, items)?;
        self.check_pdu_size(cmd.request_size().max(cmd.response_size()))?;

        let response = self.exchange(&cmd.to_bytes(), pdu_ref, FUNCTION_WRITE_VAR)?;
        response.apply_write_results(items)
    }
}

/// Opens the TCP connection and runs both handshakes.
fn establish(config: &ClientConfig) -> Result<(TcpTransport, u16)> {
    let remote_tsap = config.remote_tsap()?;
    let addr = config.socket_addr()?;
    let mut transport = TcpTransport::connect(addr, config.timeout)?;

    let request = ConnectRequest::new(LOCAL_TSAP, remote_tsap);
    let confirm = transport.send_receive(&request.to_bytes())?;
    check_connect_confirm(&confirm)?;

    let setup = SetupCommunication::new(0, config.pdu_length);
    let frame = transport.send_receive(&wrap_data(&setup.to_bytes())?)?;
    let response = S7Response::from_bytes(unwrap_data(&frame)?)
        .map_err(|e| S7Error::negotiation_failed(e.to_string()))?;
    response
        .check_error()
        .map_err(|e| S7Error::negotiation_failed(e.to_string()))?;
    let pdu_length = response.negotiated_pdu_length()?.min(config.pdu_length);

    info!(
        %addr,
        rack = config.rack,
        slot = config.slot,
        pdu_length,
        "S7 session established"
    );
    Ok((transport, pdu_length))
}

impl Connection for Client {
    fn read_multi(&mut self, items: &mut [DataItem]) -> Result<()> {
        Client::read_multi(self, items)
    }

    fn write_multi(&mut self, items: &mut [DataItem]) -> Result<()> {
        Client::write_multi(self, items)
    }
}

/// Builds real [`Client`] sessions from device configurations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Connection = Client;

    fn connect(&self, device: &str, config: &DeviceConfig) -> Result<Client> {
        debug!(device, host = %config.host, port = config.port, "connecting");
        Client::connect(config.to_client_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new("10.0.0.1", 0, 1);
        assert_eq!(config.port, DEFAULT_S7_PORT);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.idle_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.pdu_length, DEFAULT_PDU_LENGTH);
        assert_eq!(config.connection_type, ConnectionType::Pg);
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("10.0.0.1", 1, 3)
            .with_port(1102)
            .with_timeout(Duration::from_secs(5))
            .with_idle_timeout(Duration::from_secs(60))
            .with_connection_type(ConnectionType::Basic)
            .with_pdu_length(240);
        assert_eq!(config.port, 1102);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.pdu_length, 240);
        assert_eq!(config.remote_tsap().unwrap(), 0x0323);
    }

    #[test]
    fn test_remote_tsap() {
        assert_eq!(ClientConfig::new("h", 0, 2).remote_tsap().unwrap(), 0x0102);
        assert_eq!(ClientConfig::new("h", 0, 1).remote_tsap().unwrap(), 0x0101);
        assert_eq!(ClientConfig::new("h", 2, 0).remote_tsap().unwrap(), 0x0140);
        let top = ClientConfig::new("h", 7, 31).with_connection_type(ConnectionType::Basic);
        assert_eq!(top.remote_tsap().unwrap(), 0x03FF);
    }

    #[test]
    fn test_remote_tsap_out_of_range() {
        for (rack, slot) in [(8, 0), (0, 32), (u16::MAX, u16::MAX)] {
            let err = ClientConfig::new("h", rack, slot).remote_tsap().unwrap_err();
            assert!(matches!(err, S7Error::InvalidParameter { .. }));
        }
    }

    #[test]
    fn test_connect_rejects_bad_rack_before_dialing() {
        let config = ClientConfig::new("127.0.0.1", 9, 1).with_port(1);
        let err = Client::connect(config).unwrap_err();
        assert!(matches!(
            err,
            S7Error::InvalidParameter { ref parameter, .. } if parameter == "rack"
        ));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_socket_addr_resolution() {
        let addr = ClientConfig::new("127.0.0.1", 0, 1)
            .with_port(1102)
            .socket_addr()
            .unwrap();
        assert_eq!(addr, "127.0.0.1:1102".parse().unwrap());
    }

    #[test]
    fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ClientConfig::new("127.0.0.1", 0, 1)
            .with_port(port)
            .with_timeout(Duration::from_millis(200));
        let err = Client::connect(config).unwrap_err();
        assert!(err.is_transport());
    }
}
