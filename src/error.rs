//! Error types for the S7 adapter.
//!
//! Errors are layered the same way the crate is:
//!
//! - [`S7Error`] - wire and session failures raised by the [`Client`](crate::Client)
//! - [`ItemError`] - per-item return codes reported inside a successful response
//! - [`AddressError`] - symbolic address parsing failures
//! - [`CodecError`] - value marshalling and range failures
//! - [`ConfigError`] - invalid device connection attributes
//! - [`DriverError`] - the call-level error handed back to the host

use std::fmt;
use std::io;

use thiserror::Error;

use crate::memory::{ElementSize, MemoryArea};
use crate::value::ValueType;

/// Result type alias for wire-level operations.
pub type Result<T> = std::result::Result<T, S7Error>;

/// Result type alias for host-facing driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Errors that can occur while talking to a PLC.
#[derive(Debug, Error)]
pub enum S7Error {
    /// The PLC answered with a non-zero error class/code in the S7 header.
    #[error("PLC error: class 0x{class:02X}, code 0x{code:02X}")]
    PlcError {
        /// Error class from the ack-data header.
        class: u8,
        /// Error code from the ack-data header.
        code: u8,
    },

    /// Invalid parameter provided to a request builder.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// The S7 payload of a response could not be interpreted.
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// Description of the response error.
        reason: String,
    },

    /// The TPKT/COTP framing of a telegram is broken.
    #[error("Invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the framing error.
        reason: String,
    },

    /// The PLC refused the COTP connection request.
    #[error("ISO-on-TCP connection refused by the PLC")]
    IsoConnectionFailed,

    /// The setup-communication exchange failed.
    #[error("S7 PDU negotiation failed: {reason}")]
    PduNegotiationFailed {
        /// Description of the negotiation failure.
        reason: String,
    },

    /// A request would not fit into the negotiated PDU.
    #[error("request needs {required} bytes but the negotiated PDU is {negotiated} bytes")]
    PduTooLarge {
        /// Size of the request or expected response.
        required: usize,
        /// PDU length agreed during setup.
        negotiated: u16,
    },

    /// The response does not belong to the request that was sent.
    #[error("PDU reference mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    PduRefMismatch {
        /// PDU reference of the request.
        expected: u16,
        /// PDU reference found in the response.
        received: u16,
    },

    /// Communication timeout.
    #[error("Communication timeout")]
    Timeout,

    /// The peer closed the connection.
    #[error("Connection closed by the PLC")]
    ConnectionClosed,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl S7Error {
    /// Creates a new `PlcError` from the header error class and code.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_driver::S7Error;
    ///
    /// let err = S7Error::plc_error(0x81, 0x04);
    /// assert!(!err.is_transport());
    /// ```
    pub fn plc_error(class: u8, code: u8) -> Self {
        Self::PlcError { class, code }
    }

    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidFrame` error.
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Creates a new `PduNegotiationFailed` error.
    pub fn negotiation_failed(reason: impl Into<String>) -> Self {
        Self::PduNegotiationFailed {
            reason: reason.into(),
        }
    }

    /// Returns whether the error means the session itself is unusable.
    ///
    /// Transport errors are the ones worth a reconnect and a retry. PLC-reported
    /// errors and requests refused before sending are final.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_driver::S7Error;
    ///
    /// assert!(S7Error::Timeout.is_transport());
    /// assert!(S7Error::ConnectionClosed.is_transport());
    /// assert!(!S7Error::plc_error(0x85, 0x00).is_transport());
    /// ```
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            S7Error::PlcError { .. }
                | S7Error::InvalidParameter { .. }
                | S7Error::PduTooLarge { .. }
        )
    }
}

/// Return code attached to a single item of a multi-item response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ItemError {
    /// Hardware fault on the addressed module.
    #[error("hardware fault")]
    HardwareFault,
    /// Access to the object is not allowed.
    #[error("access denied")]
    AccessDenied,
    /// Address out of range or the block is optimized.
    #[error("invalid address")]
    InvalidAddress,
    /// The requested data type is not supported.
    #[error("data type not supported")]
    DataTypeNotSupported,
    /// Data type inconsistent with the written payload.
    #[error("data type inconsistent")]
    DataTypeInconsistent,
    /// The object (for example the data block) does not exist.
    #[error("object does not exist")]
    ObjectDoesNotExist,
    /// Any other return code.
    #[error("return code 0x{0:02X}")]
    Unknown(u8),
}

impl ItemError {
    /// Return code that marks a successful item.
    pub const SUCCESS: u8 = 0xFF;

    /// Maps a return code to an item error; `None` for success.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_driver::ItemError;
    ///
    /// assert_eq!(ItemError::from_code(0xFF), None);
    /// assert_eq!(ItemError::from_code(0x0A), Some(ItemError::ObjectDoesNotExist));
    /// ```
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            Self::SUCCESS => None,
            0x01 => Some(Self::HardwareFault),
            0x03 => Some(Self::AccessDenied),
            0x05 => Some(Self::InvalidAddress),
            0x06 => Some(Self::DataTypeNotSupported),
            0x07 => Some(Self::DataTypeInconsistent),
            0x0A => Some(Self::ObjectDoesNotExist),
            other => Some(Self::Unknown(other)),
        }
    }

    /// Returns the wire return code.
    pub fn code(self) -> u8 {
        match self {
            Self::HardwareFault => 0x01,
            Self::AccessDenied => 0x03,
            Self::InvalidAddress => 0x05,
            Self::DataTypeNotSupported => 0x06,
            Self::DataTypeInconsistent => 0x07,
            Self::ObjectDoesNotExist => 0x0A,
            Self::Unknown(code) => code,
        }
    }
}

/// Errors raised while parsing a symbolic address such as `DB1.DBX100.0`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Nothing left after normalization.
    #[error("address is empty")]
    Empty,

    /// The area prefix is not an S7 memory area.
    #[error("unknown memory area in '{symbol}'")]
    UnknownArea {
        /// Normalized symbol.
        symbol: String,
    },

    /// A real S7 area that this adapter does not transfer.
    #[error("{area} area is not supported: '{symbol}'")]
    Unsupported {
        /// Area the prefix refers to.
        area: MemoryArea,
        /// Normalized symbol.
        symbol: String,
    },

    /// Wrong number or shape of tokens.
    #[error("malformed address '{symbol}': {reason}")]
    MalformedAddress {
        /// Normalized symbol.
        symbol: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The element tag is not one of `DBX`, `DBB`, `DBW`, `DBD`.
    #[error("unknown element type '{tag}'")]
    UnknownElementType {
        /// Offending token.
        tag: String,
    },

    /// A numeric field is not a plain decimal number.
    #[error("invalid {field} '{token}'")]
    InvalidNumber {
        /// Which field failed.
        field: &'static str,
        /// Offending token.
        token: String,
    },

    /// Bit index outside `0..=7`.
    #[error("bit index {bit} is out of range 0-7")]
    BitIndexOutOfRange {
        /// Parsed bit index.
        bit: u32,
    },

    /// Byte offset beyond the 24-bit S7 address space.
    #[error("byte offset {offset} exceeds the S7 address space")]
    OffsetOutOfRange {
        /// Parsed byte offset.
        offset: u32,
    },
}

impl AddressError {
    pub(crate) fn malformed(symbol: &str, reason: &'static str) -> Self {
        Self::MalformedAddress {
            symbol: symbol.to_owned(),
            reason,
        }
    }
}

/// Errors raised while converting between scalars and scratch buffers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The value does not fit the target type or element width.
    #[error("value {value} is out of range for {target}")]
    OutOfRange {
        /// Rendered source value.
        value: String,
        /// Declared target type.
        target: ValueType,
    },

    /// The element is too narrow (or the wrong kind) for the value type.
    #[error("{value_type} cannot be carried by a {size} element")]
    WidthMismatch {
        /// Declared value type.
        value_type: ValueType,
        /// Element size of the address.
        size: ElementSize,
    },

    /// The source value has an incompatible type.
    #[error("cannot convert {found} to {expected}")]
    TypeMismatch {
        /// Declared target type.
        expected: ValueType,
        /// Type of the value provided.
        found: ValueType,
    },

    /// The value type cannot be used in this direction.
    #[error("{value_type} is not supported here: {reason}")]
    Unsupported {
        /// Declared value type.
        value_type: ValueType,
        /// Why it is refused.
        reason: &'static str,
    },

    /// String data is not valid for the PLC.
    #[error("invalid string: {reason}")]
    InvalidString {
        /// Description of the problem.
        reason: String,
    },
}

impl CodecError {
    pub(crate) fn out_of_range(value: impl fmt::Display, target: ValueType) -> Self {
        Self::OutOfRange {
            value: value.to_string(),
            target,
        }
    }
}

/// Errors raised while validating device connection attributes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The protocol section is absent from the device protocols.
    #[error("protocol '{0}' not found in device protocols")]
    MissingProtocol(String),

    /// A required attribute is absent.
    #[error("attribute '{0}' is missing")]
    MissingAttribute(&'static str),

    /// An attribute is present but unusable.
    #[error("attribute '{attribute}' is invalid: {reason}")]
    InvalidAttribute {
        /// Attribute key.
        attribute: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// A failure tied to one device resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure<E> {
    /// Name of the device resource.
    pub resource: String,
    /// What went wrong for it.
    pub error: E,
}

impl<E> ResourceFailure<E> {
    /// Creates a new failure entry.
    pub fn new(resource: impl Into<String>, error: E) -> Self {
        Self {
            resource: resource.into(),
            error,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ResourceFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.error)
    }
}

fn join_failures<E: fmt::Display>(failures: &[ResourceFailure<E>]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn resource_list(resources: &[String]) -> String {
    if resources.is_empty() {
        String::new()
    } else {
        format!(" [{}]", resources.join(", "))
    }
}

/// Call-level error returned to the host.
///
/// Every variant names the device; resource-scoped variants list each offending
/// resource together with its cause.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Device connection attributes are unusable.
    #[error("device '{device}': invalid configuration: {source}")]
    Config {
        /// Device name.
        device: String,
        /// Underlying cause.
        source: ConfigError,
    },

    /// One or more resources have an unparsable address; nothing was sent.
    #[error("device '{device}': unresolvable address: {}", join_failures(.failures))]
    Address {
        /// Device name.
        device: String,
        /// Every resource that failed to resolve.
        failures: Vec<ResourceFailure<AddressError>>,
    },

    /// The transaction could not be completed at the transport level.
    #[error(
        "device '{device}': transport failure after {attempts} attempt(s){}: {source}",
        resource_list(.resources)
    )]
    Transport {
        /// Device name.
        device: String,
        /// Resources of the failing request; empty outside a read or write.
        resources: Vec<String>,
        /// Attempts made for the failing chunk.
        attempts: u32,
        /// Last transport error.
        source: S7Error,
    },

    /// The PLC refused the whole request.
    #[error("device '{device}': request rejected{}: {source}", resource_list(.resources))]
    Plc {
        /// Device name.
        device: String,
        /// Resources of the rejected request; empty outside a read or write.
        resources: Vec<String>,
        /// Error reported by the PLC or the client.
        source: S7Error,
    },

    /// The transaction completed but some items carry an error code.
    #[error("device '{device}': item error: {}", join_failures(.failures))]
    Protocol {
        /// Device name.
        device: String,
        /// Every resource whose item reported an error.
        failures: Vec<ResourceFailure<ItemError>>,
    },

    /// The call itself is inconsistent.
    #[error("device '{device}': invalid request: {reason}")]
    Request {
        /// Device name.
        device: String,
        /// Description of the problem.
        reason: String,
    },
}

impl DriverError {
    /// Returns the device the error belongs to.
    pub fn device(&self) -> &str {
        match self {
            Self::Config { device, .. }
            | Self::Address { device, .. }
            | Self::Transport { device, .. }
            | Self::Plc { device, .. }
            | Self::Protocol { device, .. }
            | Self::Request { device, .. } => device,
        }
    }

    pub(crate) fn config(device: &str, source: ConfigError) -> Self {
        Self::Config {
            device: device.to_owned(),
            source,
        }
    }

    pub(crate) fn request(device: &str, reason: impl Into<String>) -> Self {
        Self::Request {
            device: device.to_owned(),
            reason: reason.into(),
        }
    }

    /// Wraps a client error, classifying it as transport or PLC rejection.
    pub(crate) fn from_client(
        device: &str,
        resources: Vec<String>,
        attempts: u32,
        source: S7Error,
    ) -> Self {
        if source.is_transport() {
            Self::Transport {
                device: device.to_owned(),
                resources,
                attempts,
                source,
            }
        } else {
            Self::Plc {
                device: device.to_owned(),
                resources,
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plc_error_display() {
        let err = S7Error::plc_error(0x81, 0x04);
        assert_eq!(err.to_string(), "PLC error: class 0x81, code 0x04");
    }

    #[test]
    fn test_pdu_ref_mismatch_display() {
        let err = S7Error::PduRefMismatch {
            expected: 0x0001,
            received: 0x0002,
        };
        assert_eq!(
            err.to_string(),
            "PDU reference mismatch: expected 0x0001, received 0x0002"
        );
    }

    #[test]
    fn test_transport_classification() {
        assert!(S7Error::Timeout.is_transport());
        assert!(S7Error::IsoConnectionFailed.is_transport());
        assert!(S7Error::invalid_frame("fragmented").is_transport());
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(S7Error::Io(reset).is_transport());
        assert!(!S7Error::plc_error(0x85, 0x00).is_transport());
        assert!(!S7Error::invalid_parameter("items", "empty").is_transport());
        assert!(!S7Error::PduTooLarge {
            required: 500,
            negotiated: 240
        }
        .is_transport());
    }

    #[test]
    fn test_item_error_codes() {
        for code in [0x01, 0x03, 0x05, 0x06, 0x07, 0x0A, 0x42] {
            let err = ItemError::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
        assert_eq!(ItemError::from_code(0xFF), None);
        assert_eq!(ItemError::Unknown(0x42).to_string(), "return code 0x42");
    }

    #[test]
    fn test_address_error_display() {
        let err = AddressError::BitIndexOutOfRange { bit: 9 };
        assert_eq!(err.to_string(), "bit index 9 is out of range 0-7");

        let err = AddressError::malformed("DBX100", "expected DB<n>.DB<type><offset>");
        assert_eq!(
            err.to_string(),
            "malformed address 'DBX100': expected DB<n>.DB<type><offset>"
        );
    }

    #[test]
    fn test_driver_error_lists_resources() {
        let err = DriverError::Address {
            device: "plc1".into(),
            failures: vec![
                ResourceFailure::new("Temperature", AddressError::Empty),
                ResourceFailure::new(
                    "Pump",
                    AddressError::UnknownElementType { tag: "DBQ".into() },
                ),
            ],
        };
        assert_eq!(
            err.to_string(),
            "device 'plc1': unresolvable address: Temperature: address is empty; \
             Pump: unknown element type 'DBQ'"
        );
        assert_eq!(err.device(), "plc1");
    }

    #[test]
    fn test_driver_error_from_client() {
        let err = DriverError::from_client("plc1", Vec::new(), 3, S7Error::Timeout);
        assert!(matches!(err, DriverError::Transport { attempts: 3, .. }));
        assert_eq!(
            err.to_string(),
            "device 'plc1': transport failure after 3 attempt(s): Communication timeout"
        );

        let err = DriverError::from_client(
            "plc1",
            vec!["Count".into(), "Speed".into()],
            1,
            S7Error::plc_error(0x81, 0x04),
        );
        assert!(matches!(err, DriverError::Plc { .. }));
        assert_eq!(
            err.to_string(),
            "device 'plc1': request rejected [Count, Speed]: PLC error: class 0x81, code 0x04"
        );
    }
}
