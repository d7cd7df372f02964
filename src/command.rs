//! S7 request telegrams.
//!
//! - [`ConnectRequest`] - COTP connection request (a complete TPKT frame)
//! - [`SetupCommunication`] - negotiates the PDU length
//! - [`ReadVarCommand`] - reads up to [`MAX_ITEMS_PER_PDU`] items
//! - [`WriteVarCommand`] - writes up to [`MAX_ITEMS_PER_PDU`] items
//!
//! The S7 commands serialize to a bare S7 PDU; the [`Client`](crate::Client)
//! wraps them with [`header::wrap_data`](crate::header::wrap_data).
//!
//! # Example
//!
//! ```
//! use s7_driver::{parse_address, DataItem, ReadVarCommand};
//!
//! let items = [
//!     DataItem::from_descriptor(&parse_address("DB1.DBB0").unwrap()),
//!     DataItem::from_descriptor(&parse_address("DB1.DBW2").unwrap()),
//! ];
//! let cmd = ReadVarCommand::new(0x0001, &items).unwrap();
//! assert_eq!(cmd.to_bytes().len(), 10 + 2 + 2 * 12);
//! ```

use crate::address::AddressDescriptor;
use crate::codec::{Scratch, SCRATCH_LEN};
use crate::error::{ItemError, Result, S7Error};
use crate::header::{S7Header, ACK_DATA_HEADER_SIZE, JOB_HEADER_SIZE, TPKT_VERSION};
use crate::memory::{ElementSize, MemoryArea};

/// Setup communication function code.
pub(crate) const FUNCTION_SETUP_COMMUNICATION: u8 = 0xF0;
/// Read var function code.
pub(crate) const FUNCTION_READ_VAR: u8 = 0x04;
/// Write var function code.
pub(crate) const FUNCTION_WRITE_VAR: u8 = 0x05;

/// COTP connection request PDU type.
pub(crate) const COTP_CONNECTION_REQUEST: u8 = 0xE0;
/// COTP connection confirm PDU type.
pub(crate) const COTP_CONNECTION_CONFIRM: u8 = 0xD0;

/// Local TSAP used for every connection.
pub const LOCAL_TSAP: u16 = 0x0100;

/// PDU length requested during setup.
pub const DEFAULT_PDU_LENGTH: u16 = 480;

/// Hard protocol limit of items in one read or write var request.
pub const MAX_ITEMS_PER_PDU: usize = 20;

/// Size of one item specification in a read/write var request.
pub(crate) const ITEM_SPEC_SIZE: usize = 12;

/// Size of a data item header (return code, transport size, length).
pub(crate) const DATA_ITEM_HEADER_SIZE: usize = 4;

/// Size of the read/write var parameter section header (function, count).
pub(crate) const VAR_PARAM_HEADER_SIZE: usize = 2;

/// One element of a multi-item read or write.
///
/// The scratch buffer is filled in place by a read and must be filled before a
/// write; `error` holds the per-item return code of the last transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataItem {
    /// Memory area.
    pub area: MemoryArea,
    /// Element size.
    pub size: ElementSize,
    /// Data block number; ignored outside [`MemoryArea::DataBlock`].
    pub db_number: u16,
    /// Start address in bits, as it goes on the wire.
    pub start: u32,
    /// Number of elements.
    pub amount: u16,
    /// Scratch buffer.
    pub data: Scratch,
    /// Item error reported by the PLC, if any.
    pub error: Option<ItemError>,
}

impl DataItem {
    /// Creates an item for one element.
    pub fn new(area: MemoryArea, size: ElementSize, db_number: u16, start: u32) -> Self {
        Self {
            area,
            size,
            db_number,
            start,
            amount: 1,
            data: [0; SCRATCH_LEN],
            error: None,
        }
    }

    /// Creates an item addressing a parsed tag.
    pub fn from_descriptor(address: &AddressDescriptor) -> Self {
        Self {
            amount: address.amount,
            ..Self::new(
                address.area,
                address.element_size,
                address.block_number,
                address.wire_address(),
            )
        }
    }

    /// Sets the scratch buffer.
    pub fn with_data(mut self, data: Scratch) -> Self {
        self.data = data;
        self
    }

    /// Number of payload bytes the item carries.
    pub fn payload_len(&self) -> usize {
        self.size.byte_len() * usize::from(self.amount)
    }

    /// Serializes the item specification.
    pub(crate) fn spec_bytes(&self) -> [u8; ITEM_SPEC_SIZE] {
        let count = self.amount.to_be_bytes();
        let db = self.db_number.to_be_bytes();
        let start = self.start.to_be_bytes();
        [
            0x12, // variable specification
            0x0A, // length of the following address
            0x10, // syntax id: S7ANY
            self.size.code(),
            count[0],
            count[1],
            db[0],
            db[1],
            self.area.code(),
            start[1],
            start[2],
            start[3],
        ]
    }
}

/// Bytes a data section entry takes, padding included.
pub(crate) fn padded_len(payload: usize, last: bool) -> usize {
    let len = DATA_ITEM_HEADER_SIZE + payload;
    if !last && payload % 2 == 1 {
        len + 1
    } else {
        len
    }
}

fn check_item_count(items: &[DataItem]) -> Result<()> {
    if items.is_empty() {
        return Err(S7Error::invalid_parameter("items", "must not be empty"));
    }
    if items.len() > MAX_ITEMS_PER_PDU {
        return Err(S7Error::invalid_parameter(
            "items",
            format!("at most {MAX_ITEMS_PER_PDU} items per request, got {}", items.len()),
        ));
    }
    for item in items {
        if item.payload_len() > SCRATCH_LEN {
            return Err(S7Error::invalid_parameter(
                "amount",
                format!("{} bytes exceed the item buffer", item.payload_len()),
            ));
        }
    }
    Ok(())
}

/// COTP connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Calling TSAP.
    pub local_tsap: u16,
    /// Called TSAP; encodes connection type, rack and slot.
    pub remote_tsap: u16,
}

impl ConnectRequest {
    /// Size of the request frame.
    pub const SIZE: usize = 22;

    /// Creates a connection request.
    pub fn new(local_tsap: u16, remote_tsap: u16) -> Self {
        Self {
            local_tsap,
            remote_tsap,
        }
    }

    /// Serializes the complete TPKT frame.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let local = self.local_tsap.to_be_bytes();
        let remote = self.remote_tsap.to_be_bytes();
        [
            TPKT_VERSION,
            0x00,
            0x00,
            Self::SIZE as u8,
            0x11, // COTP header length
            COTP_CONNECTION_REQUEST,
            0x00,
            0x00, // destination reference
            0x00,
            0x01, // source reference
            0x00, // class 0
            0xC0,
            0x01,
            0x0A, // TPDU size 1024
            0xC1,
            0x02,
            local[0],
            local[1],
            0xC2,
            0x02,
            remote[0],
            remote[1],
        ]
    }
}

/// Setup communication job; negotiates the PDU length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupCommunication {
    /// PDU reference.
    pub pdu_ref: u16,
    /// Parallel jobs with acknowledgement, calling side.
    pub max_amq_calling: u16,
    /// Parallel jobs with acknowledgement, called side.
    pub max_amq_called: u16,
    /// Requested PDU length.
    pub pdu_length: u16,
}

impl SetupCommunication {
    /// Creates a setup request for one outstanding job.
    pub fn new(pdu_ref: u16, pdu_length: u16) -> Self {
        Self {
            pdu_ref,
            max_amq_calling: 1,
            max_amq_called: 1,
            pdu_length,
        }
    }

    /// Serializes the S7 PDU.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = S7Header::job(self.pdu_ref, 8, 0).to_bytes();
        bytes.push(FUNCTION_SETUP_COMMUNICATION);
        bytes.push(0x00);
        bytes.extend_from_slice(&self.max_amq_calling.to_be_bytes());
        bytes.extend_from_slice(&self.max_amq_called.to_be_bytes());
        bytes.extend_from_slice(&self.pdu_length.to_be_bytes());
        bytes
    }
}

/// Read var job for several items.
#[derive(Debug, Clone, Copy)]
pub struct ReadVarCommand<'a> {
    pdu_ref: u16,
    items: &'a [DataItem],
}

impl<'a> ReadVarCommand<'a> {
    /// Creates a read request.
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidParameter` for an empty item list, more than
    /// [`MAX_ITEMS_PER_PDU`] items or an item larger than its buffer.
    pub fn new(pdu_ref: u16, items: &'a [DataItem]) -> Result<Self> {
        check_item_count(items)?;
        Ok(Self { pdu_ref, items })
    }

    /// Returns the PDU reference.
    pub fn pdu_ref(&self) -> u16 {
        self.pdu_ref
    }

    fn param_len(&self) -> usize {
        VAR_PARAM_HEADER_SIZE + self.items.len() * ITEM_SPEC_SIZE
    }

    /// Size of the request PDU.
    pub fn request_size(&self) -> usize {
        JOB_HEADER_SIZE + self.param_len()
    }

    /// Size of the expected response PDU.
    pub fn response_size(&self) -> usize {
        let last = self.items.len() - 1;
        ACK_DATA_HEADER_SIZE
            + VAR_PARAM_HEADER_SIZE
            + self
                .items
                .iter()
                .enumerate()
                .map(|(i, item)| padded_len(item.payload_len(), i == last))
                .sum::<usize>()
    }

    /// Serializes the S7 PDU.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = S7Header::job(self.pdu_ref, self.param_len() as u16, 0).to_bytes();
        bytes.reserve(self.param_len());
        bytes.push(FUNCTION_READ_VAR);
        bytes.push(self.items.len() as u8);
        for item in self.items {
            bytes.extend_from_slice(&item.spec_bytes());
        }
        bytes
    }
}

/// Write var job for several items.
#[derive(Debug, Clone, Copy)]
pub struct WriteVarCommand<'a> {
    pdu_ref: u16,
    items: &'a [DataItem],
}

impl<'a> WriteVarCommand<'a> {
    /// Creates a write request; the items' scratch buffers carry the data.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ReadVarCommand::new`].
    pub fn new(pdu_ref: u16, items: &'a [DataItem]) -> Result<Self> {
        check_item_count(items)?;
        Ok(Self { pdu_ref, items })
    }

    /// Returns the PDU reference.
    pub fn pdu_ref(&self) -> u16 {
        self.pdu_ref
    }

    fn param_len(&self) -> usize {
        VAR_PARAM_HEADER_SIZE + self.items.len() * ITEM_SPEC_SIZE
    }

    fn data_len(&self) -> usize {
        let last = self.items.len() - 1;
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| padded_len(item.payload_len(), i == last))
            .sum()
    }

    /// Size of the request PDU.
    pub fn request_size(&self) -> usize {
        JOB_HEADER_SIZE + self.param_len() + self.data_len()
    }

    /// Size of the expected response PDU.
    pub fn response_size(&self) -> usize {
        ACK_DATA_HEADER_SIZE + VAR_PARAM_HEADER_SIZE + self.items.len()
    }

    /// Serializes the S7 PDU.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = S7Header::job(
            self.pdu_ref,
            self.param_len() as u16,
            self.data_len() as u16,
        );
        let mut bytes = header.to_bytes();
        bytes.reserve(self.param_len() + self.data_len());
        bytes.push(FUNCTION_WRITE_VAR);
        bytes.push(self.items.len() as u8);
        for item in self.items {
            bytes.extend_from_slice(&item.spec_bytes());
        }

        let last = self.items.len() - 1;
        for (i, item) in self.items.iter().enumerate() {
            let payload = item.payload_len();
            bytes.push(0x00);
            bytes.push(item.size.transport_size());
            let bits = item.size.bit_len() * item.amount;
            bytes.extend_from_slice(&bits.to_be_bytes());
            bytes.extend_from_slice(&item.data[..payload]);
            if i != last && payload % 2 == 1 {
                bytes.push(0x00);
            }
        }
        bytes
    }
}
