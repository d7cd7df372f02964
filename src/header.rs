//! ISO-on-TCP framing and the S7 PDU header.
//!
//! Every S7 telegram travels inside a TPKT packet (RFC 1006) carrying a COTP
//! data TPDU (ISO 8073):
//!
//! | Bytes | Field | Value |
//! |-------|-------|-------|
//! | 0 | TPKT version | `0x03` |
//! | 1 | Reserved | `0x00` |
//! | 2-3 | Frame length, big-endian | header included |
//! | 4 | COTP header length | `0x02` |
//! | 5 | COTP PDU type | `0xF0` (DT) |
//! | 6 | TPDU number / EOT | `0x80` |
//!
//! The S7 PDU follows. Its header is 10 bytes for jobs and 12 bytes for
//! acknowledgements, which add the error class and code:
//!
//! | Byte | Field |
//! |------|-------|
//! | 0 | Protocol id `0x32` |
//! | 1 | Message type |
//! | 2-3 | Redundancy identification |
//! | 4-5 | PDU reference |
//! | 6-7 | Parameter length |
//! | 8-9 | Data length |
//! | 10 | Error class (ack-data only) |
//! | 11 | Error code (ack-data only) |
//!
//! # Example
//!
//! ```
//! use s7_driver::{header, S7Header};
//!
//! let pdu = S7Header::job(0x0001, 8, 0).to_bytes();
//! let frame = header::wrap_data(&pdu).unwrap();
//! assert_eq!(&frame[..7], &[0x03, 0x00, 0x00, 0x11, 0x02, 0xF0, 0x80]);
//! assert_eq!(header::unwrap_data(&frame).unwrap(), &pdu[..]);
//! ```

use crate::error::{Result, S7Error};

/// TPKT version byte (RFC 1006).
pub const TPKT_VERSION: u8 = 0x03;

/// TPKT header size in bytes.
pub const TPKT_HEADER_SIZE: usize = 4;

/// COTP data TPDU header: length, DT code, last-data-unit flag.
pub const COTP_DATA_HEADER: [u8; 3] = [0x02, 0xF0, 0x80];

/// TPKT plus COTP data header size in bytes.
pub const ISO_HEADER_SIZE: usize = TPKT_HEADER_SIZE + COTP_DATA_HEADER.len();

/// S7 protocol identifier.
pub const S7_PROTOCOL_ID: u8 = 0x32;

/// Header size of job messages.
pub const JOB_HEADER_SIZE: usize = 10;

/// Header size of ack-data messages.
pub const ACK_DATA_HEADER_SIZE: usize = 12;

/// S7 message types (ROSCTR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Request sent to the PLC.
    Job,
    /// Acknowledgement without data.
    Ack,
    /// Acknowledgement with data; every read/write/setup answer.
    AckData,
    /// Userdata (diagnostics, clock, ...).
    UserData,
}

impl MessageType {
    /// Returns the ROSCTR byte.
    pub fn code(self) -> u8 {
        match self {
            MessageType::Job => 0x01,
            MessageType::Ack => 0x02,
            MessageType::AckData => 0x03,
            MessageType::UserData => 0x07,
        }
    }

    /// Maps a ROSCTR byte to a message type.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(MessageType::Job),
            0x02 => Some(MessageType::Ack),
            0x03 => Some(MessageType::AckData),
            0x07 => Some(MessageType::UserData),
            _ => None,
        }
    }

    /// Header size for messages of this type.
    pub fn header_size(self) -> usize {
        match self {
            MessageType::Ack | MessageType::AckData => ACK_DATA_HEADER_SIZE,
            MessageType::Job | MessageType::UserData => JOB_HEADER_SIZE,
        }
    }
}

/// S7 PDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7Header {
    /// Message type.
    pub message_type: MessageType,
    /// Reference echoed by the PLC in its answer.
    pub pdu_ref: u16,
    /// Length of the parameter section.
    pub param_len: u16,
    /// Length of the data section.
    pub data_len: u16,
    /// Error class; only present on acknowledgements.
    pub error_class: u8,
    /// Error code; only present on acknowledgements.
    pub error_code: u8,
}

impl S7Header {
    /// Creates a job header.
    pub fn job(pdu_ref: u16, param_len: u16, data_len: u16) -> Self {
        Self {
            message_type: MessageType::Job,
            pdu_ref,
            param_len,
            data_len,
            error_class: 0,
            error_code: 0,
        }
    }

    /// Creates an ack-data header, as sent by a PLC.
    pub fn ack_data(pdu_ref: u16, param_len: u16, data_len: u16) -> Self {
        Self {
            message_type: MessageType::AckData,
            ..Self::job(pdu_ref, param_len, data_len)
        }
    }

    /// Sets the error class and code.
    pub fn with_error(mut self, class: u8, code: u8) -> Self {
        self.error_class = class;
        self.error_code = code;
        self
    }

    /// Size of the serialized header.
    pub fn size(&self) -> usize {
        self.message_type.header_size()
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size());
        bytes.push(S7_PROTOCOL_ID);
        bytes.push(self.message_type.code());
        bytes.extend_from_slice(&[0x00, 0x00]);
        bytes.extend_from_slice(&self.pdu_ref.to_be_bytes());
        bytes.extend_from_slice(&self.param_len.to_be_bytes());
        bytes.extend_from_slice(&self.data_len.to_be_bytes());
        if self.size() == ACK_DATA_HEADER_SIZE {
            bytes.push(self.error_class);
            bytes.push(self.error_code);
        }
        bytes
    }

    /// Parses a header from the start of an S7 PDU.
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidResponse` if the slice is too short, the
    /// protocol id is wrong or the message type is unknown.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < JOB_HEADER_SIZE {
            return Err(S7Error::invalid_response(format!(
                "S7 header too short: expected at least {} bytes, got {}",
                JOB_HEADER_SIZE,
                data.len()
            )));
        }
        if data[0] != S7_PROTOCOL_ID {
            return Err(S7Error::invalid_response(format!(
                "invalid protocol id: expected 0x{:02X}, got 0x{:02X}",
                S7_PROTOCOL_ID, data[0]
            )));
        }
        let message_type = MessageType::from_code(data[1]).ok_or_else(|| {
            S7Error::invalid_response(format!("unknown message type 0x{:02X}", data[1]))
        })?;
        if data.len() < message_type.header_size() {
            return Err(S7Error::invalid_response(format!(
                "S7 header too short for {:?}: {} bytes",
                message_type,
                data.len()
            )));
        }

        let (error_class, error_code) = if message_type.header_size() == ACK_DATA_HEADER_SIZE {
            (data[10], data[11])
        } else {
            (0, 0)
        };

        Ok(Self {
            message_type,
            pdu_ref: u16::from_be_bytes([data[4], data[5]]),
            param_len: u16::from_be_bytes([data[6], data[7]]),
            data_len: u16::from_be_bytes([data[8], data[9]]),
            error_class,
            error_code,
        })
    }

    /// Returns `S7Error::PlcError` if the header carries an error.
    pub fn check_error(&self) -> Result<()> {
        if self.error_class == 0 && self.error_code == 0 {
            Ok(())
        } else {
            Err(S7Error::plc_error(self.error_class, self.error_code))
        }
    }
}

/// Wraps an S7 PDU in TPKT and COTP data headers.
///
/// # Errors
///
/// Returns `S7Error::InvalidParameter` if the frame would exceed the TPKT
/// length field.
pub fn wrap_data(pdu: &[u8]) -> Result<Vec<u8>> {
    let total = ISO_HEADER_SIZE + pdu.len();
    let len = u16::try_from(total).map_err(|_| {
        S7Error::invalid_parameter("pdu", format!("{total} bytes exceed a TPKT frame"))
    })?;

    let mut frame = Vec::with_capacity(total);
    frame.push(TPKT_VERSION);
    frame.push(0x00);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&COTP_DATA_HEADER);
    frame.extend_from_slice(pdu);
    Ok(frame)
}

/// Returns the S7 PDU carried by a complete TPKT/COTP data frame.
///
/// # Errors
///
/// Returns `S7Error::InvalidFrame` if the TPKT header, the declared length or
/// the COTP data header do not match.
pub fn unwrap_data(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < ISO_HEADER_SIZE {
        return Err(S7Error::invalid_frame(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    let declared = frame_length(&[frame[0], frame[1], frame[2], frame[3]])?;
    if declared != frame.len() {
        return Err(S7Error::invalid_frame(format!(
            "TPKT length {} does not match received {} bytes",
            declared,
            frame.len()
        )));
    }
    if frame[4..ISO_HEADER_SIZE] != COTP_DATA_HEADER {
        return Err(S7Error::invalid_frame(format!(
            "not a COTP data TPDU: {:02X?}",
            &frame[4..ISO_HEADER_SIZE]
        )));
    }
    Ok(&frame[ISO_HEADER_SIZE..])
}

/// Decodes the total frame length from a TPKT header.
///
/// # Errors
///
/// Returns `S7Error::InvalidFrame` on a wrong version byte or a length shorter
/// than the header itself.
pub fn frame_length(tpkt: &[u8; TPKT_HEADER_SIZE]) -> Result<usize> {
    if tpkt[0] != TPKT_VERSION {
        return Err(S7Error::invalid_frame(format!(
            "invalid TPKT version 0x{:02X}",
            tpkt[0]
        )));
    }
    let len = usize::from(u16::from_be_bytes([tpkt[2], tpkt[3]]));
    if len < TPKT_HEADER_SIZE + 1 {
        return Err(S7Error::invalid_frame(format!("TPKT length {len} too small")));
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_header_bytes() {
        let header = S7Header::job(0x0102, 0x0E, 0x00);
        assert_eq!(hex::encode(header.to_bytes()), "320100000102000e0000");
        assert_eq!(header.size(), JOB_HEADER_SIZE);
    }

    #[test]
    fn test_ack_data_header_roundtrip() {
        let header = S7Header::ack_data(7, 2, 5).with_error(0x81, 0x04);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), ACK_DATA_HEADER_SIZE);
        assert_eq!(&bytes[10..], &[0x81, 0x04]);

        let parsed = S7Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert!(matches!(
            parsed.check_error(),
            Err(S7Error::PlcError {
                class: 0x81,
                code: 0x04
            })
        ));
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert!(S7Header::from_bytes(&[0x32, 0x03]).is_err());
        let mut bytes = S7Header::ack_data(1, 0, 0).to_bytes();
        bytes[0] = 0x72;
        assert!(S7Header::from_bytes(&bytes).is_err());
        bytes[0] = S7_PROTOCOL_ID;
        bytes[1] = 0x09;
        assert!(S7Header::from_bytes(&bytes).is_err());
        // ack-data truncated before its error bytes
        let bytes = S7Header::ack_data(1, 0, 0).to_bytes();
        assert!(S7Header::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn test_wrap_unwrap() {
        let frame = wrap_data(&[0x32, 0x01]).unwrap();
        assert_eq!(hex::encode(&frame), "0300000902f0803201");
        assert_eq!(unwrap_data(&frame).unwrap(), &[0x32, 0x01]);
    }

    #[test]
    fn test_unwrap_rejects_bad_frames() {
        let frame = wrap_data(&[0x32, 0x01]).unwrap();

        let mut bad = frame.clone();
        bad[0] = 0x04;
        assert!(matches!(unwrap_data(&bad), Err(S7Error::InvalidFrame { .. })));

        let mut bad = frame.clone();
        bad[5] = 0xD0;
        assert!(matches!(unwrap_data(&bad), Err(S7Error::InvalidFrame { .. })));

        assert!(matches!(
            unwrap_data(&frame[..frame.len() - 1]),
            Err(S7Error::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_frame_length() {
        assert_eq!(frame_length(&[0x03, 0x00, 0x00, 0x16]).unwrap(), 22);
        assert!(frame_length(&[0x03, 0x00, 0x00, 0x02]).is_err());
    }
}
