//! S7 response parsing and validation.
//!
//! An answer to a job is an ack-data PDU:
//!
//! | Component | Size | Description |
//! |-----------|------|-------------|
//! | Header | 12 bytes | [`S7Header`] with error class/code |
//! | Parameters | `param_len` | function code, item count, ... |
//! | Data | `data_len` | one entry per item |
//!
//! A read data entry is `return code, transport size, length, payload`; every
//! entry but the last is padded to an even length. A write data entry is the
//! bare return code.
//!
//! # Example
//!
//! ```
//! use s7_driver::{header, S7Response};
//!
//! let frame = [
//!     0x03, 0x00, 0x00, 0x1B, 0x02, 0xF0, 0x80, // TPKT + COTP
//!     0x32, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, // header
//!     0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0xF0, // setup parameters
//! ];
//! let response = S7Response::from_bytes(header::unwrap_data(&frame).unwrap()).unwrap();
//! assert!(response.check_error().is_ok());
//! assert_eq!(response.negotiated_pdu_length().unwrap(), 240);
//! ```

use crate::codec::SCRATCH_LEN;
use crate::command::{
    DataItem, COTP_CONNECTION_CONFIRM, DATA_ITEM_HEADER_SIZE, FUNCTION_READ_VAR,
    FUNCTION_SETUP_COMMUNICATION, FUNCTION_WRITE_VAR,
};
use crate::error::{ItemError, Result, S7Error};
use crate::header::{frame_length, MessageType, S7Header, TPKT_HEADER_SIZE};

/// Transport sizes whose length field counts bits.
const BIT_LENGTH_TRANSPORT_SIZES: [u8; 3] = [0x03, 0x04, 0x05];

/// Checks that a frame is a COTP connection confirm.
///
/// # Errors
///
/// Returns `S7Error::InvalidFrame` on broken framing and
/// `S7Error::IsoConnectionFailed` on any other COTP PDU type.
pub fn check_connect_confirm(frame: &[u8]) -> Result<()> {
    if frame.len() < TPKT_HEADER_SIZE + 2 {
        return Err(S7Error::invalid_frame(format!(
            "connection confirm too short: {} bytes",
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
    if frame[5] != COTP_CONNECTION_CONFIRM {
        return Err(S7Error::IsoConnectionFailed);
    }
    Ok(())
}

/// Parsed S7 acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Response {
    /// Response header.
    pub header: S7Header,
    /// Parameter section.
    pub params: Vec<u8>,
    /// Data section.
    pub data: Vec<u8>,
}

impl S7Response {
    /// Parses an S7 PDU (TPKT/COTP already removed).
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidResponse` if the PDU is not an acknowledgement
    /// or its sections do not match the header lengths.
    pub fn from_bytes(pdu: &[u8]) -> Result<Self> {
        let header = S7Header::from_bytes(pdu)?;
        if !matches!(header.message_type, MessageType::Ack | MessageType::AckData) {
            return Err(S7Error::invalid_response(format!(
                "expected an acknowledgement, got {:?}",
                header.message_type
            )));
        }

        let params_start = header.size();
        let data_start = params_start + usize::from(header.param_len);
        let end = data_start + usize::from(header.data_len);
        if pdu.len() < end {
            return Err(S7Error::invalid_response(format!(
                "response truncated: header announces {} bytes, got {}",
                end,
                pdu.len()
            )));
        }

        Ok(Self {
            header,
            params: pdu[params_start..data_start].to_vec(),
            data: pdu[data_start..end].to_vec(),
        })
    }

    /// Returns `S7Error::PlcError` if the header reports an error.
    pub fn check_error(&self) -> Result<()> {
        self.header.check_error()
    }

    /// Checks the PDU reference against the request's.
    ///
    /// # Errors
    ///
    /// Returns `S7Error::PduRefMismatch` if they differ.
    pub fn check_pdu_ref(&self, expected: u16) -> Result<()> {
        if self.header.pdu_ref == expected {
            Ok(())
        } else {
            Err(S7Error::PduRefMismatch {
                expected,
                received: self.header.pdu_ref,
            })
        }
    }

    /// Checks the function code echoed in the parameters.
    pub fn check_function(&self, function: u8) -> Result<()> {
        match self.params.first() {
            Some(&code) if code == function => Ok(()),
            Some(&code) => Err(S7Error::invalid_response(format!(
                "function mismatch: expected 0x{function:02X}, got 0x{code:02X}"
            ))),
            None => Err(S7Error::invalid_response("missing parameter section")),
        }
    }

    /// Returns the PDU length granted by a setup communication answer.
    ///
    /// # Errors
    ///
    /// Returns `S7Error::PduNegotiationFailed` for a short parameter section
    /// or a zero length.
    pub fn negotiated_pdu_length(&self) -> Result<u16> {
        self.check_function(FUNCTION_SETUP_COMMUNICATION)
            .map_err(|e| S7Error::negotiation_failed(e.to_string()))?;
        if self.params.len() < 8 {
            return Err(S7Error::negotiation_failed(format!(
                "setup parameters too short: {} bytes",
                self.params.len()
            )));
        }
        let length = u16::from_be_bytes([self.params[6], self.params[7]]);
        if length == 0 {
            return Err(S7Error::negotiation_failed("PLC granted a zero PDU length"));
        }
        Ok(length)
    }

    fn check_item_count(&self, function: u8, expected: usize) -> Result<()> {
        self.check_function(function)?;
        let count = self.params.get(1).copied().map(usize::from);
        if count != Some(expected) {
            return Err(S7Error::invalid_response(format!(
                "item count mismatch: expected {expected}, got {count:?}"
            )));
        }
        Ok(())
    }

    /// Copies read data into the items' buffers and records item errors.
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidResponse` if the data section does not match
    /// the items.
    pub fn fill_read_items(&self, items: &mut [DataItem]) -> Result<()> {
        self.check_item_count(FUNCTION_READ_VAR, items.len())?;

        let data = &self.data;
        let last = items.len().saturating_sub(1);
        let mut offset = 0;
        for (i, item) in items.iter_mut().enumerate() {
            if data.len() < offset + DATA_ITEM_HEADER_SIZE {
                return Err(S7Error::invalid_response(format!(
                    "read data ends before item {i}"
                )));
            }
            let return_code = data[offset];
            let transport_size = data[offset + 1];
            let length = usize::from(u16::from_be_bytes([data[offset + 2], data[offset + 3]]));
            let payload = if BIT_LENGTH_TRANSPORT_SIZES.contains(&transport_size) {
                length.div_ceil(8)
            } else {
                length
            };
            offset += DATA_ITEM_HEADER_SIZE;

            item.error = ItemError::from_code(return_code);
            if item.error.is_none() {
                if payload > SCRATCH_LEN || data.len() < offset + payload {
                    return Err(S7Error::invalid_response(format!(
                        "item {i}: {payload} data bytes do not fit"
                    )));
                }
                if payload < item.size.byte_len() {
                    return Err(S7Error::invalid_response(format!(
                        "item {i}: {payload} data bytes for a {}-byte element",
                        item.size.byte_len()
                    )));
                }
                item.data = [0; SCRATCH_LEN];
                item.data[..payload].copy_from_slice(&data[offset..offset + payload]);
            }

            offset += payload;
            if i != last && payload % 2 == 1 {
                offset += 1;
            }
        }
        Ok(())
    }

    /// Records the per-item return codes of a write.
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidResponse` if the data section does not hold one
    /// code per item.
    pub fn apply_write_results(&self, items: &mut [DataItem]) -> Result<()> {
        self.check_item_count(FUNCTION_WRITE_VAR, items.len())?;
        if self.data.len() < items.len() {
            return Err(S7Error::invalid_response(format!(
                "expected {} write return codes, got {}",
                items.len(),
                self.data.len()
            )));
        }
        for (item, &code) in items.iter_mut().zip(&self.data) {
            item.error = ItemError::from_code(code);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::parse;
    use crate::header::wrap_data;

    fn ack(pdu_ref: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
        let mut pdu =
            S7Header::ack_data(pdu_ref, params.len() as u16, data.len() as u16).to_bytes();
        pdu.extend_from_slice(params);
        pdu.extend_from_slice(data);
        pdu
    }

    fn items(symbols: &[&str]) -> Vec<DataItem> {
        symbols
            .iter()
            .map(|s| DataItem::from_descriptor(&parse(s).unwrap()))
            .collect()
    }

    #[test]
    fn test_connect_confirm() {
        let cc = hex::decode("0300001611d00001000100c0010ac1020100c2020102").unwrap();
        assert!(check_connect_confirm(&cc).is_ok());

        let mut refused = cc.clone();
        refused[5] = 0x80; // disconnect request
        assert!(matches!(
            check_connect_confirm(&refused),
            Err(S7Error::IsoConnectionFailed)
        ));

        assert!(matches!(
            check_connect_confirm(&cc[..10]),
            Err(S7Error::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_job_and_truncation() {
        let job = S7Header::job(1, 0, 0).to_bytes();
        assert!(S7Response::from_bytes(&job).is_err());

        let mut pdu = ack(1, &[0x04, 0x01], &[0xFF, 0x04, 0x00, 0x08, 0x07]);
        pdu.pop();
        assert!(matches!(
            S7Response::from_bytes(&pdu),
            Err(S7Error::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_pdu_ref_and_error() {
        let response = S7Response::from_bytes(&ack(5, &[0x04, 0x00], &[])).unwrap();
        assert!(response.check_pdu_ref(5).is_ok());
        assert!(matches!(
            response.check_pdu_ref(6),
            Err(S7Error::PduRefMismatch {
                expected: 6,
                received: 5
            })
        ));

        let mut pdu = ack(5, &[], &[]);
        pdu[10] = 0x85;
        let response = S7Response::from_bytes(&pdu).unwrap();
        assert!(matches!(
            response.check_error(),
            Err(S7Error::PlcError { class: 0x85, .. })
        ));
    }

    #[test]
    fn test_negotiated_pdu_length() {
        let params = hex::decode("f0000001000101e0").unwrap();
        let response = S7Response::from_bytes(&ack(0, &params, &[])).unwrap();
        assert_eq!(response.negotiated_pdu_length().unwrap(), 480);

        let response =
            S7Response::from_bytes(&ack(0, &hex::decode("f00000010001").unwrap(), &[])).unwrap();
        assert!(matches!(
            response.negotiated_pdu_length(),
            Err(S7Error::PduNegotiationFailed { .. })
        ));

        let params = hex::decode("04000001000101e0").unwrap();
        let response = S7Response::from_bytes(&ack(0, &params, &[])).unwrap();
        assert!(response.negotiated_pdu_length().is_err());
    }

    #[test]
    fn test_fill_read_items() {
        let mut targets = items(&["DB1.DBB0", "DB1.DBX4.1", "DB1.DBW2", "DB1.DBD8"]);
        let data = hex::decode(concat!(
            "ff0400080700",     // byte, padded
            "0a000000",         // object does not exist, no payload
            "ff040010012c",     // word
            "ff0400203f800000", // double word, last
        ))
        .unwrap();
        let pdu = ack(1, &[0x04, 0x04], &data);
        let response = S7Response::from_bytes(&pdu).unwrap();
        response.fill_read_items(&mut targets).unwrap();

        assert_eq!(targets[0].data, [7, 0, 0, 0]);
        assert_eq!(targets[0].error, None);
        assert_eq!(targets[1].error, Some(ItemError::ObjectDoesNotExist));
        assert_eq!(targets[2].data, [0x01, 0x2C, 0, 0]);
        assert_eq!(targets[3].data, 1.0f32.to_be_bytes());
    }

    #[test]
    fn test_fill_read_bit_item() {
        let mut targets = items(&["DB1.DBX0.3", "DB1.DBB1"]);
        let data = hex::decode("ff0300010100ff040008ff").unwrap();
        let response = S7Response::from_bytes(&ack(1, &[0x04, 0x02], &data)).unwrap();
        response.fill_read_items(&mut targets).unwrap();
        assert_eq!(targets[0].data[0], 1);
        assert_eq!(targets[1].data[0], 0xFF);
    }

    #[test]
    fn test_fill_read_items_mismatch() {
        let mut targets = items(&["DB1.DBB0", "DB1.DBB1"]);
        let response =
            S7Response::from_bytes(&ack(1, &[0x04, 0x01], &hex::decode("ff04000807").unwrap()))
                .unwrap();
        assert!(response.fill_read_items(&mut targets).is_err());

        let response =
            S7Response::from_bytes(&ack(1, &[0x04, 0x02], &hex::decode("ff04000807").unwrap()))
                .unwrap();
        assert!(matches!(
            response.fill_read_items(&mut targets),
            Err(S7Error::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_fill_read_short_payload() {
        // word requested, one byte answered
        let mut targets = items(&["DB1.DBW2"]);
        let response =
            S7Response::from_bytes(&ack(1, &[0x04, 0x01], &hex::decode("ff04000807").unwrap()))
                .unwrap();
        assert!(matches!(
            response.fill_read_items(&mut targets),
            Err(S7Error::InvalidResponse { .. })
        ));

        // bit answered with no data bytes
        let mut targets = items(&["DB1.DBX0.0"]);
        let response =
            S7Response::from_bytes(&ack(1, &[0x04, 0x01], &hex::decode("ff030000").unwrap()))
                .unwrap();
        assert!(response.fill_read_items(&mut targets).is_err());
    }

    #[test]
    fn test_apply_write_results() {
        let mut targets = items(&["DB1.DBB0", "DB1.DBW2", "DB1.DBW4"]);
        let response = S7Response::from_bytes(&ack(3, &[0x05, 0x03], &[0xFF, 0x05, 0xFF])).unwrap();
        response.apply_write_results(&mut targets).unwrap();
        assert_eq!(targets[0].error, None);
        assert_eq!(targets[1].error, Some(ItemError::InvalidAddress));
        assert_eq!(targets[2].error, None);

        let response = S7Response::from_bytes(&ack(3, &[0x05, 0x03], &[0xFF])).unwrap();
        assert!(response.apply_write_results(&mut targets).is_err());
    }

    #[test]
    fn test_full_frame() {
        let frame = wrap_data(&ack(2, &[0x05, 0x01], &[0xFF])).unwrap();
        let pdu = crate::header::unwrap_data(&frame).unwrap();
        let response = S7Response::from_bytes(pdu).unwrap();
        assert_eq!(response.header.pdu_ref, 2);
        assert_eq!(response.data, vec![0xFF]);
    }
}
