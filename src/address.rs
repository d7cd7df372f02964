//! Symbolic tag address parsing.
//!
//! Tags name one element of PLC memory in the usual STEP 7 notation:
//!
//! | Address | Element | Block | Offset |
//! |---------|---------|------:|-------:|
//! | `DB1.DBX100.0` | bit | 1 | bit 800 |
//! | `DB1.DBB0` | byte | 1 | byte 0 |
//! | `DB2.DBW2` | word | 2 | byte 2 |
//! | `DB2.DBD26` | double word | 2 | byte 26 |
//!
//! Parsing is pure: the result is built fresh for each call and never cached.
//!
//! # Example
//!
//! ```
//! use s7_driver::{parse_address, ElementSize, MemoryArea};
//!
//! let addr = parse_address(" db1.dbx100.0 ").unwrap();
//! assert_eq!(addr.area, MemoryArea::DataBlock);
//! assert_eq!(addr.block_number, 1);
//! assert_eq!(addr.bit_offset, 800);
//! assert_eq!(addr.element_size, ElementSize::Bit);
//! assert_eq!(addr.amount, 1);
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;
use crate::memory::{ElementSize, MemoryArea};

/// Largest byte offset the 24-bit S7 bit address can express.
pub const MAX_BYTE_OFFSET: u32 = 0x00FF_FFFF >> 3;

/// Two-character prefixes of real but untransferred areas.
const UNSUPPORTED_PREFIXES: [(&str, MemoryArea); 9] = [
    ("EB", MemoryArea::ProcessInputs),
    ("EW", MemoryArea::ProcessInputs),
    ("ED", MemoryArea::ProcessInputs),
    ("AB", MemoryArea::ProcessOutputs),
    ("AW", MemoryArea::ProcessOutputs),
    ("AD", MemoryArea::ProcessOutputs),
    ("MB", MemoryArea::Merkers),
    ("MW", MemoryArea::Merkers),
    ("MD", MemoryArea::Merkers),
];

/// Structured address of one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressDescriptor {
    /// Memory area; always [`MemoryArea::DataBlock`] for parsed tags.
    pub area: MemoryArea,
    /// Data block number.
    pub block_number: u16,
    /// `byte * 8 + bit` for bit elements, the byte offset otherwise.
    pub bit_offset: u32,
    /// Transfer granularity.
    pub element_size: ElementSize,
    /// Number of elements, always 1.
    pub amount: u16,
}

impl AddressDescriptor {
    /// Start address as carried in the item specification (always in bits).
    ///
    /// # Example
    ///
    /// ```
    /// use s7_driver::parse_address;
    ///
    /// assert_eq!(parse_address("DB1.DBX2.3").unwrap().wire_address(), 19);
    /// assert_eq!(parse_address("DB1.DBW2").unwrap().wire_address(), 16);
    /// ```
    pub fn wire_address(&self) -> u32 {
        match self.element_size {
            ElementSize::Bit => self.bit_offset,
            _ => self.bit_offset << 3,
        }
    }
}

impl fmt::Display for AddressDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.block_number;
        match self.element_size {
            ElementSize::Bit => write!(
                f,
                "DB{n}.DBX{}.{}",
                self.bit_offset / 8,
                self.bit_offset % 8
            ),
            ElementSize::Byte => write!(f, "DB{n}.DBB{}", self.bit_offset),
            ElementSize::Word => write!(f, "DB{n}.DBW{}", self.bit_offset),
            ElementSize::DoubleWord => write!(f, "DB{n}.DBD{}", self.bit_offset),
        }
    }
}

impl FromStr for AddressDescriptor {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Parses a symbolic tag address.
///
/// The symbol is uppercased and stripped of all whitespace first. Only data
/// block tags resolve; recognised non-DB areas fail with
/// [`AddressError::Unsupported`].
///
/// # Errors
///
/// Returns an [`AddressError`] describing the first problem found.
///
/// # Example
///
/// ```
/// use s7_driver::{parse_address, AddressError};
///
/// assert!(parse_address("DB1.DBW2").is_ok());
/// assert!(matches!(parse_address("DBX100"), Err(AddressError::MalformedAddress { .. })));
/// assert!(matches!(parse_address("MW10"), Err(AddressError::Unsupported { .. })));
/// ```
pub fn parse(symbol: &str) -> Result<AddressDescriptor, AddressError> {
    let normalized: String = symbol
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if normalized.is_empty() {
        return Err(AddressError::Empty);
    }

    classify_area(&normalized)?;
    parse_data_block(&normalized)
}

fn classify_area(symbol: &str) -> Result<(), AddressError> {
    if symbol.starts_with("DB") {
        return Ok(());
    }

    let unsupported = |area| AddressError::Unsupported {
        area,
        symbol: symbol.to_owned(),
    };

    if let Some((_, area)) = UNSUPPORTED_PREFIXES
        .iter()
        .find(|(prefix, _)| symbol.starts_with(prefix))
    {
        return Err(unsupported(*area));
    }

    match symbol.as_bytes()[0] {
        b'E' | b'I' => Err(unsupported(MemoryArea::ProcessInputs)),
        b'A' | b'Q' => Err(unsupported(MemoryArea::ProcessOutputs)),
        b'M' => Err(unsupported(MemoryArea::Merkers)),
        b'T' => Err(unsupported(MemoryArea::Timers)),
        b'C' | b'Z' => Err(unsupported(MemoryArea::Counters)),
        _ => Err(AddressError::UnknownArea {
            symbol: symbol.to_owned(),
        }),
    }
}

fn parse_data_block(symbol: &str) -> Result<AddressDescriptor, AddressError> {
    let tokens: Vec<&str> = symbol.split('.').collect();
    if tokens.len() < 2 {
        return Err(AddressError::malformed(
            symbol,
            "expected DB<n>.DB<type><offset>",
        ));
    }

    let block_number = parse_number::<u16>("block number", &tokens[0][2..])?;

    let element = tokens[1];
    let tag = element.get(..3).ok_or_else(|| AddressError::UnknownElementType {
        tag: element.to_owned(),
    })?;
    let element_size = match tag {
        "DBX" => ElementSize::Bit,
        "DBB" => ElementSize::Byte,
        "DBW" => ElementSize::Word,
        "DBD" => ElementSize::DoubleWord,
        _ => {
            return Err(AddressError::UnknownElementType {
                tag: tag.to_owned(),
            })
        }
    };

    let byte_offset = parse_number::<u32>("byte offset", &element[3..])?;
    if byte_offset > MAX_BYTE_OFFSET {
        return Err(AddressError::OffsetOutOfRange {
            offset: byte_offset,
        });
    }

    let bit_offset = match element_size {
        ElementSize::Bit => {
            if tokens.len() != 3 {
                return Err(AddressError::malformed(
                    symbol,
                    "bit access needs exactly one bit index",
                ));
            }
            let bit = parse_number::<u32>("bit index", tokens[2])?;
            if bit > 7 {
                return Err(AddressError::BitIndexOutOfRange { bit });
            }
            byte_offset * 8 + bit
        }
        _ => {
            if tokens.len() != 2 {
                return Err(AddressError::malformed(
                    symbol,
                    "only bit access takes a bit index",
                ));
            }
            byte_offset
        }
    };

    Ok(AddressDescriptor {
        area: MemoryArea::DataBlock,
        block_number,
        bit_offset,
        element_size,
        amount: 1,
    })
}

/// Parses plain decimal digits; signs and empty tokens are refused.
fn parse_number<T: FromStr>(field: &'static str, token: &str) -> Result<T, AddressError> {
    let invalid = || AddressError::InvalidNumber {
        field,
        token: token.to_owned(),
    };
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    token.parse().map_err(|_| invalid())
}
