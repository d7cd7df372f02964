//! Memory area and element size definitions for the S7 protocol.
//!
//! [`MemoryArea`] identifies the region of PLC memory an item lives in and
//! [`ElementSize`] the transfer granularity of one addressed value.
//!
//! # Memory Areas Overview
//!
//! | Area | Prefixes | Code | Transferred by this adapter |
//! |------|----------|:----:|:---------------------------:|
//! | Process inputs | `E`, `I` | 0x81 | ✗ |
//! | Process outputs | `A`, `Q` | 0x82 | ✗ |
//! | Merkers | `M` | 0x83 | ✗ |
//! | Data blocks | `DB` | 0x84 | ✓ |
//! | Counters | `C`, `Z` | 0x1C | ✗ |
//! | Timers | `T` | 0x1D | ✗ |
//!
//! # Example
//!
//! ```
//! use s7_driver::{ElementSize, MemoryArea};
//!
//! assert!(MemoryArea::DataBlock.is_supported());
//! assert!(!MemoryArea::Merkers.is_supported());
//! assert_eq!(MemoryArea::DataBlock.to_string(), "DB");
//!
//! assert_eq!(ElementSize::Word.byte_len(), 2);
//! ```

use serde::{Deserialize, Serialize};

/// Memory areas of an S7 CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryArea {
    /// Process image of the inputs.
    ProcessInputs,
    /// Process image of the outputs.
    ProcessOutputs,
    /// Merker (flag) memory.
    Merkers,
    /// Data blocks.
    DataBlock,
    /// Counters.
    Counters,
    /// Timers.
    Timers,
}

impl MemoryArea {
    /// Returns the S7 area code used in item specifications.
    pub fn code(self) -> u8 {
        match self {
            MemoryArea::ProcessInputs => 0x81,
            MemoryArea::ProcessOutputs => 0x82,
            MemoryArea::Merkers => 0x83,
            MemoryArea::DataBlock => 0x84,
            MemoryArea::Counters => 0x1C,
            MemoryArea::Timers => 0x1D,
        }
    }

    /// Returns whether tags in this area can be read and written.
    ///
    /// Only data blocks are transferred; the address parser rejects the rest.
    pub fn is_supported(self) -> bool {
        matches!(self, MemoryArea::DataBlock)
    }
}

impl std::fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryArea::ProcessInputs => write!(f, "PE"),
            MemoryArea::ProcessOutputs => write!(f, "PA"),
            MemoryArea::Merkers => write!(f, "MK"),
            MemoryArea::DataBlock => write!(f, "DB"),
            MemoryArea::Counters => write!(f, "CT"),
            MemoryArea::Timers => write!(f, "TM"),
        }
    }
}

/// Transfer granularity of one addressed element.
///
/// The request side uses the S7 "word length" codes; the data side of write
/// requests and read responses uses the matching transport size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementSize {
    /// Single bit (`DBX`).
    Bit,
    /// 8-bit byte (`DBB`).
    Byte,
    /// 16-bit word (`DBW`).
    Word,
    /// 32-bit double word (`DBD`).
    DoubleWord,
}

impl ElementSize {
    /// Word length code for the item specification.
    pub fn code(self) -> u8 {
        match self {
            ElementSize::Bit => 0x01,
            ElementSize::Byte => 0x02,
            ElementSize::Word => 0x04,
            ElementSize::DoubleWord => 0x06,
        }
    }

    /// Transport size code for the data section.
    ///
    /// Bits travel as `BIT` (0x03), everything else as `BYTE/WORD/DWORD` (0x04);
    /// both express their length in bits.
    pub(crate) fn transport_size(self) -> u8 {
        match self {
            ElementSize::Bit => 0x03,
            _ => 0x04,
        }
    }

    /// Number of payload bytes one element occupies on the wire.
    pub fn byte_len(self) -> usize {
        match self {
            ElementSize::Bit | ElementSize::Byte => 1,
            ElementSize::Word => 2,
            ElementSize::DoubleWord => 4,
        }
    }

    /// Length field of the data section, in bits.
    pub(crate) fn bit_len(self) -> u16 {
        match self {
            ElementSize::Bit => 1,
            other => (other.byte_len() * 8) as u16,
        }
    }
}

impl std::fmt::Display for ElementSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementSize::Bit => write!(f, "bit"),
            ElementSize::Byte => write!(f, "byte"),
            ElementSize::Word => write!(f, "word"),
            ElementSize::DoubleWord => write!(f, "double word"),
        }
    }
}
