//! Conversion between typed scalars and the 4-byte item scratch buffer.
//!
//! S7 data is big-endian and only the first [`ElementSize::byte_len`] bytes of
//! a scratch buffer carry data. Decoding reads the element in the numeric
//! family of the declared type and then checks that the value fits that type;
//! encoding checks that the value fits the element before writing it. Nothing
//! is ever wrapped or truncated.
//!
//! # Example
//!
//! ```
//! use s7_driver::{codec, ElementSize, ScalarValue, ValueType};
//!
//! let value = ScalarValue::Uint16(300);
//! let buffer = codec::encode(&value, ValueType::Uint16, ElementSize::Word).unwrap();
//! assert_eq!(buffer, [0x01, 0x2C, 0x00, 0x00]);
//!
//! let value = codec::decode(&buffer, ElementSize::Word, ValueType::Uint16).unwrap();
//! assert_eq!(value, ScalarValue::Uint16(300));
//!
//! // 300 does not fit a Uint8 resource
//! assert!(codec::decode(&buffer, ElementSize::Word, ValueType::Uint8).is_err());
//! ```

use serde_json::Value;

use crate::error::CodecError;
use crate::memory::ElementSize;
use crate::value::{ScalarValue, ValueType};

/// Size of the per-item scratch buffer.
pub const SCRATCH_LEN: usize = 4;

/// Per-item scratch buffer.
pub type Scratch = [u8; SCRATCH_LEN];

/// Decodes a scratch buffer filled by a read into a value of type `target`.
///
/// # Errors
///
/// - [`CodecError::OutOfRange`] if the raw value does not fit `target`
/// - [`CodecError::WidthMismatch`] if the element cannot carry `target`
/// - [`CodecError::InvalidString`] for non-ASCII string data
/// - [`CodecError::Unsupported`] for [`ValueType::Object`]
pub fn decode(
    buffer: &Scratch,
    size: ElementSize,
    target: ValueType,
) -> Result<ScalarValue, CodecError> {
    let width = size.byte_len();
    match target {
        ValueType::Object => Err(CodecError::Unsupported {
            value_type: target,
            reason: "object values are write-only",
        }),
        ValueType::String => {
            if size == ElementSize::Bit {
                return Err(CodecError::WidthMismatch {
                    value_type: target,
                    size,
                });
            }
            let mut bytes = buffer[..width].to_vec();
            while bytes.last() == Some(&0) {
                bytes.pop();
            }
            if !bytes.is_ascii() {
                return Err(CodecError::InvalidString {
                    reason: format!("non-ASCII data {bytes:02X?}"),
                });
            }
            String::from_utf8(bytes)
                .map(ScalarValue::String)
                .map_err(|e| CodecError::InvalidString {
                    reason: e.to_string(),
                })
        }
        ValueType::Float32 | ValueType::Float64 => {
            if size != ElementSize::DoubleWord {
                return Err(CodecError::WidthMismatch {
                    value_type: target,
                    size,
                });
            }
            let value = f32::from_be_bytes(*buffer);
            Ok(match target {
                ValueType::Float32 => ScalarValue::Float32(value),
                _ => ScalarValue::Float64(f64::from(value)),
            })
        }
        ValueType::Bool => {
            let raw = match size {
                ElementSize::Bit => i128::from(buffer[0] != 0),
                ElementSize::Byte => i128::from(buffer[0]),
                _ => {
                    return Err(CodecError::WidthMismatch {
                        value_type: target,
                        size,
                    })
                }
            };
            integer_to_scalar(raw, target)
        }
        _ => integer_to_scalar(read_integer(buffer, size, target.is_signed()), target),
    }
}

/// Encodes `value` as `target` into a scratch buffer for an element of `size`.
///
/// A value of another type is converted to `target` first. Objects pass
/// through: a JSON array of bytes is copied verbatim, a JSON number or bool is
/// written through the element's own integer width.
///
/// # Errors
///
/// - [`CodecError::TypeMismatch`] if the value cannot be converted to `target`
/// - [`CodecError::OutOfRange`] if the value does not fit `target` or the element
/// - [`CodecError::WidthMismatch`] if the element cannot carry `target`
/// - [`CodecError::InvalidString`] for non-ASCII or oversized strings
pub fn encode(
    value: &ScalarValue,
    target: ValueType,
    size: ElementSize,
) -> Result<Scratch, CodecError> {
    if target == ValueType::Object {
        return match value {
            ScalarValue::Object(json) => encode_object(json, size),
            other => encode(other, other.value_type(), size),
        };
    }

    let mut buffer = [0u8; SCRATCH_LEN];
    match convert(value, target)? {
        ScalarValue::String(s) => {
            if size == ElementSize::Bit {
                return Err(CodecError::WidthMismatch {
                    value_type: target,
                    size,
                });
            }
            if !s.is_ascii() {
                return Err(CodecError::InvalidString {
                    reason: format!("'{s}' is not ASCII"),
                });
            }
            if s.len() > size.byte_len() {
                return Err(CodecError::InvalidString {
                    reason: format!("'{s}' does not fit a {size} element"),
                });
            }
            buffer[..s.len()].copy_from_slice(s.as_bytes());
            Ok(buffer)
        }
        ScalarValue::Float32(v) => write_float(v, target, size),
        ScalarValue::Float64(v) => {
            let narrowed = v as f32;
            if !v.is_nan() && f64::from(narrowed) != v {
                return Err(CodecError::out_of_range(v, target));
            }
            write_float(narrowed, target, size)
        }
        ScalarValue::Bool(b) => match size {
            ElementSize::Bit | ElementSize::Byte => {
                buffer[0] = u8::from(b);
                Ok(buffer)
            }
            _ => Err(CodecError::WidthMismatch {
                value_type: target,
                size,
            }),
        },
        ScalarValue::Object(_) => Err(CodecError::TypeMismatch {
            expected: target,
            found: ValueType::Object,
        }),
        converted => {
            let raw = converted
                .as_integer()
                .ok_or_else(|| CodecError::TypeMismatch {
                    expected: target,
                    found: converted.value_type(),
                })?;
            write_integer(raw, size, width_range(size, target.is_signed()), target)
        }
    }
}

/// Converts a scalar to another value type without losing information.
///
/// Integers, booleans (as 0/1) and floats convert between each other when the
/// value is exactly representable in `target`; strings and objects only
/// convert to themselves.
///
/// # Example
///
/// ```
/// use s7_driver::{codec, ScalarValue, ValueType};
///
/// let v = codec::convert(&ScalarValue::Int64(200), ValueType::Uint8).unwrap();
/// assert_eq!(v, ScalarValue::Uint8(200));
/// assert!(codec::convert(&ScalarValue::Int64(-1), ValueType::Uint8).is_err());
/// ```
pub fn convert(value: &ScalarValue, target: ValueType) -> Result<ScalarValue, CodecError> {
    let found = value.value_type();
    if found == target {
        return Ok(value.clone());
    }
    let mismatch = || CodecError::TypeMismatch {
        expected: target,
        found,
    };

    match target {
        ValueType::String | ValueType::Object => Err(mismatch()),
        ValueType::Float32 | ValueType::Float64 => {
            let v = match *value {
                ScalarValue::Float32(v) => f64::from(v),
                ScalarValue::Float64(v) => v,
                _ => {
                    let raw = value.as_integer().ok_or_else(mismatch)?;
                    let v = raw as f64;
                    if v as i128 != raw {
                        return Err(CodecError::out_of_range(raw, target));
                    }
                    v
                }
            };
            if target == ValueType::Float64 {
                return Ok(ScalarValue::Float64(v));
            }
            let narrowed = v as f32;
            if !v.is_nan() && f64::from(narrowed) != v {
                return Err(CodecError::out_of_range(v, target));
            }
            Ok(ScalarValue::Float32(narrowed))
        }
        _ => {
            let raw = match *value {
                ScalarValue::Float32(v) => float_to_integer(f64::from(v), target)?,
                ScalarValue::Float64(v) => float_to_integer(v, target)?,
                _ => value.as_integer().ok_or_else(mismatch)?,
            };
            integer_to_scalar(raw, target)
        }
    }
}

fn float_to_integer(v: f64, target: ValueType) -> Result<i128, CodecError> {
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(CodecError::out_of_range(v, target));
    }
    Ok(v as i128)
}

fn integer_to_scalar(raw: i128, target: ValueType) -> Result<ScalarValue, CodecError> {
    let out_of_range = |_| CodecError::out_of_range(raw, target);
    Ok(match target {
        ValueType::Bool => match raw {
            0 => ScalarValue::Bool(false),
            1 => ScalarValue::Bool(true),
            _ => return Err(CodecError::out_of_range(raw, target)),
        },
        ValueType::Uint8 => ScalarValue::Uint8(raw.try_into().map_err(out_of_range)?),
        ValueType::Uint16 => ScalarValue::Uint16(raw.try_into().map_err(out_of_range)?),
        ValueType::Uint32 => ScalarValue::Uint32(raw.try_into().map_err(out_of_range)?),
        ValueType::Uint64 => ScalarValue::Uint64(raw.try_into().map_err(out_of_range)?),
        ValueType::Int8 => ScalarValue::Int8(raw.try_into().map_err(out_of_range)?),
        ValueType::Int16 => ScalarValue::Int16(raw.try_into().map_err(out_of_range)?),
        ValueType::Int32 => ScalarValue::Int32(raw.try_into().map_err(out_of_range)?),
        ValueType::Int64 => ScalarValue::Int64(raw.try_into().map_err(out_of_range)?),
        _ => {
            return Err(CodecError::Unsupported {
                value_type: target,
                reason: "not an integer type",
            })
        }
    })
}

fn read_integer(buffer: &Scratch, size: ElementSize, signed: bool) -> i128 {
    match (size, signed) {
        (ElementSize::Bit, _) => i128::from(buffer[0] != 0),
        (ElementSize::Byte, true) => i128::from(buffer[0] as i8),
        (ElementSize::Byte, false) => i128::from(buffer[0]),
        (ElementSize::Word, true) => i128::from(i16::from_be_bytes([buffer[0], buffer[1]])),
        (ElementSize::Word, false) => i128::from(u16::from_be_bytes([buffer[0], buffer[1]])),
        (ElementSize::DoubleWord, true) => i128::from(i32::from_be_bytes(*buffer)),
        (ElementSize::DoubleWord, false) => i128::from(u32::from_be_bytes(*buffer)),
    }
}

/// Inclusive range of raw integers an element can hold.
fn width_range(size: ElementSize, signed: bool) -> (i128, i128) {
    if size == ElementSize::Bit {
        return (0, 1);
    }
    let bits = size.byte_len() as u32 * 8;
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

fn write_integer(
    raw: i128,
    size: ElementSize,
    (min, max): (i128, i128),
    target: ValueType,
) -> Result<Scratch, CodecError> {
    if raw < min || raw > max {
        return Err(CodecError::out_of_range(raw, target));
    }
    let width = size.byte_len();
    // Checked range is within i64, so the low bytes are the two's complement.
    let bytes = (raw as i64).to_be_bytes();
    let mut buffer = [0u8; SCRATCH_LEN];
    buffer[..width].copy_from_slice(&bytes[8 - width..]);
    Ok(buffer)
}

fn write_float(v: f32, target: ValueType, size: ElementSize) -> Result<Scratch, CodecError> {
    if size != ElementSize::DoubleWord {
        return Err(CodecError::WidthMismatch {
            value_type: target,
            size,
        });
    }
    Ok(v.to_be_bytes())
}

fn encode_object(json: &Value, size: ElementSize) -> Result<Scratch, CodecError> {
    let target = ValueType::Object;
    let width = size.byte_len();
    // Either signedness is accepted for raw pass-through.
    let (min, _) = width_range(size, true);
    let (_, max) = width_range(size, false);

    match json {
        Value::Array(items) => {
            if items.len() > width {
                return Err(CodecError::out_of_range(json, target));
            }
            let limit = if size == ElementSize::Bit { 1 } else { 0xFF };
            let mut buffer = [0u8; SCRATCH_LEN];
            for (slot, item) in buffer.iter_mut().zip(items) {
                *slot = item
                    .as_u64()
                    .filter(|b| *b <= limit)
                    .map(|b| b as u8)
                    .ok_or_else(|| CodecError::out_of_range(json, target))?;
            }
            Ok(buffer)
        }
        Value::Bool(b) => write_integer(i128::from(*b), size, (min, max), target),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                write_integer(i128::from(i), size, (min, max), target)
            } else if let Some(u) = n.as_u64() {
                write_integer(i128::from(u), size, (min, max), target)
            } else {
                let v = n.as_f64().unwrap_or(f64::NAN);
                let narrowed = v as f32;
                if f64::from(narrowed) != v {
                    return Err(CodecError::out_of_range(v, target));
                }
                write_float(narrowed, target, size)
            }
        }
        _ => Err(CodecError::Unsupported {
            value_type: target,
            reason: "expected a byte array, a number or a bool",
        }),
    }
}
