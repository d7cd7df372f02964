//! Host-facing value model: declared value types, scalars, requests and results.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::NODE_NAME;

/// Value type declared for a device resource.
///
/// Names follow the host's resource model (`"Uint16"`, `"Float32"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// ASCII string.
    String,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Unsigned 64-bit integer.
    Uint64,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// Opaque pass-through value, write only.
    Object,
}

impl ValueType {
    /// All value types, in declaration order.
    pub const ALL: [ValueType; 13] = [
        ValueType::Bool,
        ValueType::String,
        ValueType::Uint8,
        ValueType::Uint16,
        ValueType::Uint32,
        ValueType::Uint64,
        ValueType::Int8,
        ValueType::Int16,
        ValueType::Int32,
        ValueType::Int64,
        ValueType::Float32,
        ValueType::Float64,
        ValueType::Object,
    ];

    /// Returns the host name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Bool => "Bool",
            ValueType::String => "String",
            ValueType::Uint8 => "Uint8",
            ValueType::Uint16 => "Uint16",
            ValueType::Uint32 => "Uint32",
            ValueType::Uint64 => "Uint64",
            ValueType::Int8 => "Int8",
            ValueType::Int16 => "Int16",
            ValueType::Int32 => "Int32",
            ValueType::Int64 => "Int64",
            ValueType::Float32 => "Float32",
            ValueType::Float64 => "Float64",
            ValueType::Object => "Object",
        }
    }

    /// Returns whether the type is a signed integer.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ValueType::Int8 | ValueType::Int16 | ValueType::Int32 | ValueType::Int64
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValueType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported value type '{s}'"))
    }
}

/// A typed scalar exchanged with the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    /// Boolean.
    Bool(bool),
    /// ASCII string.
    String(String),
    /// Unsigned 8-bit integer.
    Uint8(u8),
    /// Unsigned 16-bit integer.
    Uint16(u16),
    /// Unsigned 32-bit integer.
    Uint32(u32),
    /// Unsigned 64-bit integer.
    Uint64(u64),
    /// Signed 8-bit integer.
    Int8(i8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// 32-bit float.
    Float32(f32),
    /// 64-bit float.
    Float64(f64),
    /// Opaque pass-through value.
    Object(serde_json::Value),
}

impl ScalarValue {
    /// Returns the type of the value.
    pub fn value_type(&self) -> ValueType {
        match self {
            ScalarValue::Bool(_) => ValueType::Bool,
            ScalarValue::String(_) => ValueType::String,
            ScalarValue::Uint8(_) => ValueType::Uint8,
            ScalarValue::Uint16(_) => ValueType::Uint16,
            ScalarValue::Uint32(_) => ValueType::Uint32,
            ScalarValue::Uint64(_) => ValueType::Uint64,
            ScalarValue::Int8(_) => ValueType::Int8,
            ScalarValue::Int16(_) => ValueType::Int16,
            ScalarValue::Int32(_) => ValueType::Int32,
            ScalarValue::Int64(_) => ValueType::Int64,
            ScalarValue::Float32(_) => ValueType::Float32,
            ScalarValue::Float64(_) => ValueType::Float64,
            ScalarValue::Object(_) => ValueType::Object,
        }
    }

    /// Returns the value as an integer when it is one (booleans count as 0/1).
    pub(crate) fn as_integer(&self) -> Option<i128> {
        match *self {
            ScalarValue::Bool(b) => Some(i128::from(b)),
            ScalarValue::Uint8(v) => Some(v.into()),
            ScalarValue::Uint16(v) => Some(v.into()),
            ScalarValue::Uint32(v) => Some(v.into()),
            ScalarValue::Uint64(v) => Some(v.into()),
            ScalarValue::Int8(v) => Some(v.into()),
            ScalarValue::Int16(v) => Some(v.into()),
            ScalarValue::Int32(v) => Some(v.into()),
            ScalarValue::Int64(v) => Some(v.into()),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::String(v) => write!(f, "{v:?}"),
            ScalarValue::Uint8(v) => write!(f, "{v}"),
            ScalarValue::Uint16(v) => write!(f, "{v}"),
            ScalarValue::Uint32(v) => write!(f, "{v}"),
            ScalarValue::Uint64(v) => write!(f, "{v}"),
            ScalarValue::Int8(v) => write!(f, "{v}"),
            ScalarValue::Int16(v) => write!(f, "{v}"),
            ScalarValue::Int32(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float32(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Object(v) => write!(f, "{v}"),
        }
    }
}

/// One resource operation requested by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Name of the device resource.
    pub resource_name: String,
    /// Resource attributes; the symbolic address lives under [`NODE_NAME`].
    pub attributes: HashMap<String, serde_json::Value>,
    /// Declared value type of the resource.
    pub value_type: ValueType,
}

impl CommandRequest {
    /// Creates a request without attributes.
    pub fn new(resource_name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            resource_name: resource_name.into(),
            attributes: HashMap::new(),
            value_type,
        }
    }

    /// Sets the symbolic address attribute.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_driver::{CommandRequest, ValueType};
    ///
    /// let req = CommandRequest::new("Speed", ValueType::Uint16).with_node_name("DB1.DBW2");
    /// assert_eq!(req.node_name(), Some("DB1.DBW2"));
    /// ```
    pub fn with_node_name(self, node_name: impl Into<String>) -> Self {
        self.with_attribute(NODE_NAME, serde_json::Value::String(node_name.into()))
    }

    /// Sets an arbitrary attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Returns the symbolic address, if the attribute holds a string.
    pub fn node_name(&self) -> Option<&str> {
        self.attributes.get(NODE_NAME).and_then(|v| v.as_str())
    }
}

/// A typed value read from, or to be written to, a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandValue {
    /// Name of the device resource.
    pub resource_name: String,
    /// Type of `value`.
    pub value_type: ValueType,
    /// The value itself.
    pub value: ScalarValue,
    /// Creation time in nanoseconds since the Unix epoch.
    pub origin: i64,
}

impl CommandValue {
    /// Creates a value stamped with the current time.
    ///
    /// # Example
    ///
    /// ```
    /// use s7_driver::{CommandValue, ScalarValue, ValueType};
    ///
    /// let value = CommandValue::new("Speed", ScalarValue::Uint16(300));
    /// assert_eq!(value.value_type, ValueType::Uint16);
    /// assert!(value.origin > 0);
    /// ```
    pub fn new(resource_name: impl Into<String>, value: ScalarValue) -> Self {
        Self {
            resource_name: resource_name.into(),
            value_type: value.value_type(),
            value,
            origin: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }
}
