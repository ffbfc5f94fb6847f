//! Column value representation
//!
//! Logical rows are vectors of [`Value`]. Delta columns carry their content
//! as flat bytes on disk; [`Value::canonical_bytes`] and
//! [`Value::from_canonical_bytes`] define the mapping both directions.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Data types a column can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// Boolean
    Bool,
    /// Signed 64-bit integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 text
    Text,
    /// Raw bytes
    Bytes,
}

impl ColumnType {
    /// Whether the type can serve as a delta column (flat byte content).
    pub fn supports_delta(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Bytes)
    }

    /// Whether the type has a total order usable for an order-by column.
    pub fn is_orderable(&self) -> bool {
        !matches!(self, ColumnType::Bytes)
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl Value {
    /// True if this is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Flat byte content for hashing and delta encoding.
    ///
    /// Returns `None` for NULL.
    pub fn canonical_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(vec![u8::from(*b)]),
            Value::Int(i) => Some(i.to_le_bytes().to_vec()),
            Value::Float(f) => Some(f.to_bits().to_le_bytes().to_vec()),
            Value::Text(s) => Some(s.as_bytes().to_vec()),
            Value::Bytes(b) => Some(b.clone()),
        }
    }

    /// Rebuild a value of the given type from its canonical bytes.
    pub fn from_canonical_bytes(ty: ColumnType, bytes: &[u8]) -> Result<Value> {
        match ty {
            ColumnType::Text => match String::from_utf8(bytes.to_vec()) {
                Ok(s) => Ok(Value::Text(s)),
                Err(_) => Err(Error::DataCorrupted(
                    "reconstructed text column is not valid UTF-8".into(),
                )),
            },
            ColumnType::Bytes => Ok(Value::Bytes(bytes.to_vec())),
            ColumnType::Bool if bytes.len() == 1 => Ok(Value::Bool(bytes[0] != 0)),
            ColumnType::Int if bytes.len() == 8 => {
                Ok(Value::Int(i64::from_le_bytes(bytes.try_into().unwrap())))
            }
            ColumnType::Float if bytes.len() == 8 => Ok(Value::Float(f64::from_bits(
                u64::from_le_bytes(bytes.try_into().unwrap()),
            ))),
            _ => Err(Error::DataCorrupted(format!(
                "canonical byte length {} does not match column type {:?}",
                bytes.len(),
                ty
            ))),
        }
    }

    /// Total-order comparison for order-by validation.
    ///
    /// NULL sorts before everything; mixed-type comparison is an error.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
            _ => Err(Error::Internal(format!(
                "cannot compare values of different types: {self:?} vs {other:?}"
            ))),
        }
    }

    /// JSON rendering for introspection output.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(hex::encode(b)),
        }
    }
}
