//! A small bencode codec.
//!
//! [`decode`] materializes a [`Value`] tree, [`locate_value_span`] finds the
//! exact bytes backing a dictionary entry without building anything. The
//! latter is what the info hash is computed over: re-encoding a decoded value
//! is not guaranteed to reproduce the original bytes.

use std::collections::BTreeMap;

use thiserror::Error;

mod decode;
mod encode;
mod span;

pub use decode::{decode, decode_all, MAX_DEPTH};
pub use encode::encode;
pub use span::locate_value_span;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    /// Raw bytes, not necessarily UTF-8.
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Keys are unique; a `BTreeMap` keeps them in the sorted order bencode
    /// requires when encoding.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up `key` if this is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// Renders the value as JSON. Byte strings become (lossy) UTF-8 text.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
            Value::Dict(d) => serde_json::Value::Object(
                d.iter()
                    .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BencodeError {
    #[error("Unexpected end of input at offset {0}")]
    UnexpectedEof(usize),
    #[error("Unexpected byte `{byte:#04x}` at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },
    #[error("Invalid integer `{text}` at offset {offset}")]
    InvalidInteger { text: String, offset: usize },
    #[error("Invalid byte string length at offset {0}")]
    InvalidLength(usize),
    #[error("Dictionary key at offset {0} is not a byte string")]
    NonStringKey(usize),
    #[error("{0} trailing bytes after the value")]
    TrailingData(usize),
    #[error("Unbalanced container terminator at offset {0}")]
    Unbalanced(usize),
    #[error("Containers nested too deeply at offset {0}")]
    TooDeep(usize),
}
