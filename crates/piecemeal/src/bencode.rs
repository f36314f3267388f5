//! Owned bencode values.
//!
//! The metafile is first decoded into a [`Value`] tree and only then projected
//! into the typed structs of [`crate::metainfo`], so every shape error is
//! reported in one place.
use std::collections::BTreeMap;

use bendy::{
    decoding::{self, Decoder, FromBencode, Object},
    encoding::{self, SingleItemEncoder, ToBencode},
};
use thiserror::Error;

/// Deepest nesting accepted while decoding. Metafiles rarely go past 4.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BencodeError {
    #[error("malformed bencode: {0}")]
    Malformed(String),

    #[error("the buffer is empty")]
    Empty,

    #[error("trailing data after the first value")]
    TrailingData,

    #[error("failed to encode: {0}")]
    Encode(String),
}

impl From<decoding::Error> for BencodeError {
    fn from(value: decoding::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

impl From<encoding::Error> for BencodeError {
    fn from(value: encoding::Error) -> Self {
        Self::Encode(value.to_string())
    }
}

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    /// A byte string, not necessarily UTF-8.
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Keys are kept sorted, which is also the canonical encoding order.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Decode exactly one value from `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, BencodeError> {
        let mut decoder = Decoder::new(buf).with_max_depth(MAX_DEPTH);

        let value = match decoder.next_object()? {
            Some(object) => Self::decode_bencode_object(object)?,
            None => return Err(BencodeError::Empty),
        };

        if decoder.next_object()?.is_some() {
            return Err(BencodeError::TrailingData);
        }

        Ok(value)
    }

    /// Canonical encoding of the value.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BencodeError> {
        Ok(self.to_bencode()?)
    }

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

    /// The value as UTF-8, if it is a byte string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up `key` if this value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}

impl FromBencode for Value {
    const EXPECTED_RECURSION_DEPTH: usize = MAX_DEPTH;

    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        match object {
            int @ Object::Integer(_) => {
                i64::decode_bencode_object(int).map(Value::Integer)
            }
            Object::Bytes(b) => Ok(Value::Bytes(b.to_vec())),
            Object::List(mut list_dec) => {
                let mut list = Vec::new();
                while let Some(item) = list_dec.next_object()? {
                    list.push(Value::decode_bencode_object(item)?);
                }
                Ok(Value::List(list))
            }
            Object::Dict(mut dict_dec) => {
                let mut dict = BTreeMap::new();
                while let Some((key, item)) = dict_dec.next_pair()? {
                    let item = Value::decode_bencode_object(item)?;
                    dict.insert(key.to_vec(), item);
                }
                Ok(Value::Dict(dict))
            }
        }
    }
}

impl ToBencode for Value {
    const MAX_DEPTH: usize = MAX_DEPTH;

    fn encode(
        &self,
        encoder: SingleItemEncoder,
    ) -> Result<(), encoding::Error> {
        match self {
            Value::Integer(i) => encoder.emit_int(*i),
            Value::Bytes(b) => encoder.emit_bytes(b),
            Value::List(list) => encoder.emit_list(|e| {
                for item in list {
                    e.emit(item)?;
                }
                Ok(())
            }),
            Value::Dict(dict) => encoder.emit_dict(|mut e| {
                for (key, item) in dict {
                    e.emit_pair(key.as_slice(), item)?;
                }
                Ok(())
            }),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<Vec<u8>, Value>> for Value {
    fn from(d: BTreeMap<Vec<u8>, Value>) -> Self {
        Value::Dict(d)
    }
}
