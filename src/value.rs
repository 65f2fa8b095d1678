//! Byte-string values and their parsed interpretations

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("non str")]
    NotUtf8,

    #[error("non int")]
    NotInt,
}

/// An immutable sequence of bytes. Every key, stored element and wire value
/// is one of these; interpretation as UTF-8 text or a signed base-10 integer
/// happens on demand and can fail.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(Vec<u8>);

impl Value {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// UTF-8 view of the bytes.
    pub fn as_utf8(&self) -> Result<&str, ValueError> {
        std::str::from_utf8(&self.0).map_err(|_| ValueError::NotUtf8)
    }

    /// Signed base-10 integer interpretation.
    pub fn to_i64(&self) -> Result<i64, ValueError> {
        self.as_utf8()
            .map_err(|_| ValueError::NotInt)?
            .parse::<i64>()
            .map_err(|_| ValueError::NotInt)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Value({:?})", s),
            Err(_) => write!(f, "Value(0x{})", hex::encode(&self.0)),
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
