//! Tagged binary wire protocol
//!
//! Every unit on the wire is a payload: a one-byte tag, a textual header
//! line terminated by CRLF and, for values, a raw body. Six kinds exist:
//! value (`V`), integer (`I`), array (`A`), boolean (`B`), nil (`N`) and
//! error (`E`). The same encoding runs in both directions and both
//! transports.

pub mod reader;
pub mod writer;

use std::io;

use thiserror::Error;

use crate::value::Value;

pub const VALUE_PREFIX: u8 = b'V';
pub const INT_PREFIX: u8 = b'I';
pub const ARRAY_PREFIX: u8 = b'A';
pub const BOOL_PREFIX: u8 = b'B';
pub const NIL_PREFIX: u8 = b'N';
pub const ERR_PREFIX: u8 = b'E';

pub const CRLF: &[u8] = b"\r\n";

/// Hard cap on a single value body, checked before allocation.
pub const MAX_VALUE_SIZE: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("expected prefix {expected:?}, got {got:?}")]
    UnexpectedPrefix { expected: char, got: char },

    #[error("invalid body")]
    InvalidBody,

    #[error("int expected")]
    IntExpected,

    #[error("positive int expected")]
    NonPositiveInt,

    #[error("too large")]
    TooLarge,

    #[error("not-array payload received")]
    NonArray,

    #[error("not-value payload received")]
    NonValue,

    #[error("not-int payload received")]
    NonInt,

    #[error("not-bool payload received")]
    NonBool,

    #[error("not-error payload received")]
    NonError,
}

impl WireError {
    /// Errors worth reporting to the peer as an `E` payload before closing;
    /// plain I/O failures are not.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, WireError::Io(_))
    }
}

/// One decoded unit of the wire protocol. Commands produce these as replies
/// and transports carry them verbatim, so encode/decode round-trips
/// byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Nil,
    Bool(bool),
    Int(i64),
    Value(Value),
    Array(Vec<Payload>),
    Error(String),
}

impl Payload {
    pub fn is_nil(&self) -> bool {
        matches!(self, Payload::Nil)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Payload::Array(_))
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Payload::Error(_))
    }

    pub fn as_bytes(&self) -> Result<&Value, WireError> {
        match self {
            Payload::Value(v) => Ok(v),
            _ => Err(WireError::NonValue),
        }
    }

    pub fn into_value(self) -> Result<Value, WireError> {
        match self {
            Payload::Value(v) => Ok(v),
            _ => Err(WireError::NonValue),
        }
    }

    pub fn as_int(&self) -> Result<i64, WireError> {
        match self {
            Payload::Int(i) => Ok(*i),
            _ => Err(WireError::NonInt),
        }
    }

    pub fn as_bool(&self) -> Result<bool, WireError> {
        match self {
            Payload::Bool(b) => Ok(*b),
            _ => Err(WireError::NonBool),
        }
    }

    pub fn as_array(&self) -> Result<&[Payload], WireError> {
        match self {
            Payload::Array(items) => Ok(items),
            _ => Err(WireError::NonArray),
        }
    }

    pub fn into_array(self) -> Result<Vec<Payload>, WireError> {
        match self {
            Payload::Array(items) => Ok(items),
            _ => Err(WireError::NonArray),
        }
    }

    pub fn as_error(&self) -> Result<&str, WireError> {
        match self {
            Payload::Error(msg) => Ok(msg),
            _ => Err(WireError::NonError),
        }
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<i64> for Payload {
    fn from(i: i64) -> Self {
        Payload::Int(i)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Value(v)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Value(Value::from(s))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Value(Value::new(bytes))
    }
}

impl From<Vec<Value>> for Payload {
    fn from(values: Vec<Value>) -> Self {
        Payload::Array(values.into_iter().map(Payload::Value).collect())
    }
}

impl From<Option<Value>> for Payload {
    fn from(v: Option<Value>) -> Self {
        match v {
            Some(v) => Payload::Value(v),
            None => Payload::Nil,
        }
    }
}
