use bytes::Bytes;

use crate::proto::error::{Error, Result};

/// A RESP (Redis Serialization Protocol) value.
///
/// Nil is not a separate variant: a nil bulk string is `BulkString(None)` and a
/// nil array is `Array(None)`, both distinct from their empty counterparts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple status (+OK).
    SimpleStatus(String),
    /// Error reply (-ERR ...).
    Error(String),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar), `None` for `$-1`.
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...), `None` for `*-1`.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Creates a bulk string value from anything convertible to [`Bytes`].
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// Creates a simple status value.
    pub fn status(text: impl Into<String>) -> Self {
        RespValue::SimpleStatus(text.into())
    }

    /// Creates an array value from its elements.
    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Returns true for a nil bulk string or a nil array.
    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::BulkString(None) | RespValue::Array(None))
    }

    /// Returns true if this is a server error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Turns an error reply into [`Error::Query`] and passes every other
    /// value through untouched.
    ///
    /// Nested error elements inside arrays are left as values.
    pub fn into_result(self) -> Result<RespValue> {
        match self {
            RespValue::Error(message) => Err(Error::from_server_message(message)),
            other => Ok(other),
        }
    }

    /// Returns whether this value counts as a successful, non-empty answer.
    ///
    /// Nil, errors, `0`, the empty string and the string `"0"` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            RespValue::SimpleStatus(s) => !s.is_empty() && s != "0",
            RespValue::Error(_) => false,
            RespValue::Integer(i) => *i != 0,
            RespValue::BulkString(Some(b)) => !b.is_empty() && b.as_ref() != b"0",
            RespValue::BulkString(None) => false,
            RespValue::Array(Some(items)) => !items.is_empty(),
            RespValue::Array(None) => false,
        }
    }

    /// Borrows the raw bytes of a status or a non-nil bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::SimpleStatus(s) => Some(s.as_bytes()),
            RespValue::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Returns the integer if this is an integer reply.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrows the elements if this is a non-nil array.
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Returns a short name for the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RespValue::SimpleStatus(_) => "status",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(Some(_)) => "bulk string",
            RespValue::BulkString(None) => "nil bulk string",
            RespValue::Array(Some(_)) => "array",
            RespValue::Array(None) => "nil array",
        }
    }
}

impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        RespValue::bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        RespValue::Integer(i)
    }
}
