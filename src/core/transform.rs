//! Reply transforms for [`QueryExecutor::execute`](crate::core::executor::QueryExecutor::execute).
//!
//! Each function takes the reply by value and either produces a plain Rust
//! value or fails with [`Error::Protocol`] when the reply has the wrong
//! shape. Server error replies never reach a transform through the executor,
//! but are still mapped to [`Error::Query`] when one is called directly.

use std::collections::HashMap;

use bytes::Bytes;

use crate::proto::value::RespValue;
use crate::{Error, Result};

fn unexpected(expected: &str, value: RespValue) -> Error {
    match value {
        RespValue::Error(message) => Error::from_server_message(message),
        other => Error::Protocol {
            message: format!("expected {}, got {}", expected, other.type_name()),
        },
    }
}

/// Interprets an integer or a non-empty bulk string as a boolean.
///
/// `SET` answers `OK`, `EXISTS` answers `1`, `SET NX` answers nil on miss.
pub fn to_bool(value: RespValue) -> Result<bool> {
    match value {
        RespValue::Integer(i) => Ok(i != 0),
        RespValue::SimpleStatus(_) => Ok(true),
        RespValue::BulkString(b) => Ok(b.map_or(false, |bytes| !bytes.is_empty())),
        RespValue::Array(None) => Ok(false),
        other => Err(unexpected("boolean", other)),
    }
}

/// Converts an integer reply, or a bulk string holding one.
pub fn to_int(value: RespValue) -> Result<i64> {
    match value {
        RespValue::Integer(i) => Ok(i),
        RespValue::BulkString(Some(b)) => std::str::from_utf8(&b)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Protocol {
                message: "invalid integer".to_string(),
            }),
        other => Err(unexpected("integer", other)),
    }
}

/// Converts a bulk string reply; nil becomes `None`.
pub fn to_bytes(value: RespValue) -> Result<Option<Bytes>> {
    match value {
        RespValue::BulkString(b) => Ok(b),
        RespValue::SimpleStatus(s) => Ok(Some(Bytes::from(s))),
        other => Err(unexpected("bulk string", other)),
    }
}

/// Converts any scalar reply to text. Nil becomes the empty string.
pub fn to_string(value: RespValue) -> Result<String> {
    match value {
        RespValue::SimpleStatus(s) => Ok(s),
        RespValue::BulkString(Some(b)) => Ok(String::from_utf8_lossy(&b).into_owned()),
        RespValue::BulkString(None) => Ok(String::new()),
        RespValue::Integer(i) => Ok(i.to_string()),
        other => Err(unexpected("string", other)),
    }
}

/// Converts an array of bulk strings; nil elements stay `None`.
///
/// A nil array becomes an empty vector.
pub fn to_vec(value: RespValue) -> Result<Vec<Option<Bytes>>> {
    match value {
        RespValue::Array(None) => Ok(Vec::new()),
        RespValue::Array(Some(items)) => items.into_iter().map(to_bytes).collect(),
        other => Err(unexpected("array", other)),
    }
}

/// Converts a flat `[field, value, field, value, ...]` array into a map.
pub fn to_map(value: RespValue) -> Result<HashMap<String, Bytes>> {
    let items = match value {
        RespValue::Array(Some(items)) => items,
        RespValue::Array(None) => return Ok(HashMap::new()),
        other => return Err(unexpected("array", other)),
    };

    if items.len() % 2 != 0 {
        return Err(Error::Protocol {
            message: "map reply must have an even number of elements".to_string(),
        });
    }

    let mut map = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        map.insert(to_string(field)?, to_bytes(value)?.unwrap_or_default());
    }
    Ok(map)
}

/// Converts a bulk string holding a float (e.g. `INCRBYFLOAT`).
pub fn to_float(value: RespValue) -> Result<f64> {
    match value {
        RespValue::Integer(i) => Ok(i as f64),
        RespValue::BulkString(Some(b)) => std::str::from_utf8(&b)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Protocol {
                message: "invalid float value".to_string(),
            }),
        other => Err(unexpected("float", other)),
    }
}

/// Splits a `SCAN` reply `[cursor, [key, ...]]` into the next cursor and keys.
pub fn to_scan(value: RespValue) -> Result<(u64, Vec<Bytes>)> {
    let items = match value {
        RespValue::Array(Some(items)) if items.len() == 2 => items,
        RespValue::Array(_) => {
            return Err(Error::Protocol {
                message: "SCAN reply must have 2 elements".to_string(),
            })
        }
        other => return Err(unexpected("array", other)),
    };

    let mut iter = items.into_iter();
    let (Some(cursor), Some(keys)) = (iter.next(), iter.next()) else {
        return Err(Error::Protocol {
            message: "SCAN reply must have 2 elements".to_string(),
        });
    };

    let cursor = to_string(cursor)?
        .parse::<u64>()
        .map_err(|_| Error::Protocol {
            message: "invalid cursor value".to_string(),
        })?;

    let keys = to_vec(keys)?.into_iter().flatten().collect();
    Ok((cursor, keys))
}
