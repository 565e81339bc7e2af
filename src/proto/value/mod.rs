//! RESP value types.
//!
//! This module defines the closed set of values a RESP2 server can send:
//! simple statuses, errors, integers, bulk strings, and arrays.

/// Value type definitions.
pub mod types;

pub use types::RespValue;
