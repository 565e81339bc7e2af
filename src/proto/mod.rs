//! RESP (Redis Serialization Protocol) wire layer.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder and resumable decoder for RESP
//! - [`error`] - Error types shared by the whole crate
//! - [`value`] - The RESP value model

pub mod codec;
/// Error types.
pub mod error;
pub mod value;
