//! RESP codec.
//!
//! [`Encoder`] turns commands and values into wire bytes; [`Decoder`] turns an
//! arbitrary sequence of byte chunks back into [`RespValue`](crate::proto::value::RespValue)s.

mod decoder;
mod encoder;

pub use decoder::Decoder;
pub use encoder::Encoder;
