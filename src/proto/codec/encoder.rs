use bytes::{BufMut, Bytes, BytesMut};

use crate::proto::value::RespValue;

/// A RESP encoder that converts commands and [`RespValue`]s to bytes.
///
/// The encoder accumulates data in an internal buffer and can be used
/// to encode multiple frames back to back (pipelining).
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use plexis::proto::codec::Encoder;
///
/// let mut encoder = Encoder::new();
/// encoder.encode_command(&[Bytes::from("PING")]);
/// assert_eq!(encoder.take().as_ref(), b"*1\r\n$4\r\nPING\r\n");
/// ```
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Encodes a command as an array of bulk strings, one per argument.
    ///
    /// Arguments are binary-safe; embedded CR/LF bytes are length-prefixed
    /// like any other byte.
    pub fn encode_command(&mut self, args: &[Bytes]) {
        let size: usize = args.iter().map(|a| a.len() + 16).sum();
        self.buf.reserve(size + 16);

        self.put_header(b'*', args.len());
        for arg in args {
            self.put_header(b'$', arg.len());
            self.buf.extend_from_slice(arg);
            self.buf.extend_from_slice(b"\r\n");
        }
    }

    /// Encodes a value using RESP protocol.
    ///
    /// Clients only ever send commands; this is used when acting as the
    /// server side of a connection, e.g. in test doubles.
    pub fn encode(&mut self, value: &RespValue) {
        match value {
            RespValue::SimpleStatus(s) => {
                self.buf.put_u8(b'+');
                self.buf.extend_from_slice(s.as_bytes());
                self.buf.extend_from_slice(b"\r\n");
            }
            RespValue::Error(e) => {
                self.buf.put_u8(b'-');
                self.buf.extend_from_slice(e.as_bytes());
                self.buf.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                self.buf.put_u8(b':');
                self.buf.extend_from_slice(n.to_string().as_bytes());
                self.buf.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                self.put_header(b'$', data.len());
                self.buf.extend_from_slice(data);
                self.buf.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(None) => {
                self.buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(Some(items)) => {
                self.put_header(b'*', items.len());
                for item in items {
                    self.encode(item);
                }
            }
            RespValue::Array(None) => {
                self.buf.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    fn put_header(&mut self, marker: u8, len: usize) {
        self.buf.put_u8(marker);
        self.buf.extend_from_slice(len.to_string().as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Takes the encoded data from the buffer, leaving it empty.
    ///
    /// The encoder can be reused afterwards.
    pub fn take(&mut self) -> BytesMut {
        std::mem::take(&mut self.buf)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
