use bytes::{Buf, BytesMut};

use crate::proto::error::DecodeError;
use crate::proto::value::RespValue;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

// Caps on up-front allocation; a huge declared length must not allocate
// before its contents actually arrive.
const MAX_PREALLOCATED_ITEMS: usize = 1024;
const MAX_PREALLOCATED_BYTES: usize = 64 * 1024;

/// An array whose header has been read but whose elements are still arriving.
#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<RespValue>,
}

/// A resumable RESP decoder that converts byte chunks to [`RespValue`]s.
///
/// Chunk boundaries do not need to line up with frame boundaries. Call
/// [`append`](Decoder::append) as bytes arrive, then [`decode`](Decoder::decode)
/// until it returns `Ok(None)`. Consumed input is never re-parsed: a half-read
/// array or bulk string is kept as decoder state and resumed on the next call.
///
/// # Example
///
/// ```
/// use plexis::proto::codec::Decoder;
/// use plexis::proto::value::RespValue;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+O");
/// assert!(decoder.decode().unwrap().is_none());
/// decoder.append(b"K\r\n");
/// let value = decoder.decode().unwrap().unwrap();
/// assert_eq!(value, RespValue::SimpleStatus("OK".to_string()));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
    // Open arrays, innermost last.
    stack: Vec<PartialArray>,
    // Length of a bulk string whose header has been consumed.
    pending_bulk: Option<usize>,
    // Bytes of `buf` already searched for CRLF without success.
    scanned: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    ///
    /// # Arguments
    ///
    /// * `max_frame_size` - Maximum size in bytes of a single bulk string or line
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
            stack: Vec::new(),
            pending_bulk: None,
            scanned: 0,
        }
    }

    /// Appends raw bytes to the internal buffer.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the internal buffer so a reader can fill it in place.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Returns true if the decoder holds part of an unfinished value.
    ///
    /// At end of stream this means the peer stopped mid-frame.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty() || !self.stack.is_empty() || self.pending_bulk.is_some()
    }

    /// Checks that the stream ended on a frame boundary.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.has_partial() {
            return Err(DecodeError::new("stream ended inside an unterminated frame"));
        }
        Ok(())
    }

    /// Attempts to decode the next complete value.
    ///
    /// Returns `Ok(Some(value))` once a top-level value is complete,
    /// `Ok(None)` if more input is needed, and `Err(...)` on malformed input.
    /// After an error the decoder state is unspecified and must be discarded.
    pub fn decode(&mut self) -> Result<Option<RespValue>, DecodeError> {
        loop {
            let pending = self.pending_bulk;
            let value = match pending {
                Some(len) => match self.take_bulk(len)? {
                    Some(value) => value,
                    None => return Ok(None),
                },
                None => match self.take_line()? {
                    Some(Step::Value(value)) => value,
                    Some(Step::Continue) => continue,
                    None => return Ok(None),
                },
            };

            if let Some(complete) = self.push_value(value) {
                return Ok(Some(complete));
            }
        }
    }

    fn take_bulk(&mut self, len: usize) -> Result<Option<RespValue>, DecodeError> {
        if self.buf.len() < len + 2 {
            let missing = len + 2 - self.buf.len();
            self.buf.reserve(missing.min(MAX_PREALLOCATED_BYTES));
            return Ok(None);
        }
        if &self.buf[len..len + 2] != b"\r\n" {
            return Err(DecodeError::new("bulk string is not terminated by CRLF"));
        }
        let data = self.buf.split_to(len).freeze();
        self.buf.advance(2);
        self.pending_bulk = None;
        Ok(Some(RespValue::BulkString(Some(data))))
    }

    fn take_line(&mut self) -> Result<Option<Step>, DecodeError> {
        let end = match self.find_crlf() {
            Some(end) => end,
            None => {
                if self.buf.len() > self.max_frame_size {
                    return Err(DecodeError::new("line exceeds maximum frame size"));
                }
                return Ok(None);
            }
        };

        if end == 0 {
            return Err(DecodeError::new("empty line without type marker"));
        }

        let line = self.buf.split_to(end + 2);
        self.scanned = 0;

        let marker = line[0];
        let body = &line[1..end];

        let step = match marker {
            b'+' => Step::Value(RespValue::SimpleStatus(utf8(body)?)),
            b'-' => Step::Value(RespValue::Error(utf8(body)?)),
            b':' => Step::Value(RespValue::Integer(parse_int(body)?)),
            b'$' => match parse_len(body)? {
                None => Step::Value(RespValue::BulkString(None)),
                Some(len) if len > self.max_frame_size => {
                    return Err(DecodeError::new(
                        "bulk string length exceeds maximum frame size",
                    ));
                }
                Some(len) => {
                    self.pending_bulk = Some(len);
                    Step::Continue
                }
            },
            b'*' => match parse_len(body)? {
                None => Step::Value(RespValue::Array(None)),
                Some(0) => Step::Value(RespValue::Array(Some(Vec::new()))),
                Some(len) => {
                    self.stack.push(PartialArray {
                        remaining: len,
                        items: Vec::with_capacity(len.min(MAX_PREALLOCATED_ITEMS)),
                    });
                    Step::Continue
                }
            },
            other => {
                return Err(DecodeError::new(format!(
                    "unknown type marker: 0x{:02x}",
                    other
                )));
            }
        };
        Ok(Some(step))
    }

    /// Attaches a finished value to the innermost open array, closing arrays
    /// as they fill up. Returns the value once it is at top level.
    fn push_value(&mut self, mut value: RespValue) -> Option<RespValue> {
        loop {
            let top = match self.stack.last_mut() {
                Some(top) => top,
                None => return Some(value),
            };
            top.items.push(value);
            top.remaining -= 1;
            if top.remaining > 0 {
                return None;
            }
            let done = self.stack.pop()?;
            value = RespValue::Array(Some(done.items));
        }
    }

    /// Searches for the next CRLF sequence, resuming where the last
    /// unsuccessful search stopped.
    fn find_crlf(&mut self) -> Option<usize> {
        let start = self.scanned.saturating_sub(1);
        let found = self.buf[start..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|pos| start + pos);
        if found.is_none() {
            self.scanned = self.buf.len();
        }
        found
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

enum Step {
    Value(RespValue),
    Continue,
}

fn utf8(body: &[u8]) -> Result<String, DecodeError> {
    String::from_utf8(body.to_vec()).map_err(|_| DecodeError::new("line is not valid UTF-8"))
}

fn parse_int(body: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            DecodeError::new(format!(
                "invalid integer: {:?}",
                String::from_utf8_lossy(body)
            ))
        })
}

/// Parses a length prefix; `-1` is nil, any other negative is malformed.
fn parse_len(body: &[u8]) -> Result<Option<usize>, DecodeError> {
    match parse_int(body)? {
        -1 => Ok(None),
        n if n < 0 => Err(DecodeError::new(format!("invalid length: {}", n))),
        n => usize::try_from(n)
            .map(Some)
            .map_err(|_| DecodeError::new(format!("length out of range: {}", n))),
    }
}
