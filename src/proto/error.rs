use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for plexis operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a Redis server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying byte stream failed (reset, refused, timed out).
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// The server sent bytes that are not valid RESP.
    #[error("decode error: {source}")]
    Decode {
        /// Underlying decode error.
        #[from]
        source: DecodeError,
    },

    /// The server answered a command with a RESP error reply.
    ///
    /// The connection stays usable; only this command failed.
    #[error("query error: {message}")]
    Query {
        /// Leading error-kind token, e.g. `ERR` or `NOSCRIPT`.
        kind: String,
        /// Full error message as sent by the server.
        message: String,
    },

    /// Opening the transport or running the AUTH/SELECT handshake failed.
    #[error("failed to connect to redis instance ({address}): {message}")]
    Connect {
        /// Address that was being connected to.
        address: String,
        /// What went wrong.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Box<Error>>,
    },

    /// A write was attempted on a connection that is already closed.
    #[error("redis connection already closed")]
    ConnectionClosed,

    /// The connection died while a query was waiting for its reply.
    #[error("connection lost: {message}")]
    ConnectionLost {
        /// Description of the failure that ended the connection.
        message: String,
    },

    /// The subscriber hit an unrecoverable failure and stopped for good.
    #[error("subscriber failed: {source}")]
    Subscription {
        /// The failure that stopped the subscriber.
        source: Arc<Error>,
    },

    /// A reply did not have the shape the caller expected.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },
}

impl Error {
    /// Builds a [`Error::Query`] from a raw RESP error message.
    ///
    /// The kind is everything before the first space; a message without a
    /// space is its own kind.
    pub fn from_server_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = message
            .split(' ')
            .next()
            .unwrap_or_default()
            .to_string();
        Error::Query { kind, message }
    }

    /// Returns the server error kind for [`Error::Query`], `None` otherwise.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Error::Query { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Returns true if this error means the connection itself is gone,
    /// as opposed to a single command being rejected.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io { .. }
                | Error::Decode { .. }
                | Error::Connect { .. }
                | Error::ConnectionClosed
                | Error::ConnectionLost { .. }
        )
    }
}

/// Error returned when the byte stream is not valid RESP.
///
/// Decode errors are always structural: a bad type marker, a bad length
/// prefix, a missing terminator, or a stream that ended mid-frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a new decode error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description of this error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let error = Error::Io { source: io_err };
        assert!(error.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_display_query() {
        let error = Error::from_server_message("ERR wrong type");
        assert_eq!(error.to_string(), "query error: ERR wrong type");
    }

    #[test]
    fn test_query_kind_is_first_token() {
        let error = Error::from_server_message("NOSCRIPT No matching script. Use EVAL.");
        assert_eq!(error.kind(), Some("NOSCRIPT"));

        let error = Error::from_server_message("LOADING");
        assert_eq!(error.kind(), Some("LOADING"));

        let error = Error::from_server_message("");
        assert_eq!(error.kind(), Some(""));
    }

    #[test]
    fn test_error_display_connect() {
        let error = Error::Connect {
            address: "127.0.0.1:6379".to_string(),
            message: "handshake rejected".to_string(),
            source: None,
        };
        assert_eq!(
            error.to_string(),
            "failed to connect to redis instance (127.0.0.1:6379): handshake rejected"
        );
    }

    #[test]
    fn test_error_display_closed() {
        assert_eq!(
            Error::ConnectionClosed.to_string(),
            "redis connection already closed"
        );
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::ConnectionLost {
            message: "reset".to_string()
        }
        .is_connection_error());
        assert!(Error::from(DecodeError::new("bad marker")).is_connection_error());
        assert!(!Error::from_server_message("ERR nope").is_connection_error());
        assert!(!Error::Protocol {
            message: "shape".to_string()
        }
        .is_connection_error());
    }

    #[test]
    fn test_subscription_error_wraps_cause() {
        let cause = Arc::new(Error::ConnectionClosed);
        let error = Error::Subscription { source: cause };
        assert_eq!(
            error.to_string(),
            "subscriber failed: redis connection already closed"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let error: Error = io_err.into();
        assert!(matches!(error, Error::Io { .. }));
    }

    #[test]
    fn test_error_from_decode() {
        let error: Error = DecodeError::new("test").into();
        assert!(matches!(error, Error::Decode { .. }));
    }
}
