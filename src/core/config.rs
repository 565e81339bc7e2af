use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::connection::DEFAULT_QUEUE_SIZE;
use crate::{Error, Result};

const DEFAULT_PORT: u16 = 6379;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a Redis server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// TCP host and port.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Parameters for opening a ready-to-use [`Connection`](crate::core::connection::Connection).
///
/// Built with [`ConnectionConfig::builder`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    address: Address,
    username: Option<String>,
    password: Option<String>,
    database: u32,
    client_name: Option<String>,
    connect_timeout: Duration,
    queue_size: usize,
}

impl ConnectionConfig {
    /// Returns a builder with no address set.
    #[inline]
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Shorthand for a TCP config with every other setting at its default.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            address: Address::Tcp {
                host: host.into(),
                port,
            },
            username: None,
            password: None,
            database: 0,
            client_name: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }

    /// Server address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// ACL username, sent with the password when set.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Password for AUTH.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Logical database index; `0` means no SELECT is sent.
    pub fn database(&self) -> u32 {
        self.database
    }

    /// Name registered with CLIENT SETNAME.
    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    /// Upper bound for opening the transport.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Capacity of the decoded-reply queue between a connection's reader
    /// task and its consumer.
    pub fn queue_size(&self) -> usize {
        self.queue_size
    }
}

/// Builder for [`ConnectionConfig`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use plexis::core::config::ConnectionConfig;
///
/// let config = ConnectionConfig::builder()
///     .host("localhost")
///     .port(6379)
///     .password("secret")
///     .database(2)
///     .connect_timeout(Duration::from_secs(1))
///     .build()
///     .unwrap();
/// assert_eq!(config.database(), 2);
/// ```
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    socket_path: Option<PathBuf>,
    username: Option<String>,
    password: Option<String>,
    database: Option<u32>,
    client_name: Option<String>,
    connect_timeout: Option<Duration>,
    queue_size: Option<usize>,
}

impl ConnectionConfigBuilder {
    /// Sets the TCP host.
    #[inline]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the TCP port (default 6379).
    #[inline]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Connects over a Unix domain socket instead of TCP.
    #[inline]
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// Sets the username for ACL authentication.
    #[inline]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password for authentication.
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the database to select after connecting.
    #[inline]
    pub fn database(mut self, database: u32) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the client connection name.
    #[inline]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Sets the connection timeout.
    #[inline]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the capacity of the decoded-reply queue (default: 1024).
    #[inline]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size);
        self
    }

    /// Builds the [`ConnectionConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if neither a host nor a socket path
    /// is set, if both are set, if a username is given without a password,
    /// or if the queue size is zero.
    pub fn build(self) -> Result<ConnectionConfig> {
        let address = match (self.host, self.socket_path) {
            (Some(host), None) => Address::Tcp {
                host,
                port: self.port.unwrap_or(DEFAULT_PORT),
            },
            (None, Some(path)) => Address::Unix(path),
            (None, None) => {
                return Err(Error::InvalidArgument {
                    message: "address is required".to_string(),
                })
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidArgument {
                    message: "host and socket path are mutually exclusive".to_string(),
                })
            }
        };

        if self.username.is_some() && self.password.is_none() {
            return Err(Error::InvalidArgument {
                message: "username requires a password".to_string(),
            });
        }

        let queue_size = self.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE);
        if queue_size == 0 {
            return Err(Error::InvalidArgument {
                message: "queue size must be greater than zero".to_string(),
            });
        }

        Ok(ConnectionConfig {
            address,
            username: self.username,
            password: self.password,
            database: self.database.unwrap_or(0),
            client_name: self.client_name,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            queue_size,
        })
    }
}
