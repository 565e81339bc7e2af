//! Opening ready-to-use connections: transport and handshake under one
//! connect timeout.

use std::fmt;

use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};

use crate::core::command::{self, Cmd};
use crate::core::config::{Address, ConnectionConfig};
use crate::core::connection::Connection;
use crate::{Error, Result};

/// Produces ready, authenticated [`Connection`]s.
///
/// [`QueryExecutor`](crate::core::executor::QueryExecutor) and
/// [`Subscriber`](crate::core::subscriber::Subscriber) call this every time
/// they need a fresh connection.
pub trait Connector: Send + Sync + 'static {
    /// Opens a connection and runs the handshake.
    fn connect(&self) -> BoxFuture<'_, Result<Connection>>;
}

/// Connects over TCP or a Unix socket using a [`ConnectionConfig`].
#[derive(Clone)]
pub struct SocketConnector {
    config: ConnectionConfig,
}

impl SocketConnector {
    /// Creates a connector for the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration this connector uses.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[instrument(skip(self), fields(address = %self.config.address()), level = "debug")]
    async fn connect_inner(&self) -> Result<Connection> {
        let address = self.config.address().to_string();
        let timeout = self.config.connect_timeout();
        // One deadline covers the transport and the handshake.
        let deadline = tokio::time::Instant::now() + timeout;

        let connection = tokio::time::timeout_at(deadline, self.open())
            .await
            .map_err(|_| Error::Connect {
                address: address.clone(),
                message: format!("timed out after {:?}", timeout),
                source: None,
            })?
            .map_err(|e| Error::Connect {
                address: address.clone(),
                message: "transport error".to_string(),
                source: Some(Box::new(e)),
            })?;

        let setup = handshake(&connection, &self.config);
        let failure = match tokio::time::timeout_at(deadline, setup).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(("handshake failed".to_string(), Some(Box::new(e)))),
            Err(_) => Some((format!("handshake timed out after {:?}", timeout), None)),
        };
        if let Some((message, source)) = failure {
            warn!(error = %message, "handshake failed");
            connection.close();
            return Err(Error::Connect {
                address,
                message,
                source,
            });
        }

        debug!("connection established");
        Ok(connection)
    }

    async fn open(&self) -> Result<Connection> {
        let queue_size = self.config.queue_size();
        match self.config.address() {
            Address::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Connection::with_queue_size(stream, queue_size))
            }
            Address::Unix(path) => {
                cfg_if::cfg_if! {
                    if #[cfg(unix)] {
                        let stream = tokio::net::UnixStream::connect(path).await?;
                        Ok(Connection::with_queue_size(stream, queue_size))
                    } else {
                        Err(Error::InvalidArgument {
                            message: format!(
                                "unix sockets are not supported on this platform: {}",
                                path.display()
                            ),
                        })
                    }
                }
            }
        }
    }
}

impl Connector for SocketConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Connection>> {
        Box::pin(self.connect_inner())
    }
}

impl fmt::Debug for SocketConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConnector")
            .field("address", &self.config.address().to_string())
            .field("database", &self.config.database())
            .finish()
    }
}

/// Commands sent right after the transport opens, in order.
pub(crate) fn handshake_commands(config: &ConnectionConfig) -> Vec<Cmd> {
    let mut cmds = Vec::new();

    if let Some(password) = config.password() {
        let cmd = match config.username() {
            Some(username) => command::auth_with_username(username.to_string(), password.to_string()),
            None => command::auth(password.to_string()),
        };
        cmds.push(cmd);
    }

    if config.database() != 0 {
        cmds.push(command::select(config.database()));
    }

    if let Some(name) = config.client_name() {
        cmds.push(command::client_setname(name.to_string()));
    }

    cmds
}

/// Sends every handshake command back to back, then reads exactly one
/// reply per command. Any error, nil, or falsy reply fails the handshake.
async fn handshake(connection: &Connection, config: &ConnectionConfig) -> Result<()> {
    let cmds = handshake_commands(config);
    if cmds.is_empty() {
        return Ok(());
    }

    connection.write_pipeline(&cmds).await?;

    for cmd in &cmds {
        let name = String::from_utf8_lossy(cmd.name()).into_owned();
        let reply = connection
            .read()
            .await?
            .ok_or_else(|| Error::ConnectionLost {
                message: format!("stream ended before {} reply", name),
            })?
            .into_result()?;

        if !reply.is_truthy() {
            return Err(Error::Protocol {
                message: format!("unexpected {} reply to {}", reply.type_name(), name),
            });
        }
    }
    Ok(())
}
