//! Ordered command pipelining.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, instrument, trace};

use crate::core::command::Cmd;
use crate::core::connection::Connection;
use crate::core::connector::Connector;
use crate::proto::value::RespValue;
use crate::{Error, Result};

type Waiter = oneshot::Sender<Result<RespValue>>;

/// A command waiting for the writer task.
struct Request {
    cmd: Cmd,
    response_tx: Waiter,
}

/// The live connection and the channel into its writer task.
struct Pipeline {
    connection: Arc<Connection>,
    requests: mpsc::UnboundedSender<Request>,
}

impl Pipeline {
    fn start(connection: Connection) -> Self {
        let connection = Arc::new(connection);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (waiter_tx, waiter_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(connection.clone(), request_rx, waiter_tx));
        tokio::spawn(run_reader(connection.clone(), waiter_rx));

        Self {
            connection,
            requests: request_tx,
        }
    }

    fn is_usable(&self) -> bool {
        !self.connection.is_closed() && !self.requests.is_closed()
    }
}

/// Pipelines commands over a single connection and hands every caller the
/// reply that belongs to it.
///
/// Commands are written in submission order and replies are matched to
/// callers strictly first-in first-out, never by inspecting the reply. A
/// server error reply fails only its own command. A broken connection fails
/// every command still waiting on it; the next call opens a fresh connection
/// through the [`Connector`].
///
/// Dropping an `execute` future after it was submitted does not disturb the
/// pipeline: its reply is still read and then discarded.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use plexis::core::{command, ConnectionConfig, QueryExecutor, SocketConnector};
///
/// let connector = SocketConnector::new(ConnectionConfig::tcp("127.0.0.1", 6379));
/// let executor = QueryExecutor::new(Arc::new(connector));
/// let pong = executor.execute(command::ping(), plexis::core::transform::to_string).await?;
/// ```
pub struct QueryExecutor {
    connector: Arc<dyn Connector>,
    pipeline: Mutex<Option<Pipeline>>,
}

impl QueryExecutor {
    /// Creates an executor. No connection is opened until the first command.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            pipeline: Mutex::new(None),
        }
    }

    /// Sends a command and converts its reply with `transform`.
    ///
    /// # Arguments
    ///
    /// * `cmd` - The command to send
    /// * `transform` - Applied to the reply unless it is a server error
    ///
    /// # Errors
    ///
    /// * [`Error::Query`] if the server answered with an error reply
    /// * [`Error::Connect`] if a new connection was needed and could not be opened
    /// * a connection error ([`Error::is_connection_error`]) if the connection
    ///   died before the reply arrived
    /// * whatever `transform` returns
    #[instrument(
        skip(self, cmd, transform),
        fields(command = %String::from_utf8_lossy(cmd.name())),
        level = "debug"
    )]
    pub async fn execute<T, F>(&self, cmd: Cmd, transform: F) -> Result<T>
    where
        F: FnOnce(RespValue) -> Result<T>,
    {
        let response_rx = self.submit(cmd).await?;

        let reply = response_rx.await.map_err(|_| Error::ConnectionLost {
            message: "pipeline stopped before the reply arrived".to_string(),
        })??;

        transform(reply.into_result()?)
    }

    /// Sends a command and returns the raw reply value.
    pub async fn query(&self, cmd: Cmd) -> Result<RespValue> {
        self.execute(cmd, Ok).await
    }

    /// Returns true if a connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.pipeline
            .lock()
            .await
            .as_ref()
            .map_or(false, Pipeline::is_usable)
    }

    /// Closes the current connection, if any.
    ///
    /// Commands already waiting fail with a connection error; the next
    /// command reconnects.
    pub async fn close(&self) {
        if let Some(pipeline) = self.pipeline.lock().await.take() {
            debug!("closing executor connection");
            pipeline.connection.close();
        }
    }

    /// Queues the command behind every earlier one, opening a connection
    /// first if there is none.
    async fn submit(&self, cmd: Cmd) -> Result<oneshot::Receiver<Result<RespValue>>> {
        let mut guard = self.pipeline.lock().await;

        let stale = guard.as_ref().map_or(true, |p| !p.is_usable());
        if stale {
            if guard.is_some() {
                debug!("connection lost, reconnecting");
            }
            let connection = self.connector.connect().await?;
            *guard = Some(Pipeline::start(connection));
        }

        let Some(pipeline) = guard.as_ref() else {
            return Err(Error::ConnectionClosed);
        };

        let (response_tx, response_rx) = oneshot::channel();
        pipeline
            .requests
            .send(Request { cmd, response_tx })
            .map_err(|_| Error::ConnectionClosed)?;

        Ok(response_rx)
    }
}

impl fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutor").finish_non_exhaustive()
    }
}

/// Writes requests in arrival order and hands each waiter to the reader
/// only once its command is on the wire.
async fn run_writer(
    connection: Arc<Connection>,
    mut request_rx: mpsc::UnboundedReceiver<Request>,
    waiter_tx: mpsc::UnboundedSender<Waiter>,
) {
    while let Some(req) = request_rx.recv().await {
        trace!(command = %String::from_utf8_lossy(req.cmd.name()), "writing command");
        if let Err(e) = connection.write(&req.cmd).await {
            error!(error = %e, "failed to write command");
            let _ = req.response_tx.send(Err(e));
            continue;
        }

        connection.reference();
        if let Err(mpsc::error::SendError(waiter)) = waiter_tx.send(req.response_tx) {
            connection.unreference();
            let _ = waiter.send(Err(Error::ConnectionLost {
                message: "connection reader stopped".to_string(),
            }));
        }
    }
}

/// Resolves waiters with replies, oldest first. Once the connection breaks,
/// every waiter still queued fails.
async fn run_reader(connection: Arc<Connection>, mut waiter_rx: mpsc::UnboundedReceiver<Waiter>) {
    while let Some(waiter) = waiter_rx.recv().await {
        let message = match connection.read().await {
            Ok(Some(reply)) => {
                connection.unreference();
                // The caller may have given up; the reply is consumed regardless.
                let _ = waiter.send(Ok(reply));
                continue;
            }
            Ok(None) => "connection closed by server".to_string(),
            Err(e) => e.to_string(),
        };

        error!(error = %message, "connection failed with queries pending");
        connection.close();
        waiter_rx.close();

        connection.unreference();
        let _ = waiter.send(Err(Error::ConnectionLost {
            message: message.clone(),
        }));
        while let Some(waiter) = waiter_rx.recv().await {
            connection.unreference();
            let _ = waiter.send(Err(Error::ConnectionLost {
                message: message.clone(),
            }));
        }
        return;
    }

    debug!("executor pipeline stopped");
    connection.close();
}
