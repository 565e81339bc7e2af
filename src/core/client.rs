use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use sha1::{Digest, Sha1};
use tracing::{debug, instrument};

use crate::core::command::{self, Cmd};
use crate::core::config::ConnectionConfig;
use crate::core::connector::{Connector, SocketConnector};
use crate::core::executor::QueryExecutor;
use crate::core::transform;
use crate::proto::value::RespValue;
use crate::{Error, Result};

/// A Redis client over one pipelined connection.
///
/// Cheap wrappers around [`QueryExecutor::execute`] for common commands.
/// Anything not covered here goes through [`Client::query`] with a
/// hand-built [`Cmd`].
///
/// # Example
///
/// ```ignore
/// use plexis::{Client, ConnectionConfig};
///
/// let client = Client::new(ConnectionConfig::tcp("127.0.0.1", 6379));
/// client.set("greeting", "hello").await?;
/// assert_eq!(client.get("greeting").await?.as_deref(), Some(&b"hello"[..]));
/// ```
pub struct Client {
    executor: QueryExecutor,
}

impl Client {
    /// Creates a client that connects with the given configuration on
    /// first use.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(Arc::new(SocketConnector::new(config)))
    }

    /// Creates a client over a custom [`Connector`].
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            executor: QueryExecutor::new(connector),
        }
    }

    /// The executor backing this client.
    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Sends an arbitrary command and returns the raw reply.
    pub async fn query(&self, cmd: Cmd) -> Result<RespValue> {
        self.executor.query(cmd).await
    }

    /// PING; returns the status text, normally `PONG`.
    pub async fn ping(&self) -> Result<String> {
        self.executor.execute(command::ping(), transform::to_string).await
    }

    /// ECHO; returns the message back.
    pub async fn echo(&self, message: impl Into<Bytes>) -> Result<Bytes> {
        self.executor
            .execute(command::echo(message), |v| {
                transform::to_bytes(v).map(Option::unwrap_or_default)
            })
            .await
    }

    /// Gets the value of a key, `None` if the key does not exist.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.executor.execute(command::get(key), transform::to_bytes).await
    }

    /// Sets a key to a value.
    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.executor
            .execute(command::set(key, value), |_| Ok(()))
            .await
    }

    /// Deletes keys; returns how many existed.
    pub async fn del<I, K>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.executor.execute(command::del(keys), transform::to_int).await
    }

    /// Returns true if the key exists.
    pub async fn exists(&self, key: impl Into<Bytes>) -> Result<bool> {
        self.executor.execute(command::exists(key), transform::to_bool).await
    }

    /// Increments an integer key by one; returns the new value.
    pub async fn incr(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.executor.execute(command::incr(key), transform::to_int).await
    }

    /// Increments an integer key by `amount`.
    pub async fn incr_by(&self, key: impl Into<Bytes>, amount: i64) -> Result<i64> {
        self.executor
            .execute(command::incr_by(key, amount), transform::to_int)
            .await
    }

    /// Publishes a message; returns the number of subscribers that got it.
    pub async fn publish(
        &self,
        channel: impl Into<Bytes>,
        message: impl Into<Bytes>,
    ) -> Result<i64> {
        self.executor
            .execute(command::publish(channel, message), transform::to_int)
            .await
    }

    /// Runs a Lua script.
    ///
    /// The script is first run by its SHA-1 digest with `EVALSHA`. If the
    /// server does not know the digest yet (`NOSCRIPT`, e.g. first use, a
    /// restart or `SCRIPT FLUSH`), the full script is sent once with `EVAL`,
    /// which also caches it on the server.
    #[instrument(skip(self, script, keys, args), level = "debug")]
    pub async fn eval(&self, script: &str, keys: &[Bytes], args: &[Bytes]) -> Result<RespValue> {
        let digest = script_digest(script);

        match self
            .executor
            .query(command::evalsha(digest, keys, args))
            .await
        {
            Err(e) if e.kind() == Some("NOSCRIPT") => {
                debug!("script missing on server, falling back to EVAL");
                self.executor
                    .query(command::eval(script.to_string(), keys, args))
                    .await
            }
            other => other,
        }
    }

    /// Drops every script from the server cache.
    pub async fn script_flush(&self) -> Result<()> {
        self.executor
            .execute(command::script_flush(), |_| Ok(()))
            .await
    }

    /// Iterates the keyspace with `SCAN`.
    ///
    /// Keys are yielded page by page until the server returns cursor `0`.
    /// An error ends the stream after it is yielded. The usual `SCAN`
    /// guarantees apply: a key may be returned more than once.
    pub fn scan(
        &self,
        pattern: Option<&str>,
        count: Option<u64>,
    ) -> impl Stream<Item = Result<Bytes>> + '_ {
        let pattern = pattern.map(str::to_string);

        stream::unfold(Some(0u64), move |cursor| {
            let pattern = pattern.clone();
            async move {
                let cursor = cursor?;
                let page = self
                    .executor
                    .execute(
                        command::scan(cursor, pattern.as_deref(), count),
                        transform::to_scan,
                    )
                    .await;
                match page {
                    Ok((0, keys)) => Some((Ok(keys), None)),
                    Ok((next, keys)) => Some((Ok(keys), Some(next))),
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
        .map_ok(|keys| stream::iter(keys.into_iter().map(Ok::<Bytes, Error>)))
        .try_flatten()
        .boxed()
    }
}

/// Lowercase hex SHA-1 of a script, the name Redis caches it under.
pub fn script_digest(script: &str) -> String {
    Sha1::digest(script.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}
