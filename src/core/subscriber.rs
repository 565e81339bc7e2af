//! Pub/sub over one shared connection.
//!
//! A [`Subscriber`] owns a dedicated connection that only ever carries
//! SUBSCRIBE-family commands. Any number of [`Subscription`]s share it:
//! the wire command for a channel or pattern is sent when its first
//! listener arrives and withdrawn when its last listener leaves. A lost
//! connection is replaced automatically and every registered key is
//! subscribed again before delivery resumes.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, error, instrument, trace, warn};

use crate::core::command::{self, Cmd};
use crate::core::config::ConnectionConfig;
use crate::core::connection::Connection;
use crate::core::connector::{Connector, SocketConnector};
use crate::proto::value::RespValue;
use crate::{Error, Result};

const DEFAULT_LISTENER_CAPACITY: usize = 32;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Tuning for a [`Subscriber`].
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    listener_capacity: usize,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl SubscriberConfig {
    /// Messages buffered per listener before dispatch waits on it
    /// (default: 32, minimum 1).
    pub fn listener_capacity(mut self, capacity: usize) -> Self {
        self.listener_capacity = capacity.max(1);
        self
    }

    /// Extra connection attempts after a failed one before the subscriber
    /// gives up for good (default: 3).
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Pause between connection attempts (default: 100ms).
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            listener_capacity: DEFAULT_LISTENER_CAPACITY,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published to.
    pub channel: Bytes,
    /// Message body.
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Channel,
    Pattern,
}

impl Kind {
    fn subscribe(self, key: Bytes) -> Cmd {
        match self {
            Kind::Channel => command::subscribe(key),
            Kind::Pattern => command::psubscribe(key),
        }
    }

    fn unsubscribe(self, key: Bytes) -> Cmd {
        match self {
            Kind::Channel => command::unsubscribe(key),
            Kind::Pattern => command::punsubscribe(key),
        }
    }
}

type Listener = mpsc::Sender<Result<Message>>;
type Registry = HashMap<Bytes, HashMap<u64, Listener>>;

enum Status {
    Idle,
    Running,
    Failed(Arc<Error>),
    Closed,
}

struct State {
    status: Status,
    connection: Option<Arc<Connection>>,
    channels: Registry,
    patterns: Registry,
    run_loop: Option<AbortHandle>,
}

impl State {
    fn registry(&mut self, kind: Kind) -> &mut Registry {
        match kind {
            Kind::Channel => &mut self.channels,
            Kind::Pattern => &mut self.patterns,
        }
    }

    fn resubscribe_commands(&self) -> Vec<Cmd> {
        let channels = self.channels.keys().map(|k| Kind::Channel.subscribe(k.clone()));
        let patterns = self.patterns.keys().map(|k| Kind::Pattern.subscribe(k.clone()));
        channels.chain(patterns).collect()
    }

    fn take_listeners(&mut self) -> Vec<Listener> {
        let channels = std::mem::take(&mut self.channels);
        let patterns = std::mem::take(&mut self.patterns);
        channels
            .into_values()
            .chain(patterns.into_values())
            .flat_map(HashMap::into_values)
            .collect()
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: SubscriberConfig,
    state: Mutex<State>,
    next_id: AtomicU64,
}

/// Multiplexes pub/sub listeners onto one connection.
///
/// The connection is opened lazily by the first subscription. If it drops,
/// the subscriber reconnects and subscribes every registered channel and
/// pattern again; messages published during the outage are lost. If no
/// connection can be opened after the configured retries, the subscriber
/// fails permanently: every listener receives [`Error::Subscription`] and
/// later subscriptions are refused.
///
/// Delivery applies backpressure. Each message is handed to every matching
/// listener before the next frame is read, so one slow listener holds up
/// all others on this subscriber.
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
/// use plexis::{ConnectionConfig, Subscriber};
///
/// let subscriber = Subscriber::new(ConnectionConfig::tcp("127.0.0.1", 6379));
/// let mut news = subscriber.subscribe("news").await?;
/// while let Some(payload) = news.next().await {
///     println!("{:?}", payload?);
/// }
/// ```
pub struct Subscriber {
    inner: Arc<Inner>,
}

impl Subscriber {
    /// Creates a subscriber with default tuning. Nothing connects until
    /// the first subscription.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(
            Arc::new(SocketConnector::new(config)),
            SubscriberConfig::default(),
        )
    }

    /// Creates a subscriber over a custom [`Connector`].
    pub fn with_connector(connector: Arc<dyn Connector>, config: SubscriberConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state: Mutex::new(State {
                    status: Status::Idle,
                    connection: None,
                    channels: HashMap::new(),
                    patterns: HashMap::new(),
                    run_loop: None,
                }),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Listens on one channel. Yields message payloads.
    ///
    /// # Errors
    ///
    /// [`Error::Subscription`] if the subscriber has failed, or
    /// [`Error::ConnectionClosed`] after [`close`](Subscriber::close).
    pub async fn subscribe(&self, channel: impl Into<Bytes>) -> Result<Subscription<Bytes>> {
        let (handle, rx) = self.inner.listen(Kind::Channel, channel.into()).await?;
        Ok(Subscription::new(rx, |m| m.payload, handle))
    }

    /// Listens on every channel matching a glob-style pattern. Yields the
    /// concrete channel alongside each payload.
    pub async fn subscribe_to_pattern(
        &self,
        pattern: impl Into<Bytes>,
    ) -> Result<Subscription<Message>> {
        let (handle, rx) = self.inner.listen(Kind::Pattern, pattern.into()).await?;
        Ok(Subscription::new(rx, |m| m, handle))
    }

    /// Stops the subscriber: closes the connection and ends every
    /// subscription stream. Idempotent.
    pub async fn close(&self) {
        self.inner.shutdown().await;
    }

    /// Returns true once the subscriber has failed permanently.
    pub async fn is_failed(&self) -> bool {
        matches!(self.inner.state.lock().await.status, Status::Failed(_))
    }

    /// Liveness references held on the current connection: one per
    /// subscribed channel or pattern. Zero when disconnected.
    pub async fn references(&self) -> usize {
        self.inner
            .state
            .lock()
            .await
            .connection
            .as_ref()
            .map_or(0, |c| c.references())
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let inner = self.inner.clone();
            runtime.spawn(async move { inner.shutdown().await });
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Inner {
    #[instrument(skip(self, key), fields(key = %String::from_utf8_lossy(&key)), level = "debug")]
    async fn listen(
        self: &Arc<Self>,
        kind: Kind,
        key: Bytes,
    ) -> Result<(ListenerHandle, mpsc::Receiver<Result<Message>>)> {
        let mut state = self.state.lock().await;
        if let Status::Failed(e) = &state.status {
            return Err(Error::Subscription { source: e.clone() });
        }
        if matches!(state.status, Status::Closed) {
            return Err(Error::ConnectionClosed);
        }
        if matches!(state.status, Status::Idle) {
            debug!("starting subscriber run loop");
            state.status = Status::Running;
            let task = tokio::spawn(run(self.clone()));
            state.run_loop = Some(task.abort_handle());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.listener_capacity);

        let listeners = state.registry(kind).entry(key.clone()).or_default();
        let first = listeners.is_empty();
        listeners.insert(id, tx);

        if first {
            if let Some(connection) = state.connection.clone() {
                connection.reference();
                // A dead connection is replaced by the run loop, which
                // subscribes every registered key again.
                if let Err(e) = connection.write(&kind.subscribe(key.clone())).await {
                    debug!(error = %e, "subscribe deferred until reconnect");
                }
            }
        }

        let handle = ListenerHandle {
            inner: self.clone(),
            kind,
            key,
            id,
        };
        Ok((handle, rx))
    }

    async fn unlisten(&self, kind: Kind, key: &Bytes, id: u64) {
        let mut state = self.state.lock().await;
        let registry = state.registry(kind);

        let Some(listeners) = registry.get_mut(key) else {
            return;
        };
        if listeners.remove(&id).is_none() || !listeners.is_empty() {
            return;
        }
        registry.remove(key);

        if let Some(connection) = state.connection.clone() {
            connection.unreference();
            // A broken connection has dropped the subscription already.
            if let Err(e) = connection.write(&kind.unsubscribe(key.clone())).await {
                debug!(error = %e, "unsubscribe not sent");
            }
        }
    }

    /// Opens a connection, retrying up to the configured number of times.
    async fn acquire(&self) -> Result<Connection> {
        let mut failures = 0;
        loop {
            match self.connector.connect().await {
                Ok(connection) => return Ok(connection),
                Err(e) if failures < self.config.reconnect_attempts => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "subscriber connect failed, retrying");
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Installs a fresh connection and subscribes every registered key on
    /// it. Returns false if the subscriber stopped in the meantime.
    async fn install(&self, connection: &Arc<Connection>) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !matches!(state.status, Status::Running) {
            return Ok(false);
        }

        let cmds = state.resubscribe_commands();
        for _ in &cmds {
            connection.reference();
        }
        if !cmds.is_empty() {
            debug!(keys = cmds.len(), "resubscribing");
            connection.write_pipeline(&cmds).await?;
        }

        state.connection = Some(connection.clone());
        Ok(true)
    }

    async fn dispatch(&self, frame: RespValue) {
        let Some((kind, key, message)) = parse_delivery(frame) else {
            return;
        };

        let listeners: Vec<Listener> = {
            let mut state = self.state.lock().await;
            state
                .registry(kind)
                .get(&key)
                .map(|l| l.values().cloned().collect())
                .unwrap_or_default()
        };

        trace!(listeners = listeners.len(), "dispatching message");
        join_all(listeners.iter().map(|tx| tx.send(Ok(message.clone())))).await;
    }

    async fn fail(&self, error: Error) {
        error!(error = %error, "subscriber failed");
        let error = Arc::new(error);

        let listeners = {
            let mut state = self.state.lock().await;
            if !matches!(state.status, Status::Running) {
                return;
            }
            state.status = Status::Failed(error.clone());
            state.connection = None;
            state.run_loop = None;
            state.take_listeners()
        };

        for tx in listeners {
            let item = Err(Error::Subscription {
                source: error.clone(),
            });
            if let Err(mpsc::error::TrySendError::Full(item)) = tx.try_send(item) {
                tokio::spawn(async move {
                    let _ = tx.send(item).await;
                });
            }
        }
    }

    async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if matches!(state.status, Status::Closed) {
            return;
        }
        debug!("closing subscriber");
        state.status = Status::Closed;
        if let Some(run_loop) = state.run_loop.take() {
            run_loop.abort();
        }
        if let Some(connection) = state.connection.take() {
            connection.close();
        }
        state.take_listeners();
    }
}

async fn run(inner: Arc<Inner>) {
    let mut reconnecting = false;
    loop {
        if reconnecting {
            tokio::time::sleep(inner.config.reconnect_delay).await;
        }
        reconnecting = true;

        let connection = match inner.acquire().await {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                inner.fail(e).await;
                return;
            }
        };

        match inner.install(&connection).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(error = %e, "resubscribe failed, reconnecting");
                continue;
            }
        }

        loop {
            match connection.read().await {
                Ok(Some(frame)) => inner.dispatch(frame).await,
                Ok(None) => {
                    warn!("subscription connection ended, reconnecting");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "subscription connection failed, reconnecting");
                    break;
                }
            }
        }

        let mut state = inner.state.lock().await;
        if state
            .connection
            .as_ref()
            .map_or(false, |c| Arc::ptr_eq(c, &connection))
        {
            state.connection = None;
        }
        connection.close();
    }
}

/// Extracts the listener key and message from a `message` or `pmessage`
/// frame. Subscribe confirmations and anything else yield `None`.
fn parse_delivery(frame: RespValue) -> Option<(Kind, Bytes, Message)> {
    let RespValue::Array(Some(items)) = frame else {
        return None;
    };

    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RespValue::BulkString(Some(b)) => parts.push(b),
            _ => return None,
        }
    }

    let tag = parts.first().cloned();
    match (tag.as_deref(), parts.len()) {
        (Some(b"message"), 3) => {
            let payload = parts.pop()?;
            let channel = parts.pop()?;
            Some((Kind::Channel, channel.clone(), Message { channel, payload }))
        }
        (Some(b"pmessage"), 4) => {
            let payload = parts.pop()?;
            let channel = parts.pop()?;
            let pattern = parts.pop()?;
            Some((Kind::Pattern, pattern, Message { channel, payload }))
        }
        _ => None,
    }
}

/// Removes one listener when its subscription ends.
struct ListenerHandle {
    inner: Arc<Inner>,
    kind: Kind,
    key: Bytes,
    id: u64,
}

/// A stream of messages for one channel or pattern.
///
/// Ends after [`unsubscribe`](Subscription::unsubscribe), after
/// [`Subscriber::close`], or with an [`Error::Subscription`] item if the
/// subscriber fails. Dropping it unsubscribes in the background.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Result<Message>>,
    project: fn(Message) -> T,
    handle: Option<ListenerHandle>,
}

impl<T> Subscription<T> {
    fn new(
        rx: mpsc::Receiver<Result<Message>>,
        project: fn(Message) -> T,
        handle: ListenerHandle,
    ) -> Self {
        Self {
            rx,
            project,
            handle: Some(handle),
        }
    }

    /// Receives the next item, `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        let project = self.project;
        self.rx.recv().await.map(|r| r.map(project))
    }

    /// Stops listening. Messages already buffered can still be read.
    /// Calling it again does nothing.
    pub async fn unsubscribe(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.rx.close();
            handle
                .inner
                .unlisten(handle.kind, &handle.key, handle.id)
                .await;
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let project = this.project;
        this.rx.poll_recv(cx).map(|item| item.map(|r| r.map(project)))
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                handle
                    .inner
                    .unlisten(handle.kind, &handle.key, handle.id)
                    .await;
            });
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self
            .handle
            .as_ref()
            .map(|h| String::from_utf8_lossy(&h.key).into_owned());
        f.debug_struct("Subscription")
            .field("key", &key)
            .field("active", &self.handle.is_some())
            .finish()
    }
}
