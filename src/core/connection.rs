//! A single RESP connection over any async byte stream.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, error, trace};

use crate::core::command::Cmd;
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::value::RespValue;
use crate::{Error, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;
/// Decoded replies buffered per connection unless configured otherwise.
pub(crate) const DEFAULT_QUEUE_SIZE: usize = 1024;

/// A byte stream a [`Connection`] can run over (TCP, Unix socket, TLS, ...).
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct WriteState {
    stream: BoxedWriter,
    encoder: Encoder,
}

struct Shared {
    closed: AtomicBool,
    writer: Mutex<Option<WriteState>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the connection closed. Returns false if it already was.
    fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

/// A duplex RESP connection over one transport stream.
///
/// A single background task owns the read half: it pulls bytes off the
/// stream, feeds the [`Decoder`], and publishes every complete value to an
/// ordered queue that [`read`](Connection::read) drains. Writes are encoded
/// and sent under a lock, so concurrent writers never interleave frames.
///
/// The connection is Open until [`close`](Connection::close) is called, the
/// peer ends the stream, or a transport/decode error occurs; it never
/// reopens.
///
/// # Example
///
/// ```ignore
/// use plexis::core::command;
/// use plexis::core::connection::Connection;
/// use tokio::net::TcpStream;
///
/// let stream = TcpStream::connect("127.0.0.1:6379").await?;
/// let conn = Connection::new(stream);
/// conn.write(&command::ping()).await?;
/// let reply = conn.read().await?;
/// ```
pub struct Connection {
    shared: Arc<Shared>,
    replies: Mutex<mpsc::Receiver<Result<RespValue>>>,
    reader: AbortHandle,
    refs: watch::Sender<usize>,
}

impl Connection {
    /// Wraps a stream and starts its reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S: Transport>(stream: S) -> Self {
        Self::with_queue_size(stream, DEFAULT_QUEUE_SIZE)
    }

    /// Wraps a stream with a custom capacity for the decoded-value queue.
    ///
    /// When the queue is full the reader task stops pulling bytes off the
    /// socket until the consumer catches up.
    pub fn with_queue_size<S: Transport>(stream: S, queue_size: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            writer: Mutex::new(Some(WriteState {
                stream: Box::new(write_half),
                encoder: Encoder::new(),
            })),
        });

        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let task = tokio::spawn(run_reader(read_half, tx, shared.clone()));
        let (refs, _) = watch::channel(0);

        Self {
            shared,
            replies: Mutex::new(rx),
            reader: task.abort_handle(),
            refs,
        }
    }

    /// Encodes and sends one command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection is closed, or
    /// [`Error::Io`] if the write fails (which also closes the connection).
    pub async fn write(&self, cmd: &Cmd) -> Result<()> {
        self.write_pipeline(std::slice::from_ref(cmd)).await
    }

    /// Encodes several commands and sends them in a single write.
    ///
    /// No other writer can interleave between them.
    pub async fn write_pipeline(&self, cmds: &[Cmd]) -> Result<()> {
        let mut guard = self.shared.writer.lock().await;
        if self.shared.is_closed() {
            guard.take();
            return Err(Error::ConnectionClosed);
        }
        let state = guard.as_mut().ok_or(Error::ConnectionClosed)?;

        for cmd in cmds {
            trace!(command = %String::from_utf8_lossy(cmd.name()), "encoding command");
            state.encoder.encode_command(cmd.args());
        }
        let data = state.encoder.take();

        let result = match state.stream.write_all(&data).await {
            Ok(()) => state.stream.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            error!(error = %e, "failed to write to connection");
            self.shared.mark_closed();
            guard.take();
            return Err(Error::Io { source: e });
        }

        // close() may have run while the write was in flight
        if self.shared.is_closed() {
            guard.take();
        }
        Ok(())
    }

    /// Returns the next decoded value in arrival order.
    ///
    /// Returns `Ok(None)` once the stream has ended cleanly or the connection
    /// was closed. A transport or decode failure is returned exactly once;
    /// after that the stream reads as ended.
    pub async fn read(&self) -> Result<Option<RespValue>> {
        let mut replies = self.replies.lock().await;
        match replies.recv().await {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Closes the transport and stops the reader task. Idempotent.
    pub fn close(&self) {
        if !self.shared.mark_closed() {
            return;
        }
        debug!("closing connection");
        self.reader.abort();
        // A writer holding the lock drops the stream itself once it sees the flag.
        if let Ok(mut guard) = self.shared.writer.try_lock() {
            guard.take();
        }
    }

    /// Returns true once the connection has been closed locally or remotely.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Registers interest in keeping this connection alive.
    pub fn reference(&self) {
        self.refs.send_modify(|n| *n += 1);
    }

    /// Drops one unit of interest registered with [`reference`](Connection::reference).
    pub fn unreference(&self) {
        self.refs.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Current liveness reference count.
    pub fn references(&self) -> usize {
        *self.refs.borrow()
    }

    /// Resolves once nobody holds a liveness reference, i.e. the connection
    /// may be released without cutting off a consumer.
    pub async fn released(&self) {
        let mut rx = self.refs.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("references", &self.references())
            .finish()
    }
}

async fn run_reader<R>(mut reader: R, tx: mpsc::Sender<Result<RespValue>>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let result = pump(&mut reader, &tx).await;
    shared.mark_closed();

    match result {
        Ok(()) => debug!("connection ended by peer"),
        Err(e) => {
            error!(error = %e, "connection reader failed");
            let _ = tx.send(Err(e)).await;
        }
    }

    shared.writer.lock().await.take();
}

/// Moves decoded values from the stream to the queue until the stream ends,
/// the consumer goes away, or something breaks.
async fn pump<R>(reader: &mut R, tx: &mpsc::Sender<Result<RespValue>>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Decoder::new();
    loop {
        let buf = decoder.buffer_mut();
        buf.reserve(READ_CHUNK_SIZE);
        let n = reader.read_buf(buf).await?;
        if n == 0 {
            decoder.finish()?;
            return Ok(());
        }
        trace!(bytes = n, "read from connection");

        while let Some(value) = decoder.decode()? {
            if tx.send(Ok(value)).await.is_err() {
                return Ok(());
            }
        }
    }
}
