//! Host-fed transport adapter.
//!
//! The host pushes inbound chunks with [`TransportAdapter::inject`] and
//! receives outbound bytes through its [`HostChannel`]. The secure-shell
//! engine sees the adapter as an ordinary byte stream through
//! [`TransportStream`].

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::{Buf, Bytes};
use protocol::{Transport, TransportAddr};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::config::DEFAULT_INBOUND_QUEUE_CAPACITY;
use crate::error::InjectError;

/// Network name reported for host-fed transports.
pub const HOST_NETWORK: &str = "js";

/// Local address reported for host-fed transports.
pub const HOST_LOCAL_ADDRESS: &str = "browser";

/// Outbound side of a transport, implemented by the host.
pub trait HostChannel: Send + Sync {
    /// Delivers bytes to the host. Called synchronously from the writer.
    fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Tells the host the transport is closed. Called at most once.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

type WriteCallback = Box<dyn Fn(&[u8]) -> io::Result<()> + Send + Sync>;
type CloseCallback = Box<dyn Fn() -> io::Result<()> + Send + Sync>;

/// Closure-backed [`HostChannel`] with optional callbacks.
///
/// A missing write callback accepts and discards bytes; a missing close
/// callback does nothing.
#[derive(Default)]
pub struct HostCallbacks {
    on_write: Option<WriteCallback>,
    on_close: Option<CloseCallback>,
}

impl HostCallbacks {
    /// Creates a channel with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the write callback.
    pub fn on_write<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[u8]) -> io::Result<()> + Send + Sync + 'static,
    {
        self.on_write = Some(Box::new(callback));
        self
    }

    /// Sets the close callback.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> io::Result<()> + Send + Sync + 'static,
    {
        self.on_close = Some(Box::new(callback));
        self
    }
}

impl HostChannel for HostCallbacks {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        match &self.on_write {
            Some(callback) => callback(data),
            None => Ok(()),
        }
    }

    fn close(&self) -> io::Result<()> {
        match &self.on_close {
            Some(callback) => callback(),
            None => Ok(()),
        }
    }
}

/// Producer-side state. `tx` is dropped on close, which wakes a pending read.
struct Inbound {
    closed: bool,
    tx: Option<mpsc::Sender<Bytes>>,
}

/// Consumer-side state.
struct ReadState {
    rx: mpsc::Receiver<Bytes>,
    /// Unread tail of the last delivered chunk.
    leftover: Bytes,
}

/// Bridges host-pushed chunks into a byte stream.
pub struct TransportAdapter {
    id: String,
    host: Box<dyn HostChannel>,
    inbound: Mutex<Inbound>,
    reader: Mutex<ReadState>,
    capacity: usize,
}

impl TransportAdapter {
    /// Creates an adapter with the default inbound capacity.
    pub fn new(id: impl Into<String>, host: impl HostChannel + 'static) -> Arc<Self> {
        Self::with_capacity(id, host, DEFAULT_INBOUND_QUEUE_CAPACITY)
    }

    /// Creates an adapter holding at most `capacity` pending chunks.
    ///
    /// A zero capacity is raised to one.
    pub fn with_capacity(
        id: impl Into<String>,
        host: impl HostChannel + 'static,
        capacity: usize,
    ) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        Arc::new(Self {
            id: id.into(),
            host: Box::new(host),
            inbound: Mutex::new(Inbound {
                closed: false,
                tx: Some(tx),
            }),
            reader: Mutex::new(ReadState {
                rx,
                leftover: Bytes::new(),
            }),
            capacity,
        })
    }

    /// Returns the transport ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns whether the transport has been closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.inbound).closed
    }

    /// Returns the number of injected chunks not yet picked up by a read.
    pub fn pending_chunks(&self) -> usize {
        match &lock(&self.inbound).tx {
            Some(tx) => self.capacity - tx.capacity(),
            None => 0,
        }
    }

    /// Queues a chunk received from the host.
    ///
    /// Never waits: fails with [`InjectError::Closed`] after close and with
    /// [`InjectError::Full`] when the inbound queue is at capacity.
    pub fn inject(&self, chunk: impl Into<Bytes>) -> Result<(), InjectError> {
        let inbound = lock(&self.inbound);
        if inbound.closed {
            return Err(InjectError::Closed);
        }
        let tx = inbound.tx.as_ref().ok_or(InjectError::Closed)?;

        tx.try_send(chunk.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => InjectError::Full,
            mpsc::error::TrySendError::Closed(_) => InjectError::Closed,
        })
    }

    /// Closes the transport.
    ///
    /// The first call releases any pending read and invokes the host's close
    /// callback; later calls return `Ok` without doing anything.
    pub fn close(&self) -> io::Result<()> {
        {
            let mut inbound = lock(&self.inbound);
            if inbound.closed {
                return Ok(());
            }
            inbound.closed = true;
            inbound.tx = None;
        }

        tracing::debug!(transport_id = %self.id, "Transport closed");
        self.host.close()
    }

    /// Returns a stream view of this adapter.
    pub fn stream(self: &Arc<Self>) -> TransportStream {
        TransportStream {
            adapter: Arc::clone(self),
        }
    }

    /// Returns the host-side local address.
    pub fn local_addr(&self) -> TransportAddr {
        TransportAddr::new(HOST_NETWORK, HOST_LOCAL_ADDRESS)
    }

    /// Returns the remote address, which is the transport ID.
    pub fn remote_addr(&self) -> TransportAddr {
        TransportAddr::new(HOST_NETWORK, self.id.clone())
    }

    fn poll_read_chunk(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 || self.is_closed() {
            return Poll::Ready(Ok(()));
        }

        let mut reader = lock(&self.reader);
        if !reader.leftover.is_empty() {
            copy_into(&mut reader.leftover, buf);
            return Poll::Ready(Ok(()));
        }

        loop {
            match reader.rx.poll_recv(cx) {
                // An empty read would signal end of stream
                Poll::Ready(Some(chunk)) if chunk.is_empty() => continue,
                Poll::Ready(Some(mut chunk)) => {
                    copy_into(&mut chunk, buf);
                    reader.leftover = chunk;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn write_through(&self, data: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"));
        }
        self.host.write(data)?;
        Ok(data.len())
    }
}

impl std::fmt::Debug for TransportAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportAdapter")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Moves as much of `src` as fits into `buf`, leaving the rest in `src`.
fn copy_into(src: &mut Bytes, buf: &mut ReadBuf<'_>) {
    let n = src.len().min(buf.remaining());
    buf.put_slice(&src[..n]);
    src.advance(n);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stream view of a [`TransportAdapter`].
///
/// Reads wait for injected chunks and return end of stream once the adapter
/// is closed. Writes go straight to the host. Shutdown closes the adapter.
#[derive(Debug, Clone)]
pub struct TransportStream {
    adapter: Arc<TransportAdapter>,
}

impl TransportStream {
    /// Returns the underlying adapter.
    pub fn adapter(&self) -> &Arc<TransportAdapter> {
        &self.adapter
    }
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.adapter.poll_read_chunk(cx, buf)
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(self.adapter.write_through(buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.adapter.close())
    }
}

impl Transport for TransportStream {
    fn local_addr(&self) -> TransportAddr {
        self.adapter.local_addr()
    }

    fn remote_addr(&self) -> TransportAddr {
        self.adapter.remote_addr()
    }

    // Deadlines are not enforced at this layer.
    fn set_deadline(&self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    fn set_read_deadline(&self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    fn set_write_deadline(&self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }
}
