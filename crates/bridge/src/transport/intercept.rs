//! Traffic-observing stream wrapper.
//!
//! [`InterceptingStream`] forwards every call to the wrapped stream and hands
//! a copy of the bytes to the session's observers. Notifications go through a
//! bounded queue drained by one worker task per stream, so a slow observer
//! can lose notifications but never slows the stream down.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use protocol::{Direction, PacketMetadata, Transport, TransportAddr};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::observer::Observers;

struct Notification {
    data: Bytes,
    metadata: PacketMetadata,
}

/// Wraps a stream and reports its traffic to [`Observers`].
///
/// Reads are reported after they complete, writes before they are attempted.
/// Each byte handed to the wrapped stream is reported once: a write that
/// returns `Pending`, or accepts only part of the buffer, is not reported
/// again when the caller retries with the remainder.
pub struct InterceptingStream<S> {
    inner: S,
    notifications: Option<mpsc::Sender<Notification>>,
    observe_receive: bool,
    observe_send: bool,
    /// Reported bytes the wrapped stream has not accepted yet. They lead the
    /// next buffer passed to `poll_write`.
    unwritten_reported: usize,
}

impl<S> InterceptingStream<S> {
    /// Wraps `inner`.
    ///
    /// When at least one packet observer is registered this spawns the
    /// notification worker, so it must be called inside a Tokio runtime.
    pub fn new(inner: S, observers: Observers, queue_capacity: usize) -> Self {
        let observe_receive = observers.observes_receive();
        let observe_send = observers.observes_send();

        let notifications = if observe_receive || observe_send {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            tokio::spawn(run_notifier(rx, observers));
            Some(tx)
        } else {
            None
        };

        Self {
            inner,
            notifications,
            observe_receive,
            observe_send,
            unwritten_reported: 0,
        }
    }

    /// Returns a reference to the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the wrapped stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwraps the stream. Pending notifications are still delivered.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Returns true if this stream runs a notification worker.
    pub fn is_observed(&self) -> bool {
        self.notifications.is_some()
    }

    fn schedule(&self, direction: Direction, data: &[u8]) {
        let Some(tx) = &self.notifications else {
            return;
        };

        let notification = Notification {
            data: Bytes::copy_from_slice(data),
            metadata: PacketMetadata::stream(direction, data.len()),
        };
        if let Err(mpsc::error::TrySendError::Full(n)) = tx.try_send(notification) {
            tracing::trace!(
                direction = ?n.metadata.direction,
                size = n.metadata.size,
                "Notification queue full, dropping packet notification"
            );
        }
    }
}

async fn run_notifier(mut rx: mpsc::Receiver<Notification>, observers: Observers) {
    while let Some(Notification { data, metadata }) = rx.recv().await {
        match metadata.direction {
            Direction::Receive => observers.notify_receive(data, metadata),
            Direction::Send => observers.notify_send(data, metadata),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for InterceptingStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = &buf.filled()[before..];
            if this.observe_receive && !read.is_empty() {
                this.schedule(Direction::Receive, read);
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for InterceptingStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.observe_send && buf.len() > this.unwritten_reported {
            this.schedule(Direction::Send, &buf[this.unwritten_reported..]);
            this.unwritten_reported = buf.len();
        }

        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        match &result {
            Poll::Ready(Ok(n)) => {
                this.unwritten_reported = this.unwritten_reported.saturating_sub(*n);
            }
            Poll::Ready(Err(_)) => this.unwritten_reported = 0,
            Poll::Pending => {}
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: Transport> Transport for InterceptingStream<S> {
    fn local_addr(&self) -> TransportAddr {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> TransportAddr {
        self.inner.remote_addr()
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_deadline(deadline)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.inner.set_write_deadline(deadline)
    }
}

impl<S> std::fmt::Debug for InterceptingStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptingStream")
            .field("observe_receive", &self.observe_receive)
            .field("observe_send", &self.observe_send)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::adapter::{HostCallbacks, TransportAdapter};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    type Seen = Arc<Mutex<Vec<(Bytes, PacketMetadata)>>>;

    fn recording_observers() -> (Observers, Seen, Seen) {
        let received: Seen = Arc::default();
        let sent: Seen = Arc::default();
        let r = received.clone();
        let s = sent.clone();
        let observers = Observers::new()
            .on_packet_receive(move |data, meta| r.lock().unwrap().push((data, meta)))
            .on_packet_send(move |data, meta| s.lock().unwrap().push((data, meta)));
        (observers, received, sent)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_read_reported_with_copy() {
        let (observers, received, _) = recording_observers();
        let (mut remote, local) = duplex(64);
        let mut stream = InterceptingStream::new(local, observers, 256);

        remote.write_all(b"banner").await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"banner");

        settle().await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, Bytes::from_static(b"banner"));
        assert_eq!(received[0].1.direction, Direction::Receive);
        assert_eq!(received[0].1.size, 6);
        assert!(received[0].1.kind.is_none());
    }

    #[tokio::test]
    async fn test_write_reported_and_forwarded() {
        let (observers, _, sent) = recording_observers();
        let (mut remote, local) = duplex(64);
        let mut stream = InterceptingStream::new(local, observers, 256);

        stream.write_all(b"kexinit").await.unwrap();
        let mut buf = [0u8; 16];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"kexinit");

        settle().await;
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Bytes::from_static(b"kexinit"));
        assert_eq!(sent[0].1.direction, Direction::Send);
        assert_eq!(sent[0].1.size, 7);
    }

    #[tokio::test]
    async fn test_eof_not_reported() {
        let (observers, received, _) = recording_observers();
        let (remote, local) = duplex(64);
        let mut stream = InterceptingStream::new(local, observers, 256);
        drop(remote);

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        settle().await;
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_error_still_reported() {
        let (observers, _, sent) = recording_observers();
        let adapter = TransportAdapter::new("t1", HostCallbacks::new());
        adapter.close().unwrap();
        let mut stream = InterceptingStream::new(adapter.stream(), observers, 256);

        let err = stream.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        settle().await;
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_observers_no_worker() {
        let (_remote, local) = duplex(64);
        let stream = InterceptingStream::new(local, Observers::new(), 256);
        assert!(!stream.is_observed());

        let state_only = Observers::new().on_state_change(|_| {});
        let (_remote, local) = duplex(64);
        let stream = InterceptingStream::new(local, state_only, 256);
        assert!(!stream.is_observed());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_notifications() {
        let (observers, _, sent) = recording_observers();
        let (_remote, local) = duplex(1024);
        let mut stream = InterceptingStream::new(local, observers, 2);

        // The worker cannot run until this task yields
        for _ in 0..5 {
            stream.write_all(b"x").await.unwrap();
        }

        settle().await;
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    /// Accepts one byte per write.
    #[derive(Default)]
    struct Trickle {
        written: Vec<u8>,
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            match buf.first() {
                Some(byte) => {
                    this.written.push(*byte);
                    Poll::Ready(Ok(1))
                }
                None => Poll::Ready(Ok(0)),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn sent_bytes(sent: &Seen) -> Vec<u8> {
        sent.lock()
            .unwrap()
            .iter()
            .flat_map(|(data, _)| data.to_vec())
            .collect()
    }

    #[tokio::test]
    async fn test_partial_writes_reported_once() {
        let (observers, _, sent) = recording_observers();
        let mut stream = InterceptingStream::new(Trickle::default(), observers, 256);

        stream.write_all(b"abc").await.unwrap();
        stream.write_all(b"de").await.unwrap();
        assert_eq!(stream.get_ref().written, b"abcde");

        settle().await;
        assert_eq!(sent_bytes(&sent), b"abcde");
        let sizes: Vec<usize> = sent.lock().unwrap().iter().map(|(_, m)| m.size).collect();
        assert_eq!(sizes, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_grown_retry_reports_only_new_bytes() {
        let (observers, _, sent) = recording_observers();
        let mut stream = InterceptingStream::new(Trickle::default(), observers, 256);

        // One byte of "abc" is accepted, the retry carries the rest plus more
        assert_eq!(stream.write(b"abc").await.unwrap(), 1);
        stream.write_all(b"bcxy").await.unwrap();
        assert_eq!(stream.get_ref().written, b"abcxy");

        settle().await;
        assert_eq!(sent_bytes(&sent), b"abcxy");
    }

    #[tokio::test]
    async fn test_forwards_transport_contract() {
        let adapter = TransportAdapter::new("t9", HostCallbacks::new());
        let stream = InterceptingStream::new(adapter.stream(), Observers::new(), 256);

        assert_eq!(stream.remote_addr().address(), "t9");
        assert_eq!(stream.local_addr().address(), "browser");
        assert!(stream.set_deadline(None).is_ok());
    }
}
