//! WebSocket-backed transport.
//!
//! Binary frames received from the socket are injected into a bridge
//! transport; bytes written by the secure-shell engine leave as binary
//! frames. This lets a native host reach a WebSocket-to-TCP relay the same
//! way a browser host would.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use protocol::ProtocolError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};

use crate::bridge::ShellBridge;
use crate::error::{BridgeError, InjectError, Result};
use crate::transport::{HostChannel, TransportAdapter};

/// First delay before retrying an inject into a full transport.
const INJECT_RETRY_INITIAL: Duration = Duration::from_millis(5);

/// Upper bound of the inject retry delay.
const INJECT_RETRY_MAX: Duration = Duration::from_millis(100);

/// Frames waiting for the socket writer before writes are refused.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Host channel that hands outbound frames to the socket writer task.
///
/// Closing drops the sender; the writer flushes what is queued, then sends
/// a close frame.
pub(crate) struct FrameChannel {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
}

impl FrameChannel {
    pub(crate) fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Queues one frame. A full queue is reported as `WouldBlock`.
    pub(crate) fn push(&self, frame: Vec<u8>) -> io::Result<()> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "WebSocket closed"))?;

        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                io::Error::new(io::ErrorKind::WouldBlock, "WebSocket send queue full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "WebSocket closed")
            }
        })
    }

    pub(crate) fn shut(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl HostChannel for FrameChannel {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.push(data.to_vec())
    }

    fn close(&self) -> io::Result<()> {
        self.shut();
        Ok(())
    }
}

/// A transport pumped by a WebSocket connection.
///
/// Dropping the handle leaves the pump running; the pump stops when the
/// socket or the transport closes. The transport stays registered until the
/// caller closes it through the bridge.
#[derive(Debug)]
pub struct WebSocketTransport {
    adapter: Arc<TransportAdapter>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Connects to `url` and registers the socket as transport `transport_id`.
    pub async fn connect(bridge: &ShellBridge, transport_id: &str, url: &str) -> Result<Self> {
        tracing::info!(transport_id = %transport_id, url = %url, "Connecting WebSocket transport");

        let (ws_stream, _) = connect_async(url).await.map_err(|e| match e {
            WsError::Io(io_err) => BridgeError::Io(io_err),
            _ => BridgeError::Protocol(ProtocolError::ConnectionClosed(format!(
                "WebSocket connection failed: {}",
                e
            ))),
        })?;
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let adapter = bridge.create_transport(transport_id, FrameChannel::new(tx))?;
        let writer = tokio::spawn(run_writer(transport_id.to_string(), rx, ws_sink));

        let reader_adapter = Arc::clone(&adapter);
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_stream.next().await {
                let chunk = match message {
                    Ok(WsMessage::Binary(data)) => Bytes::from(data),
                    Ok(WsMessage::Text(text)) => Bytes::from(text.into_bytes()),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(transport_id = %reader_adapter.id(), error = %e, "WebSocket receive failed");
                        break;
                    }
                };
                if !inject_with_retry(&reader_adapter, chunk).await {
                    break;
                }
            }

            if let Err(e) = reader_adapter.close() {
                tracing::warn!(transport_id = %reader_adapter.id(), error = %e, "Failed to close transport");
            }
            tracing::debug!(transport_id = %reader_adapter.id(), "WebSocket reader stopped");
        });

        Ok(Self {
            adapter,
            reader,
            writer,
        })
    }

    /// Returns the transport fed by this socket.
    pub fn adapter(&self) -> &Arc<TransportAdapter> {
        &self.adapter
    }

    /// Returns true once both pump tasks have stopped.
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.writer.is_finished()
    }
}

/// Sends queued frames as binary messages until the channel closes, then
/// closes the socket.
pub(crate) async fn run_writer<S>(transport_id: String, mut rx: mpsc::Receiver<Vec<u8>>, mut ws_sink: S)
where
    S: futures_util::Sink<WsMessage, Error = WsError> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = ws_sink.send(WsMessage::Binary(frame)).await {
            tracing::warn!(transport_id = %transport_id, error = %e, "WebSocket send failed");
            break;
        }
    }

    if let Err(e) = ws_sink.send(WsMessage::Close(None)).await {
        tracing::debug!(transport_id = %transport_id, error = %e, "WebSocket close frame not sent");
    }
    if let Err(e) = ws_sink.close().await {
        tracing::debug!(transport_id = %transport_id, error = %e, "WebSocket sink close failed");
    }
    tracing::debug!(transport_id = %transport_id, "WebSocket writer stopped");
}

/// Injects `chunk`, backing off while the transport is full.
///
/// Returns false once the transport is closed.
pub(crate) async fn inject_with_retry(adapter: &TransportAdapter, chunk: Bytes) -> bool {
    let mut delay = INJECT_RETRY_INITIAL;

    loop {
        match adapter.inject(chunk.clone()) {
            Ok(()) => return true,
            Err(InjectError::Closed) => return false,
            Err(InjectError::Full) => {
                tracing::trace!(transport_id = %adapter.id(), delay_ms = delay.as_millis() as u64, "Transport full, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(INJECT_RETRY_MAX);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HostCallbacks;
    use protocol::{BoxFuture, BoxedTransport, HandshakeParams, SecureConnection, SecureShellConnector};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    struct UnusedConnector;

    impl SecureShellConnector for UnusedConnector {
        fn handshake(
            &self,
            _transport: BoxedTransport,
            _params: HandshakeParams,
        ) -> BoxFuture<'_, protocol::Result<Box<dyn SecureConnection>>> {
            Box::pin(async { Err(ProtocolError::HandshakeFailed("unused".into())) })
        }
    }

    /// Starts a WebSocket server that echoes binary frames.
    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let (mut sink, mut stream) = ws.split();
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    WsMessage::Binary(data) => {
                        if sink.send(WsMessage::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        });

        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_echo_through_websocket() {
        let url = echo_server().await;
        let bridge = ShellBridge::new(Arc::new(UnusedConnector));

        let ws = WebSocketTransport::connect(&bridge, "ws-1", &url).await.unwrap();
        assert!(bridge.transports().contains("ws-1"));

        let mut stream = ws.adapter().stream();
        stream.write_all(b"SSH-2.0-client\r\n").await.unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        while received.len() < 15 {
            let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"SSH-2.0-client\r\n");

        bridge.close_transport("ws-1").unwrap();
        timeout(Duration::from_secs(5), async {
            while !ws.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let bridge = ShellBridge::new(Arc::new(UnusedConnector));
        let result = WebSocketTransport::connect(&bridge, "ws-1", &format!("ws://{}", addr)).await;

        assert!(result.is_err());
        assert!(!bridge.transports().contains("ws-1"));
    }

    #[tokio::test]
    async fn test_retry_waits_for_room() {
        let adapter = TransportAdapter::with_capacity("t1", HostCallbacks::new(), 1);
        adapter.inject(&b"first"[..]).unwrap();

        let retrying = Arc::clone(&adapter);
        let pump = tokio::spawn(async move {
            inject_with_retry(&retrying, Bytes::from_static(b"second")).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut buf = [0u8; 16];
        let n = adapter.stream().read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first");

        assert!(timeout(Duration::from_secs(1), pump).await.unwrap().unwrap());
        let n = adapter.stream().read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second");
    }

    #[tokio::test]
    async fn test_full_send_queue_would_block() {
        let (tx, mut rx) = mpsc::channel(2);
        let channel = FrameChannel::new(tx);

        channel.write(b"one").unwrap();
        channel.write(b"two").unwrap();
        let err = channel.write(b"three").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(rx.recv().await.unwrap(), b"one");
        channel.write(b"three").unwrap();
    }

    #[tokio::test]
    async fn test_close_flushes_queued_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let channel = FrameChannel::new(tx);

        channel.write(b"last words").unwrap();
        channel.close().unwrap();
        assert_eq!(
            channel.write(b"late").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );

        assert_eq!(rx.recv().await.unwrap(), b"last words");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_retry_stops_on_close() {
        let adapter = TransportAdapter::with_capacity("t1", HostCallbacks::new(), 1);
        adapter.close().unwrap();

        assert!(!inject_with_retry(&adapter, Bytes::from_static(b"x")).await);
    }
}
