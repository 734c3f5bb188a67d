//! Secure-tunnel-backed transport.
//!
//! Connects to a managed secure tunneling endpoint over WebSocket and speaks
//! its framed protocol: shell bytes travel as DATA messages on one stream,
//! and the stream is opened by a STREAM_START / SERVICE_IDS exchange whose
//! direction depends on the local mode.
//!
//! Writes made before the tunnel is ready are queued and flushed, in order,
//! once the exchange completes.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::StreamExt;
use protocol::tunnel::MAX_PAYLOAD_SIZE;
use protocol::{FrameDecoder, MessageType, ProtocolError, ProtocolVersion, TunnelMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        Error as WsError, Message as WsMessage,
    },
};
use url::Url;

use super::websocket::{inject_with_retry, run_writer, FrameChannel, OUTBOUND_QUEUE_CAPACITY};
use crate::bridge::ShellBridge;
use crate::error::{BridgeError, Result};
use crate::transport::{HostChannel, TransportAdapter};

/// Stream id a source opens its stream with.
const INITIAL_STREAM_ID: i32 = 1;

/// Connection id used on V3 tunnels.
const CONNECTION_ID: u32 = 1;

/// Which end of the tunnel this side is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMode {
    /// Opens the stream with STREAM_START.
    Source,
    /// Announces its services and waits for the source's STREAM_START.
    Destination,
}

impl TunnelMode {
    /// Returns the `local-proxy-mode` query value.
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelMode::Source => "source",
            TunnelMode::Destination => "destination",
        }
    }
}

/// Connection settings for a secure tunnel.
#[derive(Clone)]
pub struct SecureTunnelConfig {
    /// Region hosting the tunnel, used to derive the endpoint.
    pub region: String,
    /// Client access token for this end of the tunnel.
    pub access_token: String,
    /// Local mode.
    pub mode: TunnelMode,
    /// Service identifier for multiplexed tunnels.
    pub service_id: Option<String>,
    /// Protocol version, negotiated as the WebSocket subprotocol.
    pub protocol: ProtocolVersion,
    /// Endpoint override; derived from the region when unset.
    pub endpoint: Option<String>,
}

impl SecureTunnelConfig {
    pub fn new(region: impl Into<String>, access_token: impl Into<String>, mode: TunnelMode) -> Self {
        Self {
            region: region.into(),
            access_token: access_token.into(),
            mode,
            service_id: None,
            protocol: ProtocolVersion::default(),
            endpoint: None,
        }
    }

    /// Sets the service identifier.
    pub fn service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// Sets the protocol version.
    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Overrides the tunnel endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Builds the WebSocket URL, with mode and access token as query parameters.
    pub fn url(&self) -> Result<Url> {
        if self.access_token.is_empty() {
            return Err(BridgeError::Validation("missing access token".to_string()));
        }

        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None if self.region.is_empty() => {
                return Err(BridgeError::Validation("missing region".to_string()));
            }
            None => format!("wss://data.tunneling.iot.{}.amazonaws.com/tunnel", self.region),
        };

        Url::parse_with_params(
            &endpoint,
            &[
                ("local-proxy-mode", self.mode.as_str()),
                ("access-token", self.access_token.as_str()),
            ],
        )
        .map_err(|e| BridgeError::Validation(format!("invalid tunnel endpoint: {}", e)))
    }
}

impl std::fmt::Debug for SecureTunnelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureTunnelConfig")
            .field("region", &self.region)
            .field("access_token", &"<redacted>")
            .field("mode", &self.mode)
            .field("service_id", &self.service_id)
            .field("protocol", &self.protocol)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

struct StreamState {
    stream_id: i32,
    ready: bool,
    /// Set when the remote end reset the stream, so closing does not echo it.
    reset_by_remote: bool,
    pending: Vec<Vec<u8>>,
}

/// Tunnel state shared by the host channel and the reader task.
struct TunnelShared {
    transport_id: String,
    mode: TunnelMode,
    service_id: Option<String>,
    protocol: ProtocolVersion,
    frames: FrameChannel,
    state: Mutex<StreamState>,
}

impl TunnelShared {
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_message(&self, message: &TunnelMessage) -> io::Result<()> {
        let frame = message
            .encode_frame()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.frames.push(frame)
    }

    fn send_data(&self, stream_id: i32, data: &[u8]) -> io::Result<()> {
        for chunk in data.chunks(MAX_PAYLOAD_SIZE) {
            let mut message = TunnelMessage::data(stream_id, chunk.to_vec());
            if self.protocol.supports_service_ids() {
                message.service_id = self.service_id.clone().unwrap_or_default();
            }
            if self.protocol.supports_connections() {
                message.connection_id = CONNECTION_ID;
            }
            self.send_message(&message)?;
        }
        Ok(())
    }

    /// Sends the opening message for this side's mode.
    fn open(&self) -> io::Result<()> {
        match self.mode {
            TunnelMode::Source => {
                let stream_id = self.lock().stream_id;
                tracing::debug!(transport_id = %self.transport_id, stream_id, "Sending STREAM_START");
                self.send_message(&TunnelMessage::stream_start(
                    stream_id,
                    self.service_id.as_deref(),
                ))
            }
            TunnelMode::Destination => match &self.service_id {
                Some(service_id) => {
                    tracing::debug!(transport_id = %self.transport_id, service_id = %service_id, "Sending SERVICE_IDS");
                    self.send_message(&TunnelMessage::service_ids(vec![service_id.clone()]))
                }
                None => Ok(()),
            },
        }
    }

    /// Marks the stream ready and flushes queued writes.
    fn mark_ready(&self, stream_id: Option<i32>) {
        let mut state = self.lock();
        if let Some(stream_id) = stream_id {
            state.stream_id = stream_id;
        }
        state.ready = true;

        let pending = std::mem::take(&mut state.pending);
        tracing::info!(
            transport_id = %self.transport_id,
            stream_id = state.stream_id,
            queued = pending.len(),
            "Secure tunnel ready"
        );
        for data in pending {
            if let Err(e) = self.send_data(state.stream_id, &data) {
                tracing::warn!(transport_id = %self.transport_id, error = %e, "Failed to flush queued tunnel data");
                break;
            }
        }
    }
}

/// Host channel that wraps outbound bytes in DATA messages.
struct TunnelChannel {
    shared: Arc<TunnelShared>,
}

impl HostChannel for TunnelChannel {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut state = self.shared.lock();
        if !state.ready {
            if state.pending.len() >= OUTBOUND_QUEUE_CAPACITY {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "secure tunnel not ready and queue full",
                ));
            }
            tracing::trace!(transport_id = %self.shared.transport_id, size = data.len(), "Queueing write until tunnel is ready");
            state.pending.push(data.to_vec());
            return Ok(());
        }
        self.shared.send_data(state.stream_id, data)
    }

    fn close(&self) -> io::Result<()> {
        let (stream_id, reset_by_remote) = {
            let state = self.shared.lock();
            (state.stream_id, state.reset_by_remote)
        };
        if !reset_by_remote {
            if let Err(e) = self.shared.send_message(&TunnelMessage::stream_reset(stream_id)) {
                tracing::debug!(transport_id = %self.shared.transport_id, error = %e, "STREAM_RESET not sent");
            }
        }
        self.shared.frames.shut();
        Ok(())
    }
}

/// A transport carried over a secure tunnel.
///
/// As with [`WebSocketTransport`](super::WebSocketTransport) the pump keeps
/// running after the handle is dropped, and the transport stays registered
/// until the caller closes it through the bridge.
pub struct SecureTunnelTransport {
    adapter: Arc<TransportAdapter>,
    shared: Arc<TunnelShared>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SecureTunnelTransport {
    /// Connects to the tunnel and registers it as transport `transport_id`.
    pub async fn connect(
        bridge: &ShellBridge,
        transport_id: &str,
        config: SecureTunnelConfig,
    ) -> Result<Self> {
        let url = config.url()?;
        let subprotocol = config.protocol.subprotocol();
        tracing::info!(
            transport_id = %transport_id,
            mode = config.mode.as_str(),
            subprotocol,
            "Connecting secure tunnel"
        );

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(connect_error)?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(subprotocol));

        let (ws_stream, _) = connect_async(request).await.map_err(connect_error)?;
        let (ws_sink, mut ws_stream) = ws_stream.split();

        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let shared = Arc::new(TunnelShared {
            transport_id: transport_id.to_string(),
            mode: config.mode,
            service_id: config.service_id,
            protocol: config.protocol,
            frames: FrameChannel::new(tx),
            state: Mutex::new(StreamState {
                stream_id: INITIAL_STREAM_ID,
                ready: false,
                reset_by_remote: false,
                pending: Vec::new(),
            }),
        });

        let adapter = bridge.create_transport(
            transport_id,
            TunnelChannel {
                shared: Arc::clone(&shared),
            },
        )?;
        let writer = tokio::spawn(run_writer(transport_id.to_string(), rx, ws_sink));
        if let Err(e) = shared.open() {
            if let Err(close_err) = bridge.close_transport(transport_id) {
                tracing::warn!(transport_id = %transport_id, error = %close_err, "Failed to close transport");
            }
            return Err(e.into());
        }

        let reader_adapter = Arc::clone(&adapter);
        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();

            'socket: while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(WsMessage::Binary(data)) => decoder.push(&data),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(transport_id = %reader_adapter.id(), error = %e, "Secure tunnel receive failed");
                        break;
                    }
                }

                loop {
                    match decoder.next_message() {
                        Ok(Some(message)) => {
                            if !handle_message(&reader_shared, &reader_adapter, message).await {
                                break 'socket;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(transport_id = %reader_adapter.id(), error = %e, "Dropping undecodable tunnel frame");
                        }
                    }
                }
            }

            if let Err(e) = reader_adapter.close() {
                tracing::warn!(transport_id = %reader_adapter.id(), error = %e, "Failed to close transport");
            }
            tracing::debug!(transport_id = %reader_adapter.id(), "Secure tunnel reader stopped");
        });

        Ok(Self {
            adapter,
            shared,
            reader,
            writer,
        })
    }

    /// Returns the transport fed by this tunnel.
    pub fn adapter(&self) -> &Arc<TransportAdapter> {
        &self.adapter
    }

    /// Returns true once the stream handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.shared.lock().ready
    }

    /// Returns the id of the tunnel stream in use.
    pub fn stream_id(&self) -> i32 {
        self.shared.lock().stream_id
    }

    /// Returns true once both pump tasks have stopped.
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.writer.is_finished()
    }
}

impl std::fmt::Debug for SecureTunnelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureTunnelTransport")
            .field("transport_id", &self.shared.transport_id)
            .field("mode", &self.shared.mode)
            .finish_non_exhaustive()
    }
}

fn connect_error(e: WsError) -> BridgeError {
    match e {
        WsError::Io(io_err) => BridgeError::Io(io_err),
        _ => BridgeError::Protocol(ProtocolError::ConnectionClosed(format!(
            "secure tunnel connection failed: {}",
            e
        ))),
    }
}

/// Applies one tunnel message. Returns false once the transport should stop.
async fn handle_message(
    shared: &TunnelShared,
    adapter: &TransportAdapter,
    message: TunnelMessage,
) -> bool {
    let message_type = message.message_type();
    tracing::trace!(
        transport_id = %shared.transport_id,
        message_type = ?message_type,
        stream_id = message.stream_id,
        size = message.payload.len(),
        "Tunnel message"
    );

    match message_type {
        MessageType::Data => {
            message.payload.is_empty()
                || inject_with_retry(adapter, Bytes::from(message.payload)).await
        }
        MessageType::StreamStart => {
            if shared.mode == TunnelMode::Destination {
                shared.mark_ready(Some(message.stream_id));
            }
            true
        }
        MessageType::ServiceIds => {
            tracing::debug!(
                transport_id = %shared.transport_id,
                services = ?message.available_service_ids,
                "Tunnel services announced"
            );
            if shared.mode == TunnelMode::Source {
                shared.mark_ready(None);
            }
            true
        }
        MessageType::StreamReset | MessageType::SessionReset => {
            tracing::info!(transport_id = %shared.transport_id, message_type = ?message_type, "Secure tunnel reset by remote");
            shared.lock().reset_by_remote = true;
            false
        }
        MessageType::ConnectionStart | MessageType::ConnectionReset | MessageType::Unknown => {
            tracing::debug!(
                transport_id = %shared.transport_id,
                message_type = ?message_type,
                connection_id = message.connection_id,
                "Ignoring tunnel message"
            );
            true
        }
    }
}
