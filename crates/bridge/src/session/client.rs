//! One remote shell interaction over a host-fed transport.
//!
//! A [`SessionClient`] walks through
//! `idle → connecting → connected → disconnecting → disconnected`, or
//! `connecting → error` when the handshake fails. The shell channel is not
//! opened at connect time; the first [`SessionClient::send`] opens it.
//!
//! All mutable fields sit behind one `RwLock`. The fast `send` path takes the
//! read lock; connect, shell bootstrap and disconnect take the write lock.

use std::sync::Arc;

use bytes::Bytes;
use protocol::{
    ConnectionOptions, Credentials, Direction, HandshakeParams, PacketMetadata, PtyRequest,
    SecureConnection, SecureShellConnector, SessionState, ShellPipes, ShellSession,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::observer::Observers;
use crate::registry::SessionRegistry;
use crate::transport::{InterceptingStream, TransportAdapter};

/// Prefix of generated session IDs.
pub const SESSION_ID_PREFIX: &str = "ssh-";

/// Per-session tunables, usually derived from [`BridgeConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Capacity of the queue feeding the remote standard input.
    pub outbound_queue_capacity: usize,
    /// Buffer size of the stdout and stderr forwarders.
    pub read_buffer_size: usize,
    /// Capacity of the intercept notification queue.
    pub notification_queue_capacity: usize,
    /// Pseudo-terminal requested at shell bootstrap.
    pub pty: PtyRequest,
}

impl SessionSettings {
    /// Extracts the session settings from a bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            outbound_queue_capacity: config.session.outbound_queue_capacity,
            read_buffer_size: config.session.read_buffer_size,
            notification_queue_capacity: config.observer.notification_queue_capacity,
            pty: PtyRequest::new(
                config.session.term.clone(),
                config.session.rows,
                config.session.cols,
            ),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

struct Inner {
    state: SessionState,
    transport: Option<Arc<TransportAdapter>>,
    connection: Option<Box<dyn SecureConnection>>,
    /// `Some` exactly while the shell is started.
    shell: Option<Box<dyn ShellSession>>,
    input: Option<mpsc::Sender<Bytes>>,
}

/// An authenticated remote shell session.
pub struct SessionClient {
    id: String,
    options: ConnectionOptions,
    observers: Observers,
    connector: Arc<dyn SecureShellConnector>,
    registry: Arc<SessionRegistry>,
    settings: SessionSettings,
    inner: RwLock<Inner>,
}

impl SessionClient {
    /// Creates an idle session with a fresh `ssh-<uuid>` ID.
    ///
    /// The session registers itself in `registry` once connected and removes
    /// itself on disconnect.
    pub fn new(
        options: ConnectionOptions,
        observers: Observers,
        connector: Arc<dyn SecureShellConnector>,
        registry: Arc<SessionRegistry>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id: format!("{}{}", SESSION_ID_PREFIX, Uuid::new_v4()),
            options,
            observers,
            connector,
            registry,
            settings,
            inner: RwLock::new(Inner {
                state: SessionState::Idle,
                transport: None,
                connection: None,
                shell: None,
                input: None,
            }),
        }
    }

    /// Binds the transport the handshake will run over.
    pub fn with_transport(mut self, transport: Arc<TransportAdapter>) -> Self {
        self.inner.get_mut().transport = Some(transport);
        self
    }

    /// Returns the session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the connection options.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Returns the current state.
    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    /// Returns true if the shell channel is open.
    pub async fn is_shell_started(&self) -> bool {
        self.inner.read().await.shell.is_some()
    }

    /// Runs the handshake and registers the session.
    ///
    /// Only valid from `idle` with a bound transport; otherwise fails with a
    /// validation error and leaves the state untouched. A credential or
    /// handshake failure moves the session to the terminal `error` state.
    pub async fn connect(self: &Arc<Self>) -> Result<String> {
        let mut inner = self.inner.write().await;

        if inner.state != SessionState::Idle {
            return Err(BridgeError::Validation(format!(
                "session {} cannot connect from state {}",
                self.id, inner.state
            )));
        }
        let transport = inner
            .transport
            .clone()
            .ok_or_else(|| BridgeError::Validation("no transport bound to session".to_string()))?;

        self.transition(&mut inner, SessionState::Connecting);

        let credentials = match Credentials::from_options(&self.options) {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Rejected credentials");
                self.transition(&mut inner, SessionState::Error);
                return Err(e.into());
            }
        };

        let stream = InterceptingStream::new(
            transport.stream(),
            self.observers.clone(),
            self.settings.notification_queue_capacity,
        );
        let params = HandshakeParams {
            user: self.options.user.clone(),
            host: self.options.host.clone(),
            port: self.options.port,
            credentials,
            timeout: self.options.timeout(),
        };

        tracing::debug!(
            session_id = %self.id,
            transport_id = %transport.id(),
            address = %self.options.address(),
            "Starting handshake"
        );

        match self.connector.handshake(Box::new(stream), params).await {
            Ok(connection) => {
                inner.connection = Some(connection);
                self.registry.register(self.id.clone(), Arc::clone(self));
                self.transition(&mut inner, SessionState::Connected);
                tracing::info!(
                    session_id = %self.id,
                    transport_id = %transport.id(),
                    user = %self.options.user,
                    "Session connected"
                );
                Ok(self.id.clone())
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Handshake failed");
                self.transition(&mut inner, SessionState::Error);
                Err(e.into())
            }
        }
    }

    /// Queues bytes for the remote standard input.
    ///
    /// The first call opens the shell. Never waits for queue space: a full
    /// queue fails with a capacity error that the caller may retry.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let size = data.len();

        let queued = {
            let inner = self.inner.read().await;
            if inner.shell.is_some() {
                Some(self.enqueue(&inner, data.clone()))
            } else {
                None
            }
        };

        match queued {
            Some(result) => result?,
            None => {
                let mut inner = self.inner.write().await;
                if inner.shell.is_none() {
                    self.start_shell(&mut inner).await?;
                }
                self.enqueue(&inner, data.clone())?;
            }
        }

        self.observers
            .notify_send(data, PacketMetadata::data(Direction::Send, size));
        Ok(())
    }

    /// Sends a window-change request for the active shell.
    ///
    /// Fails with a resource error when no shell is running, checked before
    /// the size itself.
    pub async fn resize_terminal(&self, cols: u32, rows: u32) -> Result<()> {
        let inner = self.inner.read().await;
        let shell = inner
            .shell
            .as_ref()
            .ok_or_else(|| BridgeError::Resource("no active session".to_string()))?;
        if cols == 0 || rows == 0 {
            return Err(BridgeError::Validation(format!(
                "invalid terminal size {}x{}",
                cols, rows
            )));
        }

        shell.window_change(rows, cols).await?;
        tracing::debug!(session_id = %self.id, cols, rows, "Terminal resized");
        Ok(())
    }

    /// Tears the session down and unregisters it.
    ///
    /// Works from any state. Calling it again once `disconnected` does
    /// nothing. Failures closing the shell or connection are logged only.
    pub async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state == SessionState::Disconnected {
            return Ok(());
        }

        self.transition(&mut inner, SessionState::Disconnecting);

        // Dropping the sender ends the stdin forwarder
        inner.input = None;

        if let Some(shell) = inner.shell.take() {
            if let Err(e) = shell.close().await {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to close shell session");
            }
        }
        if let Some(connection) = inner.connection.take() {
            if let Err(e) = connection.close().await {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to close connection");
            }
        }

        self.registry.remove(&self.id);
        self.transition(&mut inner, SessionState::Disconnected);
        tracing::info!(session_id = %self.id, "Session disconnected");

        Ok(())
    }

    fn transition(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.observers.notify_state(state);
    }

    fn enqueue(&self, inner: &Inner, data: Bytes) -> Result<()> {
        let input = inner
            .input
            .as_ref()
            .ok_or_else(|| BridgeError::Resource("session not active".to_string()))?;

        input.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BridgeError::Capacity(format!("send queue full for session {}", self.id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                BridgeError::Resource("session not active".to_string())
            }
        })
    }

    /// Opens the shell channel and starts the three forwarders.
    async fn start_shell(&self, inner: &mut Inner) -> Result<()> {
        if inner.state != SessionState::Connected {
            return Err(BridgeError::Resource("not connected".to_string()));
        }
        let connection = inner
            .connection
            .as_ref()
            .ok_or_else(|| BridgeError::Resource("not connected".to_string()))?;

        let mut shell = connection.open_session().await?;

        let pipes = match self.prepare_shell(shell.as_mut()).await {
            Ok(pipes) => pipes,
            Err(e) => {
                if let Err(close_err) = shell.close().await {
                    tracing::warn!(session_id = %self.id, error = %close_err, "Failed to close shell session");
                }
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(self.settings.outbound_queue_capacity.max(1));

        tokio::spawn(forward_input(self.id.clone(), rx, pipes.stdin));
        tokio::spawn(forward_output(
            self.id.clone(),
            "stdout",
            pipes.stdout,
            self.observers.clone(),
            self.settings.read_buffer_size,
        ));
        tokio::spawn(forward_output(
            self.id.clone(),
            "stderr",
            pipes.stderr,
            self.observers.clone(),
            self.settings.read_buffer_size,
        ));

        inner.shell = Some(shell);
        inner.input = Some(tx);

        tracing::debug!(
            session_id = %self.id,
            term = %self.settings.pty.term,
            cols = self.settings.pty.cols,
            rows = self.settings.pty.rows,
            "Shell started"
        );
        Ok(())
    }

    async fn prepare_shell(&self, shell: &mut dyn ShellSession) -> Result<ShellPipes> {
        let pipes = shell.take_pipes()?;
        shell.request_pty(&self.settings.pty).await?;
        shell.start_shell().await?;
        Ok(pipes)
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("id", &self.id)
            .field("host", &self.options.host)
            .field("user", &self.options.user)
            .finish_non_exhaustive()
    }
}

/// Drains the outbound queue into the remote standard input.
async fn forward_input(
    session_id: String,
    mut rx: mpsc::Receiver<Bytes>,
    mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
) {
    while let Some(chunk) = rx.recv().await {
        let written = async {
            stdin.write_all(&chunk).await?;
            stdin.flush().await
        };
        if let Err(e) = written.await {
            tracing::debug!(session_id = %session_id, error = %e, "Shell input closed");
            return;
        }
    }

    if let Err(e) = stdin.shutdown().await {
        tracing::debug!(session_id = %session_id, error = %e, "Failed to close shell input");
    }
    tracing::trace!(session_id = %session_id, "Input forwarder stopped");
}

/// Reads one remote output pipe until end of stream and reports every chunk.
async fn forward_output(
    session_id: String,
    pipe: &'static str,
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    observers: Observers,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if observers.observes_receive() {
                    observers.notify_receive(
                        Bytes::copy_from_slice(&buf[..n]),
                        PacketMetadata::data(Direction::Receive, n),
                    );
                }
            }
            Err(e) => {
                tracing::debug!(session_id = %session_id, pipe, error = %e, "Shell output read failed");
                break;
            }
        }
    }

    tracing::trace!(session_id = %session_id, pipe, "Output forwarder stopped");
}
