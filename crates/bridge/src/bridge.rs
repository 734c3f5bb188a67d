//! Top-level manager wiring transports, sessions and the collaborator.
//!
//! [`ShellBridge`] owns the transport and session registries and exposes the
//! operations a host calls: create, feed and close transports; connect,
//! drive and disconnect sessions.

use std::sync::Arc;

use bytes::Bytes;
use protocol::{ConnectionOptions, SecureShellConnector, SessionState};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::observer::Observers;
use crate::registry::{SessionRegistry, TransportRegistry};
use crate::session::{SessionClient, SessionSettings};
use crate::transport::{HostChannel, TransportAdapter};

/// Handle returned by [`ShellBridge::connect`].
///
/// Cloning is cheap; all clones drive the same session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<SessionClient>,
}

impl SessionHandle {
    /// Returns the session ID.
    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    /// Queues bytes for the remote shell. See [`SessionClient::send`].
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        self.session.send(data).await
    }

    /// Disconnects the session. Safe to call more than once.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Resizes the remote terminal. See [`SessionClient::resize_terminal`].
    pub async fn resize_terminal(&self, cols: u32, rows: u32) -> Result<()> {
        self.session.resize_terminal(cols, rows).await
    }

    /// Returns the current session state.
    pub async fn state(&self) -> SessionState {
        self.session.state().await
    }
}

/// Owner of all transports and sessions of one host.
pub struct ShellBridge {
    config: BridgeConfig,
    connector: Arc<dyn SecureShellConnector>,
    transports: Arc<TransportRegistry>,
    sessions: Arc<SessionRegistry>,
}

impl ShellBridge {
    /// Creates a bridge with the default configuration.
    pub fn new(connector: Arc<dyn SecureShellConnector>) -> Self {
        Self {
            config: BridgeConfig::default(),
            connector,
            transports: Arc::new(TransportRegistry::new()),
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    /// Creates a bridge with a validated configuration.
    pub fn with_config(connector: Arc<dyn SecureShellConnector>, config: BridgeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| BridgeError::Validation(e.to_string()))?;

        Ok(Self {
            config,
            ..Self::new(connector)
        })
    }

    /// Returns the library version.
    pub fn version(&self) -> &'static str {
        crate::VERSION
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Returns the transport registry.
    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    /// Returns the session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    // =========================================================================
    // Transports
    // =========================================================================

    /// Creates and registers a transport whose outbound side is `host`.
    ///
    /// Fails with a validation error for an empty or already used ID.
    pub fn create_transport(
        &self,
        id: &str,
        host: impl HostChannel + 'static,
    ) -> Result<Arc<TransportAdapter>> {
        require("transport id", id)?;

        let adapter =
            TransportAdapter::with_capacity(id, host, self.config.transport.inbound_queue_capacity);
        if !self.transports.register_new(id, Arc::clone(&adapter)) {
            return Err(BridgeError::Validation(format!(
                "transport {} already exists",
                id
            )));
        }

        tracing::info!(transport_id = %id, "Transport created");
        Ok(adapter)
    }

    /// Closes and unregisters a transport.
    pub fn close_transport(&self, id: &str) -> Result<()> {
        let adapter = self
            .transports
            .remove(id)
            .ok_or_else(|| BridgeError::TransportNotFound(id.to_string()))?;

        if let Err(e) = adapter.close() {
            tracing::warn!(transport_id = %id, error = %e, "Host close callback failed");
        }
        tracing::info!(transport_id = %id, "Transport closed");
        Ok(())
    }

    /// Feeds bytes received by the host into a transport.
    ///
    /// Never waits: a full inbound queue fails with a capacity error.
    pub fn inject_transport_data(&self, id: &str, data: impl Into<Bytes>) -> Result<()> {
        let adapter = self
            .transports
            .get(id)
            .ok_or_else(|| BridgeError::TransportNotFound(id.to_string()))?;

        adapter.inject(data).map_err(|e| e.into_bridge_error(id))
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Connects a new session over the transport `transport_id`.
    ///
    /// The session is registered only if the handshake succeeds.
    pub async fn connect(
        &self,
        options: ConnectionOptions,
        transport_id: &str,
        observers: Observers,
    ) -> Result<SessionHandle> {
        require("host", &options.host)?;
        require("user", &options.user)?;
        require("transport id", transport_id)?;
        if options.port == 0 {
            return Err(BridgeError::Validation("port must be non-zero".to_string()));
        }

        let transport = self
            .transports
            .get(transport_id)
            .ok_or_else(|| BridgeError::TransportNotFound(transport_id.to_string()))?;

        let session = Arc::new(
            SessionClient::new(
                options,
                observers,
                Arc::clone(&self.connector),
                Arc::clone(&self.sessions),
                SessionSettings::from_config(&self.config),
            )
            .with_transport(transport),
        );
        session.connect().await?;

        Ok(SessionHandle { session })
    }

    /// Looks up a connected session.
    pub fn session(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .get(session_id)
            .map(|session| SessionHandle { session })
    }

    /// Disconnects a session by ID.
    pub async fn disconnect(&self, session_id: &str) -> Result<()> {
        self.lookup(session_id)?.disconnect().await
    }

    /// Sends bytes to a session by ID.
    pub async fn send(&self, session_id: &str, data: impl Into<Bytes>) -> Result<()> {
        self.lookup(session_id)?.send(data).await
    }

    /// Resizes the terminal of a session by ID.
    pub async fn resize_terminal(&self, session_id: &str, cols: u32, rows: u32) -> Result<()> {
        self.lookup(session_id)?.resize_terminal(cols, rows).await
    }

    /// Returns the state of a session by ID.
    pub async fn session_state(&self, session_id: &str) -> Result<SessionState> {
        Ok(self.lookup(session_id)?.state().await)
    }

    /// Disconnects every session and closes every transport.
    pub async fn shutdown(&self) {
        for id in self.sessions.ids() {
            if let Some(session) = self.sessions.get(&id) {
                let _ = session.disconnect().await;
            }
        }
        for id in self.transports.ids() {
            let _ = self.close_transport(&id);
        }
        tracing::info!("Bridge shut down");
    }

    fn lookup(&self, session_id: &str) -> Result<Arc<SessionClient>> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))
    }
}

impl std::fmt::Debug for ShellBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellBridge")
            .field("transports", &self.transports.len())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BridgeError::Validation(format!("missing {}", name)));
    }
    Ok(())
}
