//! Value types exchanged with the host and with observers.
//!
//! Every type here serializes to the same JSON shape the host side consumes:
//! camelCase field names, lowercase enum tags.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Connection parameters supplied by the host for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionOptions {
    /// Remote host name, used for the handshake address only.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Optional password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Optional private key text (PEM or OpenSSH armor).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Handshake timeout in seconds, 0 means none.
    pub timeout: u64,
}

impl ConnectionOptions {
    /// Creates options for `user@host:port` without credentials.
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            ..Default::default()
        }
    }

    /// Sets the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the private key text.
    pub fn private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Sets the handshake timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    /// Returns the `host:port` address handed to the collaborator.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the timeout as a duration, `None` when unset.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

/// Direction of a packet relative to this side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Bytes leaving towards the remote end.
    Send,
    /// Bytes arriving from the remote end.
    Receive,
}

/// Classification attached to session-level packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    /// Decoded shell data.
    Data,
}

/// Metadata delivered to packet observers alongside a copy of the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketMetadata {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Packet direction.
    pub direction: Direction,
    /// Payload size in bytes.
    pub size: usize,
    /// Present for session-level shell data, absent for raw stream traffic.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PacketKind>,
}

impl PacketMetadata {
    /// Metadata for raw stream traffic, stamped with the current time.
    pub fn stream(direction: Direction, size: usize) -> Self {
        Self {
            timestamp: unix_now(),
            direction,
            size,
            kind: None,
        }
    }

    /// Metadata for decoded shell data, stamped with the current time.
    pub fn data(direction: Direction, size: usize) -> Self {
        Self {
            kind: Some(PacketKind::Data),
            ..Self::stream(direction, size)
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, connect not yet called. Never emitted to observers.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Handshake succeeded.
    Connected,
    /// Teardown in progress.
    Disconnecting,
    /// Teardown complete.
    Disconnected,
    /// Connect failed. Terminal; the client must be recreated.
    Error,
}

impl SessionState {
    /// Returns the lowercase name used on the host side.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the current Unix timestamp in seconds.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
