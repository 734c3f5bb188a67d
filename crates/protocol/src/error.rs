//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering failures reported by credential parsing,
/// tunnel framing and the secure-shell collaborator.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Credential errors
    /// Private key text could not be parsed.
    #[error("failed to parse private key: {0}")]
    InvalidPrivateKey(String),

    // Handshake errors
    /// The secure-channel handshake or authentication failed.
    #[error("failed to establish SSH connection: {0}")]
    HandshakeFailed(String),

    // Channel errors
    /// A request on an open connection (session, pty, shell, window change) failed.
    #[error("{request} failed: {reason}")]
    ChannelRequest {
        /// The request that was rejected.
        request: &'static str,
        /// Description reported by the collaborator.
        reason: String,
    },

    /// Shell pipes were already handed out.
    #[error("shell pipes already taken")]
    PipesTaken,

    // Framing errors
    /// Frame exceeds the maximum size the length prefix can carry.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the rejected frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Frame body could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    // Connection errors
    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Builds a [`ProtocolError::ChannelRequest`] from any displayable reason.
    pub fn channel_request(request: &'static str, reason: impl std::fmt::Display) -> Self {
        ProtocolError::ChannelRequest {
            request,
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::InvalidPrivateKey(format!("invalid base64 body: {}", err))
    }
}

impl From<prost::DecodeError> for ProtocolError {
    fn from(err: prost::DecodeError) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}
