//! Error types for the bridge.

use protocol::ProtocolError;
use thiserror::Error;

/// Coarse classification of a [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or malformed arguments, or an operation invalid in the current state.
    Validation,
    /// Unknown transport or session id.
    Lookup,
    /// Handshake, authentication or channel failure.
    Protocol,
    /// The operation needs a shell, session or transport that is not there.
    Resource,
    /// A bounded queue is full. Retrying later may succeed.
    Capacity,
    /// Unexpected I/O failure.
    Io,
}

/// Errors returned by bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid argument or state.
    #[error("{0}")]
    Validation(String),

    /// The transport was not found.
    #[error("transport not found: {0}")]
    TransportNotFound(String),

    /// The session was not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The transport has been closed.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// The required shell or connection does not exist.
    #[error("{0}")]
    Resource(String),

    /// A bounded queue is full.
    #[error("{0}")]
    Capacity(String),

    /// Failure reported by the secure-shell collaborator.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Validation(_) => ErrorKind::Validation,
            BridgeError::TransportNotFound(_) | BridgeError::SessionNotFound(_) => ErrorKind::Lookup,
            BridgeError::TransportClosed(_) | BridgeError::Resource(_) => ErrorKind::Resource,
            BridgeError::Capacity(_) => ErrorKind::Capacity,
            BridgeError::Protocol(_) => ErrorKind::Protocol,
            BridgeError::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Capacity
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Why a chunk could not be injected into a transport.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectError {
    /// The transport is closed.
    #[error("transport closed")]
    Closed,

    /// The inbound queue is at capacity.
    #[error("read buffer full")]
    Full,
}

impl InjectError {
    /// Converts into a [`BridgeError`] for the given transport.
    pub fn into_bridge_error(self, transport_id: &str) -> BridgeError {
        match self {
            InjectError::Closed => BridgeError::TransportClosed(transport_id.to_string()),
            InjectError::Full => {
                BridgeError::Capacity(format!("read buffer full for transport {}", transport_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            BridgeError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            BridgeError::SessionNotFound("s".into()).kind(),
            ErrorKind::Lookup
        );
        assert_eq!(
            BridgeError::Protocol(ProtocolError::HandshakeFailed("no".into())).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(BridgeError::Resource("r".into()).kind(), ErrorKind::Resource);
        assert!(BridgeError::Capacity("c".into()).is_retryable());
        assert!(!BridgeError::TransportClosed("t".into()).is_retryable());
    }

    #[test]
    fn test_inject_error_conversion() {
        let err = InjectError::Full.into_bridge_error("t1");
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert!(err.to_string().contains("t1"));

        let err = InjectError::Closed.into_bridge_error("t1");
        assert!(matches!(err, BridgeError::TransportClosed(ref id) if id == "t1"));
    }

    #[test]
    fn test_protocol_message_passes_through() {
        let err: BridgeError = ProtocolError::HandshakeFailed("bad auth".into()).into();
        assert_eq!(err.to_string(), "failed to establish SSH connection: bad auth");
    }
}
