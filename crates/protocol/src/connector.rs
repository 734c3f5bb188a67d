//! Contract for the external secure-shell collaborator.
//!
//! The collaborator performs the handshake, key exchange, encryption and
//! channel multiplexing over a [`Transport`](crate::transport::Transport).
//! This crate never implements it; the engine only drives these traits.
//!
//! ```text
//! SecureShellConnector::handshake(transport, params)
//!     └── SecureConnection
//!           ├── open_session() ──► ShellSession
//!           │                        ├── take_pipes()   stdin / stdout / stderr
//!           │                        ├── request_pty()
//!           │                        ├── start_shell()
//!           │                        ├── window_change()
//!           │                        └── close()
//!           └── close()
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::credentials::Credentials;
use crate::error::Result;
use crate::transport::BoxedTransport;

/// Boxed future returned by collaborator operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Terminal type requested for interactive shells.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Default terminal height.
pub const DEFAULT_ROWS: u32 = 24;

/// Default terminal width.
pub const DEFAULT_COLS: u32 = 80;

/// Default input/output line speed in baud.
pub const DEFAULT_LINE_SPEED: u32 = 14_400;

/// Everything the collaborator needs to authenticate.
#[derive(Debug, Clone)]
pub struct HandshakeParams {
    /// Login user.
    pub user: String,
    /// Remote host name.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Authentication material.
    pub credentials: Credentials,
    /// Handshake timeout, `None` for no limit.
    pub timeout: Option<Duration>,
}

/// Terminal mode opcodes from RFC 4254 section 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalMode {
    /// Enable echoing.
    Echo,
    /// Input baud rate.
    InputSpeed,
    /// Output baud rate.
    OutputSpeed,
}

impl TerminalMode {
    /// Returns the wire opcode.
    pub fn opcode(&self) -> u8 {
        match self {
            TerminalMode::Echo => 53,
            TerminalMode::InputSpeed => 128,
            TerminalMode::OutputSpeed => 129,
        }
    }
}

/// A pseudo-terminal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Terminal type, e.g. `xterm-256color`.
    pub term: String,
    /// Height in rows.
    pub rows: u32,
    /// Width in columns.
    pub cols: u32,
    /// Encoded terminal modes.
    pub modes: Vec<(TerminalMode, u32)>,
}

impl PtyRequest {
    /// Creates a request with echo enabled and the default line speeds.
    pub fn new(term: impl Into<String>, rows: u32, cols: u32) -> Self {
        Self {
            term: term.into(),
            rows,
            cols,
            modes: vec![
                (TerminalMode::Echo, 1),
                (TerminalMode::InputSpeed, DEFAULT_LINE_SPEED),
                (TerminalMode::OutputSpeed, DEFAULT_LINE_SPEED),
            ],
        }
    }
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self::new(DEFAULT_TERM, DEFAULT_ROWS, DEFAULT_COLS)
    }
}

/// The three standard streams of a remote shell.
pub struct ShellPipes {
    /// Remote standard input.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Remote standard output.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Remote standard error.
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for ShellPipes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellPipes").finish_non_exhaustive()
    }
}

/// Establishes authenticated connections over caller-supplied transports.
pub trait SecureShellConnector: Send + Sync {
    /// Runs the handshake over `transport`. The transport is owned by the
    /// returned connection for its lifetime.
    fn handshake(
        &self,
        transport: BoxedTransport,
        params: HandshakeParams,
    ) -> BoxFuture<'_, Result<Box<dyn SecureConnection>>>;
}

/// An authenticated connection.
pub trait SecureConnection: Send + Sync {
    /// Opens a new session channel.
    fn open_session(&self) -> BoxFuture<'_, Result<Box<dyn ShellSession>>>;

    /// Closes the connection and its transport.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// A session channel on a [`SecureConnection`].
pub trait ShellSession: Send + Sync {
    /// Hands out the standard streams. Succeeds once.
    fn take_pipes(&mut self) -> Result<ShellPipes>;

    /// Requests a pseudo-terminal.
    fn request_pty<'a>(&'a self, request: &'a PtyRequest) -> BoxFuture<'a, Result<()>>;

    /// Starts the login shell.
    fn start_shell(&self) -> BoxFuture<'_, Result<()>>;

    /// Notifies the remote end of a terminal size change.
    fn window_change(&self, rows: u32, cols: u32) -> BoxFuture<'_, Result<()>>;

    /// Closes the channel.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pty_request() {
        let request = PtyRequest::default();
        assert_eq!(request.term, "xterm-256color");
        assert_eq!((request.rows, request.cols), (24, 80));
        assert!(request.modes.contains(&(TerminalMode::Echo, 1)));
        assert!(request.modes.contains(&(TerminalMode::OutputSpeed, 14_400)));
    }

    #[test]
    fn test_terminal_mode_opcodes() {
        assert_eq!(TerminalMode::Echo.opcode(), 53);
        assert_eq!(TerminalMode::InputSpeed.opcode(), 128);
        assert_eq!(TerminalMode::OutputSpeed.opcode(), 129);
    }
}
