//! # ShellBridge Protocol Library
//!
//! Shared types and contracts for ShellBridge, which drives a secure remote
//! shell over a byte channel supplied by a host environment such as a
//! browser.
//!
//! ## Overview
//!
//! This crate holds everything that sits on a boundary:
//!
//! - **Messages**: connection options, packet metadata and session states as
//!   the host sees them
//! - **Credentials**: password and private key material, with structural
//!   key parsing
//! - **Transport**: the stream contract the secure-shell engine reads and
//!   writes
//! - **Connector**: the contract of the external secure-shell collaborator
//! - **Tunnel**: wire messages and framing of the secure tunneling protocol
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Host (callbacks, chunks)         │
//! ├─────────────────────────────────────────┤
//! │   bridge: sessions, registries, taps    │
//! ├─────────────────────────────────────────┤
//! │  SecureShellConnector (collaborator)    │  handshake, channels
//! ├─────────────────────────────────────────┤
//! │         Transport (byte stream)         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: host-facing value types
//! - [`credentials`]: authentication material
//! - [`transport`]: stream contract
//! - [`connector`]: collaborator contract
//! - [`tunnel`]: secure tunneling messages and frame codec
//! - [`error`]: error types

pub mod connector;
pub mod credentials;
pub mod error;
pub mod messages;
pub mod transport;
pub mod tunnel;

pub use connector::{
    BoxFuture, HandshakeParams, PtyRequest, SecureConnection, SecureShellConnector, ShellPipes,
    ShellSession, TerminalMode, DEFAULT_COLS, DEFAULT_LINE_SPEED, DEFAULT_ROWS, DEFAULT_TERM,
};
pub use credentials::{Credentials, KeyFormat, PrivateKey};
pub use error::{ProtocolError, Result};
pub use messages::{ConnectionOptions, Direction, PacketKind, PacketMetadata, SessionState};
pub use transport::{BoxedTransport, Transport, TransportAddr};
pub use tunnel::{FrameDecoder, MessageType, ProtocolVersion, TunnelMessage};
