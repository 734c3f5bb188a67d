//! # ShellBridge Engine
//!
//! This crate drives secure remote shell sessions over byte channels that
//! are owned by a host environment, such as a browser tab holding a
//! WebSocket or a native relay.
//!
//! ## Overview
//!
//! The host pushes received bytes in and takes written bytes out; the
//! secure-shell collaborator sees an ordinary stream. On top of that the
//! engine provides:
//!
//! - **Transports**: host-fed streams with bounded inbound queues
//! - **Traffic Observation**: best-effort copies of every byte sent and received
//! - **Sessions**: handshake, lazy shell start, input and output forwarding,
//!   terminal resize and teardown
//! - **Registries**: lookup of transports and sessions by ID
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ShellBridge                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────┐          ┌───────────────────────┐   │
//! │  │ TransportRegistry │          │    SessionRegistry    │   │
//! │  └─────────┬─────────┘          └───────────┬───────────┘   │
//! │            │                                │               │
//! │  ┌─────────▼─────────┐   wraps   ┌──────────▼───────────┐   │
//! │  │ TransportAdapter  │◄──────────┤    SessionClient     │   │
//! │  └─────────┬─────────┘  (via     └──────────┬───────────┘   │
//! │            │       InterceptingStream)      │               │
//! │      HostChannel                 SecureShellConnector       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bridge::{HostCallbacks, Observers, ShellBridge};
//! use protocol::{ConnectionOptions, SecureShellConnector};
//!
//! async fn run(connector: Arc<dyn SecureShellConnector>) -> bridge::Result<()> {
//!     let bridge = ShellBridge::new(connector);
//!
//!     // Outbound bytes go wherever the host sends them
//!     bridge.create_transport("tab-1", HostCallbacks::new().on_write(|_bytes| Ok(())))?;
//!
//!     let observers = Observers::new()
//!         .on_packet_receive(|data, _meta| print!("{}", String::from_utf8_lossy(&data)));
//!     let session = bridge
//!         .connect(
//!             ConnectionOptions::new("example.com", 22, "root").password("secret"),
//!             "tab-1",
//!             observers,
//!         )
//!         .await?;
//!
//!     // Bytes received by the host are fed back in
//!     bridge.inject_transport_data("tab-1", &b"..."[..])?;
//!
//!     session.send(&b"uname -a\n"[..]).await?;
//!     session.disconnect().await?;
//!     bridge.close_transport("tab-1")
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`transport`]: Host-fed transports and traffic interception
//! - [`observer`]: Packet and state callbacks
//! - [`session`]: Remote shell session lifecycle
//! - [`registry`]: Concurrent ID lookup
//! - [`bridge`]: Top-level manager
//! - [`host`]: Native host integrations (WebSocket, secure tunnel)
//! - [`logging`]: Tracing subscriber setup

pub mod bridge;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod observer;
pub mod registry;
pub mod session;
pub mod transport;

/// Crate version reported by [`ShellBridge::version`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::BridgeConfig;

// Re-export error types for convenience
pub use error::{BridgeError, ErrorKind, InjectError, Result};

// Re-export transport types for convenience
pub use transport::{HostCallbacks, HostChannel, InterceptingStream, TransportAdapter, TransportStream};

// Re-export session types for convenience
pub use observer::Observers;
pub use session::{SessionClient, SessionSettings};

// Re-export registry and bridge types for convenience
pub use bridge::{SessionHandle, ShellBridge};
pub use registry::{Registry, SessionRegistry, TransportRegistry};

pub use host::{SecureTunnelConfig, SecureTunnelTransport, TunnelMode, WebSocketTransport};
