//! Native host integrations.

pub mod secure_tunnel;
pub mod websocket;

pub use secure_tunnel::{SecureTunnelConfig, SecureTunnelTransport, TunnelMode};
pub use websocket::WebSocketTransport;
