//! Host-fed transports.
//!
//! - [`adapter`]: turns chunks pushed by the host into a byte stream
//! - [`intercept`]: reports the traffic of any stream to observers

pub mod adapter;
pub mod intercept;

pub use adapter::{HostCallbacks, HostChannel, TransportAdapter, TransportStream};
pub use intercept::InterceptingStream;
