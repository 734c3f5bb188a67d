//! Byte-stream contract handed to the secure-shell collaborator.

use std::io;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};

/// Address of one end of a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportAddr {
    network: String,
    address: String,
}

impl TransportAddr {
    /// Creates an address on the given network.
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
        }
    }

    /// Returns the network name, e.g. `js`.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Returns the address within the network.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl std::fmt::Display for TransportAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address)
    }
}

/// A bidirectional byte stream with connection-style metadata.
///
/// Reads and writes follow the tokio I/O traits; `poll_shutdown` closes the
/// stream. Deadlines are advisory: an implementation may accept and ignore
/// them.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {
    /// Returns the local address.
    fn local_addr(&self) -> TransportAddr;

    /// Returns the remote address.
    fn remote_addr(&self) -> TransportAddr;

    /// Sets the read and write deadlines.
    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    /// Sets the read deadline.
    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    /// Sets the write deadline.
    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;
}

/// Owned, type-erased transport.
pub type BoxedTransport = Box<dyn Transport>;

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn local_addr(&self) -> TransportAddr {
        (**self).local_addr()
    }

    fn remote_addr(&self) -> TransportAddr {
        (**self).remote_addr()
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        (**self).set_deadline(deadline)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        (**self).set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        (**self).set_write_deadline(deadline)
    }
}
