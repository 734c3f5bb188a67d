//! Observer callbacks for traffic and state inspection.
//!
//! Callbacks are best effort: a panicking callback is caught and logged at the
//! call site, and never reaches the stream or session that triggered it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use protocol::{PacketMetadata, SessionState};

/// Callback receiving a copy of packet bytes and their metadata.
pub type PacketCallback = Arc<dyn Fn(Bytes, PacketMetadata) + Send + Sync>;

/// Callback receiving session state transitions.
pub type StateCallback = Arc<dyn Fn(SessionState) + Send + Sync>;

/// The set of callbacks registered for one session.
///
/// Every callback is optional; an absent callback means no notification is
/// built at all.
#[derive(Clone, Default)]
pub struct Observers {
    on_receive: Option<PacketCallback>,
    on_send: Option<PacketCallback>,
    on_state: Option<StateCallback>,
}

impl Observers {
    /// Creates an empty observer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the callback for received packets.
    pub fn on_packet_receive<F>(mut self, callback: F) -> Self
    where
        F: Fn(Bytes, PacketMetadata) + Send + Sync + 'static,
    {
        self.on_receive = Some(Arc::new(callback));
        self
    }

    /// Sets the callback for sent packets.
    pub fn on_packet_send<F>(mut self, callback: F) -> Self
    where
        F: Fn(Bytes, PacketMetadata) + Send + Sync + 'static,
    {
        self.on_send = Some(Arc::new(callback));
        self
    }

    /// Sets the callback for state changes.
    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        self.on_state = Some(Arc::new(callback));
        self
    }

    /// Returns true if a receive callback is registered.
    pub fn observes_receive(&self) -> bool {
        self.on_receive.is_some()
    }

    /// Returns true if a send callback is registered.
    pub fn observes_send(&self) -> bool {
        self.on_send.is_some()
    }

    /// Delivers a received packet.
    pub(crate) fn notify_receive(&self, data: Bytes, metadata: PacketMetadata) {
        if let Some(callback) = &self.on_receive {
            guarded("on_packet_receive", || callback(data, metadata));
        }
    }

    /// Delivers a sent packet.
    pub(crate) fn notify_send(&self, data: Bytes, metadata: PacketMetadata) {
        if let Some(callback) = &self.on_send {
            guarded("on_packet_send", || callback(data, metadata));
        }
    }

    /// Delivers a state transition.
    pub(crate) fn notify_state(&self, state: SessionState) {
        if let Some(callback) = &self.on_state {
            guarded("on_state_change", || callback(state));
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .field("on_state", &self.on_state.is_some())
            .finish()
    }
}

fn guarded(name: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(callback = name, "Observer callback panicked");
    }
}
