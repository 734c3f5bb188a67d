//! Remote shell sessions.
//!
//! A session is created by connect, registered under its `ssh-<uuid>` ID
//! once the handshake succeeds, and removed again on disconnect.

pub mod client;

pub use client::{SessionClient, SessionSettings, SESSION_ID_PREFIX};
