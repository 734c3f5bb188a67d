//! Concurrent id-to-object registries.
//!
//! A registry only makes objects discoverable by id. Removing an entry does
//! not close or release the object; callers do that themselves.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::session::SessionClient;
use crate::transport::TransportAdapter;

/// Registry of live transports keyed by transport ID.
pub type TransportRegistry = Registry<TransportAdapter>;

/// Registry of connected sessions keyed by session ID.
pub type SessionRegistry = Registry<SessionClient>;

/// Thread-safe map from id to shared object, backed by a `DashMap`.
pub struct Registry<T> {
    entries: DashMap<String, Arc<T>>,
}

impl<T> Registry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Stores `value` under `id`, replacing any previous entry.
    pub fn register(&self, id: impl Into<String>, value: Arc<T>) {
        self.entries.insert(id.into(), value);
    }

    /// Stores `value` under `id` only if the id is free.
    ///
    /// Returns false and leaves the registry unchanged if the id is taken.
    pub fn register_new(&self, id: impl Into<String>, value: Arc<T>) -> bool {
        match self.entries.entry(id.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Looks up an entry.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns true if `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Removes an entry, returning it if it was present.
    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.entries.remove(id).map(|(_, value)| value)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the registered ids in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.entries.len())
            .finish()
    }
}
