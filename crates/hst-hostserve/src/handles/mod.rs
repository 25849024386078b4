//! Per-client tables of open operating system resources.
//!
//! Handles are keyed by `(ClientId, FileHandle)`, so a client can only
//! reach its own handles, and [`HandleTable::release_client`] drops every
//! resource a client still holds when its connection ends.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::ids::{ClientId, FileHandle};

#[cfg(test)]
mod tests;

/// Table of open files.
pub type OpenFiles = HandleTable<std::fs::File>;

/// Shared slot holding one open resource.
pub type HandleSlot<T> = Arc<Mutex<T>>;

/// Resources owned by clients, addressed by handle.
pub struct HandleTable<T> {
    next: AtomicU64,
    entries: RwLock<HashMap<(ClientId, FileHandle), HandleSlot<T>>>,
}

impl<T> HandleTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Stores `resource` for `owner` and returns its new handle.
    pub fn insert(&self, owner: ClientId, resource: T) -> FileHandle {
        let handle = FileHandle::new(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((owner, handle), Arc::new(Mutex::new(resource)));
        handle
    }

    /// Looks up a handle owned by `owner`.
    #[must_use]
    pub fn get(&self, owner: ClientId, handle: FileHandle) -> Option<HandleSlot<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(owner, handle))
            .cloned()
    }

    /// Removes one handle; returns `false` if it was not open.
    pub fn remove(&self, owner: ClientId, handle: FileHandle) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(owner, handle))
            .is_some()
    }

    /// Drops every handle owned by `owner`, returning how many were open.
    pub fn release_client(&self, owner: ClientId) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(client, _), _| *client != owner);
        before.saturating_sub(entries.len())
    }

    /// Returns the number of open handles across all clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` when no handle is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("open", &self.len())
            .finish_non_exhaustive()
    }
}
