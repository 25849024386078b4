//! Registry of live reverse connections.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::RegistryError;
use crate::ids::ClientId;


const CLIENTS_TARGET: &str = "hst_hostserve::clients";

/// Maps each live [`ClientId`] to a label naming its owner.
///
/// Lookups share a read lock; registration and removal take the write lock.
#[derive(Debug, Default)]
pub struct ActiveClients {
    entries: RwLock<HashMap<ClientId, String>>,
}

impl ActiveClients {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `client_id` as owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateClient`] if the identifier is
    /// already registered. The existing owner is left untouched.
    pub fn add(&self, client_id: ClientId, owner: impl Into<String>) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&client_id) {
            return Err(RegistryError::DuplicateClient {
                client_id,
                owner: existing.clone(),
            });
        }
        let label = owner.into();
        debug!(target: CLIENTS_TARGET, %client_id, owner = %label, "client registered");
        entries.insert(client_id, label);
        Ok(())
    }

    /// Returns the owner label of `client_id`.
    #[must_use]
    pub fn owner(&self, client_id: ClientId) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client_id)
            .cloned()
    }

    /// Returns `true` if `client_id` is registered.
    #[must_use]
    pub fn contains(&self, client_id: ClientId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&client_id)
    }

    /// Removes `client_id`, returning its owner if it was registered.
    ///
    /// Removing an unknown identifier is not an error.
    pub fn remove(&self, client_id: ClientId) -> Option<String> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&client_id);
        if removed.is_some() {
            debug!(target: CLIENTS_TARGET, %client_id, "client removed");
        }
        removed
    }

    /// Returns the number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` when no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
