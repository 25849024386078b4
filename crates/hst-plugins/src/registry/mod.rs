//! Plugin registry for manifest storage and lookup.
//!
//! The [`PluginRegistry`] stores validated plugin manifests keyed by name.
//! Duplicate registrations for the same plugin name are rejected.

use std::collections::BTreeMap;

use crate::error::PluginError;
use crate::manifest::PluginManifest;

/// Registry of available plugin manifests, iterated in name order.
///
/// # Example
///
/// ```
/// use hst_plugins::{PluginManifest, PluginRegistry};
/// use std::path::PathBuf;
///
/// let mut registry = PluginRegistry::new();
/// let manifest = PluginManifest::new("filelister", PathBuf::from("/usr/bin/hst-filelister"));
/// registry.register(manifest).expect("registration succeeds");
/// assert!(registry.get("filelister").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    manifests: BTreeMap<String, PluginManifest>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin manifest after validation.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] if validation fails or if a plugin
    /// with the same name is already registered.
    pub fn register(&mut self, manifest: PluginManifest) -> Result<(), PluginError> {
        manifest.validate()?;
        let name = manifest.name().to_owned();
        if self.manifests.contains_key(&name) {
            return Err(PluginError::Manifest {
                message: format!("plugin '{name}' is already registered"),
            });
        }
        self.manifests.insert(name, manifest);
        Ok(())
    }

    /// Looks up a plugin by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PluginManifest> {
        self.manifests.get(name)
    }

    /// Iterates over the registered manifests in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginManifest> {
        self.manifests.values()
    }

    /// Returns the number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Returns `true` if no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}
