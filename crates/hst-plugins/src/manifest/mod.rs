//! Plugin manifest types describing how to launch a worker.
//!
//! A [`PluginManifest`] declares everything the host needs to start a
//! plugin: its name, executable path, arguments, and the time budget for
//! each forward call. Manifests are validated before registration to reject
//! obviously invalid configurations early.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Default timeout in seconds for each call into a plugin.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Declarative description of a plugin worker.
///
/// # Example
///
/// ```
/// use hst_plugins::PluginManifest;
/// use std::path::PathBuf;
///
/// let manifest = PluginManifest::new("filelister", PathBuf::from("/usr/bin/hst-filelister"));
///
/// assert_eq!(manifest.name(), "filelister");
/// assert_eq!(manifest.timeout_secs(), 30);
/// assert!(manifest.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    name: String,
    executable: PathBuf,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl PluginManifest {
    /// Creates a manifest with the default timeout and no extra arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, executable: PathBuf) -> Self {
        Self {
            name: name.into(),
            executable,
            args: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Derives a manifest from an executable path, naming the plugin after
    /// the file stem.
    ///
    /// # Example
    ///
    /// ```
    /// use hst_plugins::PluginManifest;
    /// use std::path::PathBuf;
    ///
    /// let manifest = PluginManifest::for_executable(PathBuf::from("/opt/hst/lister"));
    /// assert_eq!(manifest.name(), "lister");
    /// ```
    #[must_use]
    pub fn for_executable(executable: PathBuf) -> Self {
        let name = executable
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(name, executable)
    }

    /// Sets the arguments passed to the plugin executable.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Overrides the default timeout.
    #[must_use]
    pub const fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Validates the manifest, returning an error if it is malformed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] if the name is empty, the
    /// executable path is not absolute, or the timeout is zero.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::Manifest {
                message: String::from("plugin name must not be empty"),
            });
        }
        if !self.executable.is_absolute() {
            return Err(PluginError::Manifest {
                message: format!(
                    "plugin executable must be an absolute path, got '{}'",
                    self.executable.display()
                ),
            });
        }
        if self.timeout_secs == 0 {
            return Err(PluginError::Manifest {
                message: format!("plugin '{}' must have a non-zero timeout", self.name),
            });
        }
        Ok(())
    }

    /// Returns the plugin name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the absolute path to the plugin executable.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Returns the executable arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the timeout in seconds.
    #[must_use]
    pub const fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Returns the timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests;
