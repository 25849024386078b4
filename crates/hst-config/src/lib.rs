//! Layered configuration for the plugin host.
//!
//! Values resolve from built-in defaults, an optional TOML file
//! (`--config-path`), `HST_*` environment variables and command-line flags,
//! with later layers winning.

mod defaults;
mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_LOG_FILTER,
    default_call_timeout_ms, default_handshake_timeout_ms, default_list_dir, default_log_filter,
    default_log_filter_string, default_log_format, default_sandbox_root,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(prefix = "HST")]
pub struct Config {
    /// Tracing filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for host logs.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Absolute paths of the worker executables to launch.
    #[ortho_config(merge_strategy = "append")]
    pub plugins: Vec<PathBuf>,
    /// Directory the host filesystem services are confined to.
    #[ortho_config(default = defaults::default_sandbox_root())]
    pub sandbox_root: PathBuf,
    /// Directory passed to each worker's `list` call.
    #[ortho_config(default = defaults::default_list_dir())]
    pub list_dir: String,
    /// Time allowed for a worker to complete the handshake.
    #[ortho_config(default = defaults::DEFAULT_HANDSHAKE_TIMEOUT_MS)]
    pub handshake_timeout_ms: u64,
    /// Deadline applied to every forward call.
    #[ortho_config(default = defaults::DEFAULT_CALL_TIMEOUT_MS)]
    pub call_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            plugins: Vec::new(),
            sandbox_root: default_sandbox_root(),
            list_dir: default_list_dir(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

/// Semantic problems found in an otherwise well-formed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A timeout was configured as zero.
    #[error("{field} must be greater than zero")]
    ZeroTimeout {
        /// Name of the offending field.
        field: &'static str,
    },
    /// A plugin path is not absolute.
    #[error("plugin path {} must be absolute", path.display())]
    RelativePluginPath {
        /// The rejected path.
        path: PathBuf,
    },
}

impl Config {
    /// Returns the configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the worker executables to launch.
    #[must_use]
    pub fn plugins(&self) -> &[PathBuf] {
        &self.plugins
    }

    /// Returns the sandbox root for host filesystem services.
    #[must_use]
    pub fn sandbox_root(&self) -> &Path {
        &self.sandbox_root
    }

    /// Returns the directory each worker is asked to list.
    #[must_use]
    pub fn list_dir(&self) -> &str {
        &self.list_dir
    }

    /// Returns the handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Returns the forward call timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Checks the values the loader cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for zero timeouts or relative plugin paths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "handshake_timeout_ms",
            });
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "call_timeout_ms",
            });
        }
        if let Some(path) = self.plugins.iter().find(|path| !path.is_absolute()) {
            return Err(ConfigError::RelativePluginPath { path: path.clone() });
        }
        Ok(())
    }
}
