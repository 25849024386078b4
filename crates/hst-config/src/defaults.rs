//! Default values shared by the configuration layers.

use std::path::PathBuf;

use crate::LogFormat;

/// Default tracing filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default time allowed for a worker to print its hello line.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Default deadline applied to forward and reverse calls.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Returns the default log filter.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Returns the default log filter as an owned string for serde defaults.
#[must_use]
pub fn default_log_filter_string() -> String {
    String::from(DEFAULT_LOG_FILTER)
}

/// Returns the default log format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Returns the default sandbox root: the working directory.
#[must_use]
pub fn default_sandbox_root() -> PathBuf {
    PathBuf::from(".")
}

/// Returns the default directory handed to each worker's `list` call.
#[must_use]
pub fn default_list_dir() -> String {
    String::from(".")
}

/// Returns the default handshake timeout in milliseconds.
#[must_use]
pub const fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

/// Returns the default call timeout in milliseconds.
#[must_use]
pub const fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}
