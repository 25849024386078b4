//! Logging-related configuration types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported log output formats for the host.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Emits newline-delimited JSON records.
    #[default]
    Json,
    /// Emits compact human-readable records.
    Compact,
}

/// Error raised when a textual log format cannot be parsed.
pub type LogFormatParseError = strum::ParseError;
