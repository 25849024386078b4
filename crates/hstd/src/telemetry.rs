//! Tracing setup for the host.
//!
//! Listings own stdout, so every record goes to stderr. The JSON format
//! flattens event fields, which puts `plugin`, `channel`, `client_id` and
//! `request_id` at the top level of each line where a log shipper can index
//! them.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::EnvFilter;

use hst_config::{Config, LogFormat};

static INSTALLED: OnceCell<TelemetryHandle> = OnceCell::new();

/// The settings the global subscriber was installed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryHandle {
    filter: String,
    format: LogFormat,
}

impl TelemetryHandle {
    /// Filter directives in force.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Output format in force.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter does not parse.
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        /// Directives as configured.
        filter: String,
        /// Parser failure.
        #[source]
        source: ParseError,
    },
    /// Another subscriber already owns the process.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// The first successful call wins: later calls return the settings it
/// installed, even when `config` asks for something else.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable filter and
/// [`TelemetryError::Subscriber`] if a subscriber was installed elsewhere.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| {
            let subscriber = subscriber(config, io::stderr, io::stderr().is_terminal())?;
            tracing::subscriber::set_global_default(subscriber)
                .map_err(TelemetryError::Subscriber)?;
            Ok(TelemetryHandle {
                filter: config.log_filter().to_owned(),
                format: config.log_format(),
            })
        })
        .cloned()
}

/// Builds the subscriber `config` describes, writing through `writer`.
pub(crate) fn subscriber<W>(
    config: &Config,
    writer: W,
    ansi: bool,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(config.log_filter()).map_err(|source| {
        TelemetryError::Filter {
            filter: config.log_filter().to_owned(),
            source,
        }
    })?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    Ok(match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    })
}
