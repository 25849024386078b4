//! Entry point for the file-lister worker.
//!
//! Launched by the host with the handshake cookie in its environment. Stdout
//! carries the session, so logs go to stderr where the host collects them.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use hst_plugin_filelister::HostFileLister;
use hst_plugins::{Worker, handshake_config};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the worker's log filter.
const LOG_ENV: &str = "HST_PLUGIN_LOG";

fn main() -> ExitCode {
    init_logging();
    match Worker::new(handshake_config()).run(Arc::new(HostFileLister)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "worker stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .without_time()
        .compact()
        .try_init();
    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}
