//! Entry point for the plugin host.

use std::fmt::Display;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use hstd::{StructuredHealthReporter, SystemConfigLoader, bootstrap_with};

fn main() -> ExitCode {
    let reporter = Arc::new(StructuredHealthReporter::new());
    let host = match bootstrap_with(&SystemConfigLoader, reporter) {
        Ok(host) => host,
        Err(error) => {
            // Telemetry may not be installed yet, so say it on stderr too.
            report(&error);
            return ExitCode::FAILURE;
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    host.run(&mut out)
        .map_or(ExitCode::FAILURE, |()| ExitCode::SUCCESS)
}

fn report(error: &dyn Display) {
    let mut stderr = io::stderr().lock();
    if let Err(write_error) = writeln!(stderr, "hstd: {error}") {
        tracing::debug!(error = %write_error, "failed to write to stderr");
    }
}
