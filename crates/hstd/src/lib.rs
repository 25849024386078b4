//! The plugin host.
//!
//! `hstd` loads its configuration, installs structured telemetry, opens the
//! sandbox that host services are confined to, and then drives every
//! configured worker through one conversation:
//!
//! 1. launch the worker and complete the handshake;
//! 2. dispense the forward file-lister channel;
//! 3. establish host services on a freshly allocated reverse channel;
//! 4. ask the worker to list the configured directory, which it does by
//!    calling back into the host's sandboxed filesystem;
//! 5. disconnect host services and stop the worker.
//!
//! Each stage reports through a [`HealthReporter`] so failures are logged
//! with the plugin name and the stage that failed.

mod bootstrap;
mod health;
mod host;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use host::{Host, RunError, TERMINATE_GRACE};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};

#[cfg(test)]
mod tests;
