//! Host bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use hst_config::{Config, ConfigError};
use hst_hostserve::{HostCapabilities, HostServiceError, Sandbox};
use hst_plugins::{
    HostServiceRegistry, PluginError, PluginLauncher, PluginManifest, PluginRegistry,
    handshake_config,
};

use crate::health::HealthReporter;
use crate::host::Host;
use crate::telemetry::{self, TelemetryError};

/// Abstracts configuration loading so bootstrap can run against fixtures.
pub trait ConfigLoader: Send + Sync {
    /// Loads the host configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's aggregated error when any layer is malformed.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that reads defaults, files, environment and the process arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but holds unusable values.
    #[error("invalid configuration: {source}")]
    InvalidConfiguration {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The sandbox root could not be opened.
    #[error("failed to open sandbox: {source}")]
    Sandbox {
        /// Filesystem error from the sandbox.
        #[source]
        source: HostServiceError,
    },
    /// A configured plugin could not be registered.
    #[error("failed to register plugin: {source}")]
    Plugin {
        /// Manifest or registry failure.
        #[source]
        source: PluginError,
    },
}

/// Bootstraps the host using the supplied collaborators.
///
/// Loads and validates the configuration, installs telemetry, opens the
/// sandbox and registers one manifest per configured worker executable.
///
/// # Errors
///
/// Returns the [`BootstrapError`] for the first stage that fails; the
/// reporter is told about it before this returns.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Host, BootstrapError> {
    reporter.bootstrap_starting();
    let (config, plugins, services) =
        prepare(loader).inspect_err(|error| reporter.bootstrap_failed(error))?;
    reporter.bootstrap_succeeded(&config);
    let launcher =
        PluginLauncher::new(handshake_config()).with_handshake_timeout(config.handshake_timeout());
    Ok(Host::new(config, plugins, services, launcher, reporter))
}

fn prepare(
    loader: &dyn ConfigLoader,
) -> Result<(Config, PluginRegistry, HostServiceRegistry), BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    config
        .validate()
        .map_err(|source| BootstrapError::InvalidConfiguration { source })?;
    telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    let sandbox =
        Sandbox::open(config.sandbox_root()).map_err(|source| BootstrapError::Sandbox { source })?;
    let services = HostServiceRegistry::new(Arc::new(HostCapabilities::new(sandbox)));
    let plugins = register_plugins(&config)?;
    Ok((config, plugins, services))
}

fn register_plugins(config: &Config) -> Result<PluginRegistry, BootstrapError> {
    let timeout_secs = config.call_timeout().as_secs().max(1);
    let mut registry = PluginRegistry::new();
    for path in config.plugins() {
        let manifest = PluginManifest::for_executable(path.clone()).with_timeout_secs(timeout_secs);
        registry
            .register(manifest)
            .map_err(|source| BootstrapError::Plugin { source })?;
    }
    Ok(registry)
}
