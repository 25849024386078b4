//! Runs every configured plugin through launch, listing and teardown.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use hst_broker::CallContext;
use hst_config::Config;
use hst_plugins::{
    EstablishError, ForwardCallError, HostServiceRegistry, PluginError, PluginLauncher,
    PluginManifest, PluginRegistry, PluginSession,
};

use crate::health::HealthReporter;

const HOST_TARGET: &str = "hstd::host";

/// Time a worker gets to exit on its own once the host hangs up.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// A failure while running one plugin, tagged with the stage that failed.
#[derive(Debug, Error)]
pub enum RunError {
    /// The worker could not be started or failed the handshake.
    #[error("plugin '{plugin}' failed to launch: {source}")]
    Launch {
        /// Plugin name.
        plugin: String,
        /// Launcher failure.
        #[source]
        source: PluginError,
    },
    /// The forward control channel could not be opened.
    #[error("plugin '{plugin}' could not be dispensed: {source}")]
    Dispense {
        /// Plugin name.
        plugin: String,
        /// Session failure.
        #[source]
        source: PluginError,
    },
    /// Host services could not be established for the worker.
    #[error("plugin '{plugin}' could not reach host services: {source}")]
    Establish {
        /// Plugin name.
        plugin: String,
        /// Establishment failure.
        #[source]
        source: EstablishError,
    },
    /// The listing call failed.
    #[error("plugin '{plugin}' failed to list: {source}")]
    List {
        /// Plugin name.
        plugin: String,
        /// Forward call failure.
        #[source]
        source: ForwardCallError,
    },
    /// The listing could not be written out.
    #[error("failed to write listing of plugin '{plugin}': {source}")]
    Output {
        /// Plugin name.
        plugin: String,
        /// Write failure.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl RunError {
    /// Names the stage that failed, for logs.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Launch {
                source: PluginError::Handshake { .. },
                ..
            } => "handshake",
            Self::Launch { .. } => "launch",
            Self::Dispense { .. } => "dispense",
            Self::Establish { .. } => "establish",
            Self::List { .. } => "list",
            Self::Output { .. } => "output",
        }
    }

    /// Returns the name of the plugin that failed.
    #[must_use]
    pub fn plugin(&self) -> &str {
        match self {
            Self::Launch { plugin, .. }
            | Self::Dispense { plugin, .. }
            | Self::Establish { plugin, .. }
            | Self::List { plugin, .. }
            | Self::Output { plugin, .. } => plugin,
        }
    }
}

/// A bootstrapped host, ready to drive its plugins.
pub struct Host {
    config: Config,
    plugins: PluginRegistry,
    services: HostServiceRegistry,
    launcher: PluginLauncher,
    reporter: Arc<dyn HealthReporter>,
}

impl Host {
    pub(crate) fn new(
        config: Config,
        plugins: PluginRegistry,
        services: HostServiceRegistry,
        launcher: PluginLauncher,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            config,
            plugins,
            services,
            launcher,
            reporter,
        }
    }

    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the registered plugins.
    #[must_use]
    pub const fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Accessor for the host-service registry.
    #[must_use]
    pub const fn services(&self) -> &HostServiceRegistry {
        &self.services
    }

    /// Runs each registered plugin in turn, writing its listing to `out`
    /// one entry per line.
    ///
    /// Stops at the first plugin that fails; that worker is still stopped
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns the first [`RunError`], after reporting it.
    pub fn run(&self, out: &mut dyn Write) -> Result<(), RunError> {
        for manifest in self.plugins.iter() {
            self.run_plugin(manifest, out)
                .inspect_err(|error| self.reporter.plugin_failed(manifest.name(), error))?;
        }
        Ok(())
    }

    fn run_plugin(&self, manifest: &PluginManifest, out: &mut dyn Write) -> Result<(), RunError> {
        let plugin = manifest.name();
        self.reporter.plugin_launching(manifest);
        let session = self
            .launcher
            .launch(manifest)
            .map_err(|source| RunError::Launch {
                plugin: plugin.to_owned(),
                source,
            })?;
        self.reporter
            .plugin_ready(plugin, session.pid(), session.protocol_version());

        let outcome = self.converse(plugin, &session, out);
        session.terminate(TERMINATE_GRACE).map_or_else(
            |error| warn!(target: HOST_TARGET, plugin, error = %error, "failed to stop plugin"),
            |status| self.reporter.plugin_stopped(plugin, status),
        );
        outcome
    }

    fn converse(
        &self,
        plugin: &str,
        session: &PluginSession,
        out: &mut dyn Write,
    ) -> Result<(), RunError> {
        let lister = session.dispense().map_err(|source| RunError::Dispense {
            plugin: plugin.to_owned(),
            source,
        })?;
        let ctx = CallContext::with_timeout(self.config.call_timeout());
        let client = self
            .services
            .establish(&ctx, session, &lister)
            .map_err(|source| RunError::Establish {
                plugin: plugin.to_owned(),
                source,
            })?;

        let listed = lister.list(&ctx, self.config.list_dir());
        self.services.disconnect(&ctx, session, &lister, client);
        lister.close();

        let entries = listed.map_err(|source| RunError::List {
            plugin: plugin.to_owned(),
            source,
        })?;
        debug!(target: HOST_TARGET, plugin, entries = entries.len(), "listing received");
        write_listing(out, &entries).map_err(|source| RunError::Output {
            plugin: plugin.to_owned(),
            source: Arc::new(source),
        })
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

fn write_listing(out: &mut dyn Write, entries: &[String]) -> std::io::Result<()> {
    for entry in entries {
        writeln!(out, "{entry}")?;
    }
    out.flush()
}
