//! Structured health reporting for host lifecycle events.

use std::process::ExitStatus;
use std::sync::Arc;

use hst_config::Config;
use hst_plugins::PluginManifest;

use crate::bootstrap::BootstrapError;
use crate::host::RunError;

const HEALTH_TARGET: &str = "hstd::health";

/// Observer for lifecycle events of the host and its plugins.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked before a plugin process is launched.
    fn plugin_launching(&self, manifest: &PluginManifest);

    /// Invoked once a plugin has completed its handshake.
    fn plugin_ready(&self, plugin: &str, pid: u32, protocol_version: u32);

    /// Invoked when any stage of a plugin's run fails.
    fn plugin_failed(&self, plugin: &str, error: &RunError);

    /// Invoked after a plugin process has exited.
    fn plugin_stopped(&self, plugin: &str, status: ExitStatus);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn plugin_launching(&self, manifest: &PluginManifest) {
        (**self).plugin_launching(manifest);
    }

    fn plugin_ready(&self, plugin: &str, pid: u32, protocol_version: u32) {
        (**self).plugin_ready(plugin, pid, protocol_version);
    }

    fn plugin_failed(&self, plugin: &str, error: &RunError) {
        (**self).plugin_failed(plugin, error);
    }

    fn plugin_stopped(&self, plugin: &str, status: ExitStatus) {
        (**self).plugin_stopped(plugin, status);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting host bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            plugins = config.plugins().len(),
            sandbox_root = %config.sandbox_root().display(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "host bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "host bootstrap failed"
        );
    }

    fn plugin_launching(&self, manifest: &PluginManifest) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_launching",
            plugin = manifest.name(),
            executable = %manifest.executable().display(),
            "launching plugin"
        );
    }

    fn plugin_ready(&self, plugin: &str, pid: u32, protocol_version: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_ready",
            plugin,
            pid,
            protocol_version,
            "plugin ready"
        );
    }

    fn plugin_failed(&self, plugin: &str, error: &RunError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "plugin_failed",
            plugin,
            stage = error.stage(),
            error = %error,
            "plugin run failed"
        );
    }

    fn plugin_stopped(&self, plugin: &str, status: ExitStatus) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_stopped",
            plugin,
            %status,
            "plugin stopped"
        );
    }
}
