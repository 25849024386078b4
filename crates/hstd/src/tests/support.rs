//! Shared fixtures for the host test suites.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Mutex;

use tempfile::TempDir;

use hst_config::Config;
use hst_plugins::PluginManifest;

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::host::RunError;

/// Prints a valid hello using the handshake values the host exports.
pub const GOOD_HELLO: &str = r#"printf '{"protocol_version":%s,"cookie":"%s","capabilities":["host_services"]}\n' "$HST_PLUGIN_PROTOCOL_VERSION" "$HST_PLUGIN_MAGIC_COOKIE""#;

/// Structured health events tracked during tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    PluginLaunching(String),
    PluginReady(String),
    PluginFailed { plugin: String, stage: &'static str },
    PluginStopped(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events.lock().expect("reporter mutex poisoned").clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn plugin_launching(&self, manifest: &PluginManifest) {
        self.record(HealthEvent::PluginLaunching(manifest.name().to_owned()));
    }

    fn plugin_ready(&self, plugin: &str, _pid: u32, _protocol_version: u32) {
        self.record(HealthEvent::PluginReady(plugin.to_owned()));
    }

    fn plugin_failed(&self, plugin: &str, error: &RunError) {
        self.record(HealthEvent::PluginFailed {
            plugin: plugin.to_owned(),
            stage: error.stage(),
        });
    }

    fn plugin_stopped(&self, plugin: &str, _status: ExitStatus) {
        self.record(HealthEvent::PluginStopped(plugin.to_owned()));
    }
}

/// Scratch space holding a sandbox root and worker scripts.
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir(dir.path().join("root")).expect("sandbox root");
        Self { dir }
    }

    pub fn sandbox_root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    /// Writes an executable shell script named `name`.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path
    }

    /// A configuration with short timeouts, confined to the scratch root.
    pub fn config(&self, plugins: Vec<PathBuf>) -> Config {
        Config {
            plugins,
            sandbox_root: self.sandbox_root(),
            handshake_timeout_ms: 2_000,
            log_filter: "warn".to_owned(),
            ..Config::default()
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
