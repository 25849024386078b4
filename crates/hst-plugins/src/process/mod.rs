//! Launching plugin workers as child processes.
//!
//! [`PluginLauncher`] spawns the executable named by a [`PluginManifest`]
//! with the handshake cookie and protocol version in its environment and
//! stdin, stdout and stderr piped. It then waits, bounded by the handshake
//! timeout, for the worker's hello line on stdout. Any failure at this
//! stage kills the process: a session is only handed out once the worker
//! has proven it speaks the same protocol.
//!
//! Once the hello is accepted, stdout carries broker frames and stdin
//! carries the host's frames. Stderr is drained on a background thread and
//! every line is re-emitted through `tracing`, tagged with the plugin name.

use std::io::{self, BufRead, BufReader};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use hst_broker::handshake::read_hello;
use hst_broker::{
    Broker, BrokerConfig, Capability, HandshakeConfig, HandshakeError, Hello, Role,
};
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::manifest::PluginManifest;
use crate::session::PluginSession;


/// Tracing target for plugin process operations.
const PLUGIN_TARGET: &str = "hst_plugins::process";

/// Tracing target for lines a worker writes to stderr.
pub const WORKER_LOG_TARGET: &str = "hst_plugins::worker_stderr";

/// Default bound on the wait for a worker's hello.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawns plugin workers and negotiates their sessions.
///
/// # Example
///
/// ```rust,no_run
/// use hst_plugins::{PluginLauncher, PluginManifest, handshake_config};
/// use std::path::PathBuf;
///
/// let launcher = PluginLauncher::new(handshake_config());
/// let manifest = PluginManifest::new("filelister", PathBuf::from("/usr/bin/hst-filelister"));
/// let session = launcher.launch(&manifest).expect("plugin starts");
/// let lister = session.dispense().expect("control channel");
/// ```
#[derive(Debug, Clone)]
pub struct PluginLauncher {
    handshake: HandshakeConfig,
    handshake_timeout: Duration,
    broker: BrokerConfig,
}

impl PluginLauncher {
    /// Creates a launcher negotiating with `handshake`.
    #[must_use]
    pub fn new(handshake: HandshakeConfig) -> Self {
        Self {
            handshake,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            broker: BrokerConfig::default(),
        }
    }

    /// Overrides the bound on the wait for a worker's hello.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Overrides the broker tunables used for every session.
    #[must_use]
    pub const fn with_broker_config(mut self, config: BrokerConfig) -> Self {
        self.broker = config;
        self
    }

    /// Returns the handshake configuration.
    #[must_use]
    pub const fn handshake(&self) -> &HandshakeConfig {
        &self.handshake
    }

    /// Starts the worker described by `manifest` and negotiates a session.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ExecutableNotFound`] or
    /// [`PluginError::SpawnFailed`] if the process cannot start,
    /// [`PluginError::Handshake`] if the worker does not present a valid
    /// hello in time, and [`PluginError::Io`] if the session threads cannot
    /// be started. The worker is killed in every failure case.
    pub fn launch(&self, manifest: &PluginManifest) -> Result<PluginSession, PluginError> {
        let name = manifest.name();
        if !manifest.executable().exists() {
            return Err(PluginError::ExecutableNotFound {
                name: name.to_owned(),
                path: manifest.executable().to_path_buf(),
            });
        }

        let mut command = Command::new(manifest.executable());
        command
            .args(manifest.args())
            .envs(self.handshake.environment())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            target: PLUGIN_TARGET,
            plugin = name,
            executable = %manifest.executable().display(),
            "spawning plugin process"
        );

        let mut child = command.spawn().map_err(|err| PluginError::SpawnFailed {
            name: name.to_owned(),
            message: err.to_string(),
            source: Some(Arc::new(err)),
        })?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            reap(name, &mut child);
            return Err(PluginError::SpawnFailed {
                name: name.to_owned(),
                message: String::from("failed to capture the plugin's standard streams"),
                source: None,
            });
        };

        if let Err(err) = forward_stderr(name, stderr) {
            reap(name, &mut child);
            return Err(io_error(name, err));
        }

        let (hello, reader) = match self.await_hello(name, stdout) {
            Ok(accepted) => accepted,
            Err(source) => {
                warn!(
                    target: PLUGIN_TARGET,
                    plugin = name,
                    error = %source,
                    "handshake failed, killing plugin"
                );
                reap(name, &mut child);
                return Err(PluginError::Handshake {
                    name: name.to_owned(),
                    source,
                });
            }
        };

        let broker = Broker::with_config(Role::Host, stdin, self.broker);
        if let Err(err) = broker.attach(reader) {
            broker.shutdown("session reader failed to start");
            reap(name, &mut child);
            return Err(io_error(name, err));
        }

        info!(
            target: PLUGIN_TARGET,
            plugin = name,
            pid = child.id(),
            protocol_version = hello.protocol_version(),
            host_services = hello.capabilities().supports(Capability::HostServices),
            "plugin session established"
        );
        Ok(PluginSession::new(
            name.to_owned(),
            &hello,
            broker,
            child,
            manifest.timeout(),
        ))
    }

    /// Reads and validates the worker's hello within the handshake timeout.
    fn await_hello(
        &self,
        name: &str,
        stdout: ChildStdout,
    ) -> Result<(Hello, BufReader<ChildStdout>), HandshakeError> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let plugin = name.to_owned();
        thread::Builder::new()
            .name(format!("hst-{name}-hello"))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                let outcome = read_hello(&mut reader).map(|hello| (hello, reader));
                if sender.send(outcome).is_err() {
                    debug!(target: PLUGIN_TARGET, plugin = %plugin, "hello arrived after the timeout");
                }
            })?;

        let timeout = self.handshake_timeout;
        let (hello, reader) = match receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(HandshakeError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            Err(RecvTimeoutError::Disconnected) => return Err(HandshakeError::Eof),
        };
        self.handshake.validate(&hello)?;
        Ok((hello, reader))
    }
}

fn io_error(name: &str, err: io::Error) -> PluginError {
    PluginError::Io {
        name: name.to_owned(),
        source: Arc::new(err),
    }
}

/// Kills and waits for a child that never became a session.
fn reap(name: &str, child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(target: PLUGIN_TARGET, plugin = name, error = %err, "kill failed");
    }
    match child.wait() {
        Ok(status) => debug!(target: PLUGIN_TARGET, plugin = name, ?status, "plugin reaped"),
        Err(err) => warn!(target: PLUGIN_TARGET, plugin = name, error = %err, "failed to reap plugin"),
    }
}

/// Re-emits every stderr line of the worker through `tracing`.
fn forward_stderr(name: &str, stderr: ChildStderr) -> io::Result<()> {
    let plugin = name.to_owned();
    thread::Builder::new()
        .name(format!("hst-{name}-stderr"))
        .spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                let trimmed = line.trim_end();
                if !trimmed.is_empty() {
                    info!(target: WORKER_LOG_TARGET, plugin = %plugin, "{trimmed}");
                }
            }
            debug!(target: PLUGIN_TARGET, plugin = %plugin, "plugin stderr closed");
        })
        .map(drop)
}
