//! A live session with one plugin worker.
//!
//! The session owns the worker process and the host end of its broker. It
//! is the only handle through which the host talks to that worker: the
//! forward business channel is dispensed from it, and host services are
//! established against it.

use std::fmt;
use std::process::{Child, ExitStatus};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use hst_broker::{Broker, Capabilities, Capability, ChannelId, Hello};
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::filelister::FileListerClient;

const SESSION_TARGET: &str = "hst_plugins::session";

const EXIT_POLL: Duration = Duration::from_millis(20);

/// What the host needs to know about a peer to set up host services.
pub trait PluginPeer {
    /// Name used to attribute the peer's clients.
    fn name(&self) -> &str;

    /// Capabilities the peer announced in its hello.
    fn capabilities(&self) -> &Capabilities;

    /// Host end of the peer's broker.
    fn broker(&self) -> &Broker;
}

/// Host-side handle to one running worker.
pub struct PluginSession {
    name: String,
    protocol_version: u32,
    capabilities: Capabilities,
    broker: Broker,
    call_timeout: Duration,
    process: Mutex<Child>,
}

impl PluginSession {
    pub(crate) fn new(
        name: String,
        hello: &Hello,
        broker: Broker,
        child: Child,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name,
            protocol_version: hello.protocol_version(),
            capabilities: hello.capabilities().clone(),
            broker,
            call_timeout,
            process: Mutex::new(child),
        }
    }

    /// Returns the negotiated protocol version.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Returns `true` if the worker announced `capability`.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.supports(capability)
    }

    /// Returns the worker's process identifier.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .id()
    }

    /// Returns `true` while the transport is up and the process runs.
    #[must_use]
    pub fn is_live(&self) -> bool {
        if !self.broker.is_live() {
            return false;
        }
        matches!(
            self.process
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_wait(),
            Ok(None)
        )
    }

    /// Opens the forward business channel.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Dispense`] if the worker does not accept the
    /// control channel.
    pub fn dispense(&self) -> Result<FileListerClient, PluginError> {
        let dispense_failed = |source| PluginError::Dispense {
            name: self.name.clone(),
            source,
        };
        let connection = self
            .broker
            .dial(ChannelId::CONTROL)
            .map_err(dispense_failed)?;
        let client =
            FileListerClient::new(connection, self.call_timeout).map_err(dispense_failed)?;
        debug!(target: SESSION_TARGET, plugin = %self.name, "control channel dispensed");
        Ok(client)
    }

    /// Closes the session and gives the worker `grace` to exit on its own
    /// before killing it.
    ///
    /// Closing the session closes the worker's stdin, which a well-behaved
    /// worker treats as the signal to shut down.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the process cannot be waited for.
    pub fn terminate(&self, grace: Duration) -> Result<ExitStatus, PluginError> {
        self.broker.shutdown("plugin terminated by host");
        let mut child = self.process.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(target: SESSION_TARGET, plugin = %self.name, ?status, "plugin exited");
                    return Ok(status);
                }
                Ok(None) if started.elapsed() < grace => thread::sleep(EXIT_POLL),
                Ok(None) => {
                    warn!(
                        target: SESSION_TARGET,
                        plugin = %self.name,
                        grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                        "plugin ignored shutdown, killing process"
                    );
                    return self.kill_locked(&mut child);
                }
                Err(err) => return Err(self.io_error(err)),
            }
        }
    }

    /// Kills the worker immediately and closes the session.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the process cannot be waited for.
    pub fn kill(&self) -> Result<ExitStatus, PluginError> {
        self.broker.shutdown("plugin killed by host");
        let mut child = self.process.lock().unwrap_or_else(PoisonError::into_inner);
        self.kill_locked(&mut child)
    }

    fn kill_locked(&self, child: &mut Child) -> Result<ExitStatus, PluginError> {
        if let Err(err) = child.kill() {
            debug!(target: SESSION_TARGET, plugin = %self.name, error = %err, "kill failed");
        }
        let status = child.wait().map_err(|err| self.io_error(err))?;
        info!(target: SESSION_TARGET, plugin = %self.name, ?status, "plugin killed");
        Ok(status)
    }

    fn io_error(&self, err: std::io::Error) -> PluginError {
        PluginError::Io {
            name: self.name.clone(),
            source: std::sync::Arc::new(err),
        }
    }
}

impl PluginPeer for PluginSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn broker(&self) -> &Broker {
        &self.broker
    }
}

impl fmt::Debug for PluginSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSession")
            .field("name", &self.name)
            .field("protocol_version", &self.protocol_version)
            .field("capabilities", &self.capabilities)
            .field("broker", &self.broker)
            .finish_non_exhaustive()
    }
}

impl Drop for PluginSession {
    fn drop(&mut self) {
        let child = self
            .process
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(child.try_wait(), Ok(None)) {
            self.broker.shutdown("plugin session dropped");
            if let Err(err) = child.kill() {
                debug!(target: SESSION_TARGET, plugin = %self.name, error = %err, "kill on drop failed");
            }
            if let Err(err) = child.wait() {
                debug!(target: SESSION_TARGET, plugin = %self.name, error = %err, "wait on drop failed");
            }
        }
    }
}
