//! Runtime for the worker side of a session.
//!
//! A worker binary hands its [`FileLister`] to [`Worker::run`], which checks
//! that a host launched the process, announces the worker's hello on
//! stdout, serves the forward surface on the control channel, and returns
//! once the host closes the session.

use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;

use hst_broker::handshake::write_hello;
use hst_broker::rpc::{DEFAULT_CALL_TIMEOUT, RpcHandler, serve};
use hst_broker::{Broker, BrokerError, Capabilities, Capability, ChannelId, HandshakeConfig, Role};
use tracing::{debug, info};

use crate::error::WorkerError;
use crate::filelister::{FileLister, FileListerServer};
use crate::reverse::ReverseConnection;


const WORKER_TARGET: &str = "hst_plugins::worker";

/// Worker-side session settings.
#[derive(Debug, Clone)]
pub struct Worker {
    handshake: HandshakeConfig,
    capabilities: Capabilities,
    call_timeout: Duration,
}

impl Worker {
    /// Creates a worker that asks for host services.
    #[must_use]
    pub fn new(handshake: HandshakeConfig) -> Self {
        Self {
            handshake,
            capabilities: Capabilities::none().with(Capability::HostServices),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Announces no capabilities, so the host never connects host services.
    #[must_use]
    pub fn without_host_services(mut self) -> Self {
        self.capabilities = Capabilities::none();
        self
    }

    /// Caps every call the worker makes into host services.
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Returns the capabilities announced in the hello.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Serves `lister` over this process's stdin and stdout.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Handshake`] if the process was not launched by
    /// a compatible host, and [`WorkerError::Broker`] if the session cannot
    /// start.
    pub fn run(&self, lister: Arc<dyn FileLister>) -> Result<(), WorkerError> {
        self.handshake
            .verify_environment(|key| std::env::var(key).ok())?;
        self.serve(lister, BufReader::new(io::stdin()), io::stdout())
    }

    /// Serves `lister` over an explicit transport.
    ///
    /// Writes the hello to `output`, then routes frames until `input`
    /// reaches end of file. The host-service connection, if any, is closed
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Handshake`] if the hello cannot be written and
    /// [`WorkerError::Broker`] if the session cannot start.
    pub fn serve<R, W>(
        &self,
        lister: Arc<dyn FileLister>,
        input: R,
        mut output: W,
    ) -> Result<(), WorkerError>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        write_hello(&mut output, &self.handshake.hello(self.capabilities.clone()))?;

        let broker = Broker::new(Role::Worker, output);
        let reverse = Arc::new(ReverseConnection::new(broker.clone(), self.call_timeout));
        let handler: Arc<dyn RpcHandler> =
            Arc::new(FileListerServer::new(lister, Arc::clone(&reverse)));
        broker.listen(ChannelId::CONTROL, move |connection| {
            serve(connection, &handler);
        })?;
        broker.attach(input).map_err(BrokerError::from)?;
        info!(
            target: WORKER_TARGET,
            pid = std::process::id(),
            host_services = self.capabilities.supports(Capability::HostServices),
            "worker ready"
        );

        broker.wait_closed();
        if let Some(client_id) = reverse.disconnect() {
            debug!(target: WORKER_TARGET, %client_id, "host services closed at shutdown");
        }
        info!(
            target: WORKER_TARGET,
            reason = broker.close_reason().as_deref().unwrap_or("unknown"),
            "worker session closed"
        );
        Ok(())
    }
}
