//! Domain errors raised while launching and talking to plugins.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can tell the stage that failed. I/O errors are wrapped in `Arc` to keep the
//! enums `Clone`.

use std::path::PathBuf;
use std::sync::Arc;

use hst_broker::{BrokerError, ChannelId, HandshakeError, RpcError};
use hst_hostserve::{ClientId, HostCallError, RegistryError};
use thiserror::Error;

/// Errors arising from plugin launch and supervision.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// A plugin manifest failed validation.
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of the validation failure.
        message: String,
    },

    /// The plugin executable was not found on the filesystem.
    #[error("plugin '{name}' executable not found: {path}")]
    ExecutableNotFound {
        /// Plugin name.
        name: String,
        /// Path that was checked.
        path: PathBuf,
    },

    /// The plugin process could not be spawned.
    #[error("plugin '{name}' failed to start: {message}")]
    SpawnFailed {
        /// Plugin name.
        name: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The worker failed the handshake; the process has been killed.
    #[error("plugin '{name}' failed the handshake: {source}")]
    Handshake {
        /// Plugin name.
        name: String,
        /// Handshake failure.
        #[source]
        source: HandshakeError,
    },

    /// The forward business channel could not be opened.
    #[error("plugin '{name}' could not be dispensed: {source}")]
    Dispense {
        /// Plugin name.
        name: String,
        /// Broker failure.
        #[source]
        source: BrokerError,
    },

    /// An I/O error occurred while supervising the plugin process.
    #[error("I/O error supervising plugin '{name}': {source}")]
    Io {
        /// Plugin name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

/// Errors from [`FileListerClient`](crate::FileListerClient) calls.
#[derive(Debug, Clone, Error)]
pub enum ForwardCallError {
    /// The call did not complete.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The worker completed the call and reported a failure.
    #[error("plugin reported: {message}")]
    Plugin {
        /// Failure reported by the worker.
        message: String,
    },
}

impl ForwardCallError {
    /// Returns `true` when the session itself is gone.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        match self {
            Self::Rpc(err) => err.is_transport(),
            Self::Plugin { .. } => false,
        }
    }
}

/// Errors a [`FileLister`](crate::FileLister) reports back to the host.
#[derive(Debug, Clone, Error)]
pub enum ListingError {
    /// The host has not connected host services to this worker.
    #[error("host services are not connected")]
    HostUnavailable,

    /// The host call failed.
    #[error(transparent)]
    Host(#[from] HostCallError),
}

/// Errors from setting up host services for one worker.
///
/// None of these leave the session unusable; the host may continue without
/// host services for that worker.
#[derive(Debug, Clone, Error)]
pub enum EstablishError {
    /// No channel identifier could be allocated.
    #[error("failed to allocate a host service channel: {source}")]
    Allocation {
        /// Broker failure.
        #[source]
        source: BrokerError,
    },

    /// The host service listener could not be bound.
    #[error("failed to bind host services on channel {channel}: {source}")]
    Listen {
        /// Channel that was being bound.
        channel: ChannelId,
        /// Broker failure.
        #[source]
        source: BrokerError,
    },

    /// The worker could not be told about the channel.
    #[error("failed to notify the worker of channel {channel}: {source}")]
    Notify {
        /// Channel the worker should dial.
        channel: ChannelId,
        /// Call failure.
        #[source]
        source: RpcError,
    },

    /// The worker was notified but could not dial back.
    #[error("worker could not dial host services on channel {channel}: {message}")]
    PeerDial {
        /// Channel the worker tried to dial.
        channel: ChannelId,
        /// Failure reported by the worker.
        message: String,
    },

    /// The identity returned by the worker is already registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors from the worker-side reverse connection manager.
#[derive(Debug, Clone, Error)]
pub enum ReverseConnectionError {
    /// A live reverse connection already exists.
    #[error("host services already connected as client {client_id}")]
    AlreadyConnected {
        /// Identity of the live connection.
        client_id: ClientId,
    },

    /// Dialing the host channel failed.
    #[error("failed to dial host services on channel {channel}: {source}")]
    Dial {
        /// Channel that was dialed.
        channel: ChannelId,
        /// Broker failure.
        #[source]
        source: BrokerError,
    },
}

/// Errors that stop the worker runtime.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// The process was not launched by a compatible host.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The session could not be started.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
