//! Errors raised by host capabilities, the client registry and the stub.

use std::path::PathBuf;
use std::sync::Arc;

use hst_broker::RpcError;
use thiserror::Error;

use crate::ids::{ClientId, FileHandle};

/// Failure of a capability call.
///
/// These are business failures: the server reports them to the caller as
/// an `error` string in an otherwise successful response.
#[derive(Debug, Clone, Error)]
pub enum HostServiceError {
    /// The sandbox root could not be opened.
    #[error("failed to open sandbox root '{}': {source}", path.display())]
    RootUnavailable {
        /// Requested root directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The path resolves outside the sandbox root.
    #[error("path '{path}' escapes the sandbox root")]
    Escape {
        /// Requested path.
        path: String,
    },

    /// The path does not name a file.
    #[error("path '{path}' does not name a file")]
    NoFileName {
        /// Requested path.
        path: String,
    },

    /// An operating system call failed.
    #[error("{operation} '{path}': {source}")]
    Io {
        /// Operation being performed.
        operation: &'static str,
        /// Requested path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Stateful file operations need to know which client is calling.
    #[error("file handles require a client identity")]
    AnonymousClient,

    /// The reverse connection has not yet been bound to a registered
    /// client.
    #[error("connection is not bound to a client")]
    UnboundConnection,

    /// The call names a client other than the one owning the connection.
    #[error("client {client_id} does not own this connection")]
    ForeignClient {
        /// Identity claimed by the call.
        client_id: ClientId,
    },

    /// The handle is not open for the calling client.
    #[error("file handle {handle} is not open")]
    UnknownHandle {
        /// Requested handle.
        handle: FileHandle,
    },

    /// A file handle operation failed at the operating system level.
    #[error("{operation} on handle {handle}: {source}")]
    HandleIo {
        /// Operation being performed.
        operation: &'static str,
        /// Handle being used.
        handle: FileHandle,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl HostServiceError {
    pub(crate) fn io(operation: &'static str, path: &str, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_owned(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn handle_io(
        operation: &'static str,
        handle: FileHandle,
        source: std::io::Error,
    ) -> Self {
        Self::HandleIo {
            operation,
            handle,
            source: Arc::new(source),
        }
    }
}

/// Errors from the [`ActiveClients`](crate::ActiveClients) registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The identifier is already registered; the first owner is kept.
    #[error("client {client_id} is already registered to '{owner}'")]
    DuplicateClient {
        /// Identifier that was registered twice.
        client_id: ClientId,
        /// Owner recorded by the first registration.
        owner: String,
    },
}

/// Errors returned by [`HostServiceClient`](crate::HostServiceClient).
#[derive(Debug, Clone, Error)]
pub enum HostCallError {
    /// The call did not complete: the channel failed, timed out or was
    /// cancelled.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The host completed the call and reported a capability failure.
    #[error("host service failed: {message}")]
    Service {
        /// Failure reported by the host.
        message: String,
    },
}

impl HostCallError {
    /// Returns `true` when the reverse channel itself is gone.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        match self {
            Self::Rpc(err) => err.is_transport(),
            Self::Service { .. } => false,
        }
    }
}
