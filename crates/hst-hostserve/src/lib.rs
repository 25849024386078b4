//! Host capabilities exposed to plugin workers over a reverse channel.
//!
//! A worker that negotiated host services dials back into the host and
//! receives a [`HostServiceClient`]. Calls made through the stub reach a
//! [`HostServiceServer`], which attributes them to the calling
//! [`ClientId`] and dispatches to a [`HostServices`] implementation.
//!
//! The stock implementation, [`HostCapabilities`], combines:
//!
//! - a [`Sandbox`] confining every path to one directory,
//! - environment lookup, returning an empty string for unset keys,
//! - an [`OpenFiles`] table of stateful file handles owned per client.
//!
//! Failures of the capability itself (a missing file, an escaping path)
//! travel back as an `error` string inside a successful response. Only the
//! loss of the channel surfaces as a transport error.

pub mod client;
pub mod clients;
pub mod error;
pub mod handles;
pub mod ids;
pub mod protocol;
pub mod sandbox;
pub mod server;
pub mod service;

#[cfg(test)]
mod tests;

pub use self::client::{HostServiceClient, ReadChunk, RemoteDirEntry, RemoteFileType};
pub use self::clients::ActiveClients;
pub use self::error::{HostCallError, HostServiceError, RegistryError};
pub use self::handles::{HandleTable, OpenFiles};
pub use self::ids::{ClientId, FileHandle, RequestId};
pub use self::protocol::{DirEntry, OpenMode};
pub use self::sandbox::{DEFAULT_FILE_MODE, Sandbox};
pub use self::server::{ClientBinding, HostServiceServer, serve_host_services};
pub use self::service::{EnvSource, HostCapabilities, HostServices, ProcessEnv};
