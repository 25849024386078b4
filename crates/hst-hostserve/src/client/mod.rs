//! Worker-side stub for host capabilities.
//!
//! Every call is attributed to the stub's [`ClientId`] and gets a fresh
//! [`RequestId`], both sent as call metadata. The caller's context is
//! inherited, so a reverse call made while serving a forward request shares
//! that request's deadline and is cancelled with it.

use std::time::Duration;

use hst_broker::{BrokerError, CallContext, CallMetadata, Connection, RpcClient};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::HostCallError;
use crate::ids::{ClientId, FileHandle, RequestId};
use crate::protocol::{
    DirEntry, GetEnvRequest, GetEnvResponse, HandleRequest, OpenFileRequest, OpenFileResponse,
    OpenMode, PathRequest, ReadDirResponse, ReadFileResponse, ReadHandleRequest,
    ReadHandleResponse, StatusResponse, WriteFileRequest, WriteHandleRequest, WriteHandleResponse,
    methods,
};

/// Kind of a remote directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileType {
    /// A directory.
    Dir,
    /// Anything else.
    File,
}

/// A directory entry listed by the host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RemoteDirEntry {
    name: String,
    is_dir: bool,
}

impl RemoteDirEntry {
    /// Returns the entry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` for directories.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Returns the entry kind.
    #[must_use]
    pub const fn file_type(&self) -> RemoteFileType {
        if self.is_dir {
            RemoteFileType::Dir
        } else {
            RemoteFileType::File
        }
    }
}

impl From<DirEntry> for RemoteDirEntry {
    fn from(entry: DirEntry) -> Self {
        Self {
            name: entry.name,
            is_dir: entry.is_dir,
        }
    }
}

/// Bytes returned by one handle read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    /// Bytes read.
    pub contents: Vec<u8>,
    /// Whether the end of the file was reached.
    pub eof: bool,
}

fn service_result(error: Option<String>) -> Result<(), HostCallError> {
    error.map_or(Ok(()), |message| Err(HostCallError::Service { message }))
}

/// Client stub for host capabilities over one reverse connection.
#[derive(Debug, Clone)]
pub struct HostServiceClient {
    rpc: RpcClient,
    client_id: ClientId,
}

impl HostServiceClient {
    /// Wraps a dialed reverse connection.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Io`] if the response reader cannot start.
    pub fn new(
        connection: Connection,
        client_id: ClientId,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        Ok(Self {
            rpc: RpcClient::with_timeout(connection, timeout)?,
            client_id,
        })
    }

    /// Returns the identity attached to every call.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn call<P, R>(&self, ctx: &CallContext, method: &str, params: &P) -> Result<R, HostCallError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let metadata = CallMetadata::new()
            .with_client_id(self.client_id.to_string())
            .with_request_id(RequestId::generate().to_string());
        Ok(self.rpc.call_typed(&ctx.child(metadata), method, params)?)
    }

    /// Looks up a host environment variable; unset keys yield `""`.
    ///
    /// # Errors
    ///
    /// Returns [`HostCallError::Rpc`] when the call does not complete.
    pub fn get_env(&self, ctx: &CallContext, key: &str) -> Result<String, HostCallError> {
        let response: GetEnvResponse = self.call(
            ctx,
            methods::GET_ENV,
            &GetEnvRequest {
                key: key.to_owned(),
            },
        )?;
        Ok(response.value)
    }

    /// Lists a directory inside the host sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`HostCallError::Service`] when the host cannot list the
    /// path, and [`HostCallError::Rpc`] when the call does not complete.
    pub fn read_dir(
        &self,
        ctx: &CallContext,
        path: &str,
    ) -> Result<Vec<RemoteDirEntry>, HostCallError> {
        let response: ReadDirResponse = self.call(
            ctx,
            methods::READ_DIR,
            &PathRequest {
                path: path.to_owned(),
            },
        )?;
        service_result(response.error)?;
        Ok(response.entries.into_iter().map(RemoteDirEntry::from).collect())
    }

    /// Reads a file inside the host sandbox.
    ///
    /// # Errors
    ///
    /// Same classes as [`Self::read_dir`].
    pub fn read_file(&self, ctx: &CallContext, path: &str) -> Result<Vec<u8>, HostCallError> {
        let response: ReadFileResponse = self.call(
            ctx,
            methods::READ_FILE,
            &PathRequest {
                path: path.to_owned(),
            },
        )?;
        service_result(response.error)?;
        Ok(response.contents)
    }

    /// Writes a file inside the host sandbox; `perm` of 0 selects 0644.
    ///
    /// # Errors
    ///
    /// Same classes as [`Self::read_dir`].
    pub fn write_file(
        &self,
        ctx: &CallContext,
        path: &str,
        contents: &[u8],
        perm: u32,
    ) -> Result<(), HostCallError> {
        let response: StatusResponse = self.call(
            ctx,
            methods::WRITE_FILE,
            &WriteFileRequest {
                path: path.to_owned(),
                contents: contents.to_vec(),
                perm,
            },
        )?;
        service_result(response.error)
    }

    /// Opens a stateful file handle owned by this client.
    ///
    /// # Errors
    ///
    /// Same classes as [`Self::read_dir`].
    pub fn open_file(
        &self,
        ctx: &CallContext,
        path: &str,
        mode: OpenMode,
    ) -> Result<FileHandle, HostCallError> {
        let response: OpenFileResponse = self.call(
            ctx,
            methods::OPEN_FILE,
            &OpenFileRequest {
                path: path.to_owned(),
                mode,
            },
        )?;
        service_result(response.error)?;
        response.handle.ok_or_else(|| HostCallError::Service {
            message: "host returned no handle".to_owned(),
        })
    }

    /// Reads up to `max_bytes` from a handle.
    ///
    /// # Errors
    ///
    /// Same classes as [`Self::read_dir`].
    pub fn read_handle(
        &self,
        ctx: &CallContext,
        handle: FileHandle,
        max_bytes: u32,
    ) -> Result<ReadChunk, HostCallError> {
        let response: ReadHandleResponse = self.call(
            ctx,
            methods::READ_HANDLE,
            &ReadHandleRequest { handle, max_bytes },
        )?;
        service_result(response.error)?;
        Ok(ReadChunk {
            contents: response.contents,
            eof: response.eof,
        })
    }

    /// Writes `contents` to a handle, returning the byte count.
    ///
    /// # Errors
    ///
    /// Same classes as [`Self::read_dir`].
    pub fn write_handle(
        &self,
        ctx: &CallContext,
        handle: FileHandle,
        contents: &[u8],
    ) -> Result<u64, HostCallError> {
        let response: WriteHandleResponse = self.call(
            ctx,
            methods::WRITE_HANDLE,
            &WriteHandleRequest {
                handle,
                contents: contents.to_vec(),
            },
        )?;
        service_result(response.error)?;
        Ok(response.written)
    }

    /// Closes a handle.
    ///
    /// # Errors
    ///
    /// Same classes as [`Self::read_dir`].
    pub fn close_handle(&self, ctx: &CallContext, handle: FileHandle) -> Result<(), HostCallError> {
        let response: StatusResponse =
            self.call(ctx, methods::CLOSE_HANDLE, &HandleRequest { handle })?;
        service_result(response.error)
    }

    /// Closes the reverse connection. Closing twice is a no-op.
    pub fn close(&self) {
        self.rpc.close();
    }

    /// Returns `true` once the reverse connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rpc.is_closed()
    }
}
