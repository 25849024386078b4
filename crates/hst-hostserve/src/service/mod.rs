//! The capability surface the host exposes to workers.

use std::fmt;
use std::io::{Read, Write};

use crate::error::HostServiceError;
use crate::handles::OpenFiles;
use crate::ids::{ClientId, FileHandle};
use crate::protocol::{DirEntry, OpenMode};
use crate::sandbox::Sandbox;

#[cfg(test)]
mod tests;

/// Largest chunk a single `read_handle` call returns.
pub const MAX_READ_CHUNK: usize = 1024 * 1024;

/// Capabilities reachable over a host-service channel.
///
/// Implementations are shared by every reverse connection, so they must be
/// safe to call concurrently.
pub trait HostServices: Send + Sync {
    /// Returns the value of `key`, or an empty string when unset.
    fn get_env(&self, key: &str) -> String;

    /// Lists the directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`HostServiceError`] when the path cannot be listed.
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, HostServiceError>;

    /// Reads the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`HostServiceError`] when the file cannot be read.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, HostServiceError>;

    /// Writes the file at `path`; `perm` of 0 selects the default mode.
    ///
    /// # Errors
    ///
    /// Returns a [`HostServiceError`] when the file cannot be written.
    fn write_file(&self, path: &str, contents: &[u8], perm: u32) -> Result<(), HostServiceError>;

    /// Opens a stateful handle owned by `client`.
    ///
    /// # Errors
    ///
    /// Returns a [`HostServiceError`] when the file cannot be opened.
    fn open_file(
        &self,
        client: ClientId,
        path: &str,
        mode: OpenMode,
    ) -> Result<FileHandle, HostServiceError>;

    /// Reads up to `max_bytes` from a handle; an empty result means end of
    /// file.
    ///
    /// # Errors
    ///
    /// Returns [`HostServiceError::UnknownHandle`] for handles `client` does
    /// not own, or the read failure.
    fn read_handle(
        &self,
        client: ClientId,
        handle: FileHandle,
        max_bytes: usize,
    ) -> Result<Vec<u8>, HostServiceError>;

    /// Writes all of `contents` to a handle, returning the byte count.
    ///
    /// # Errors
    ///
    /// Returns [`HostServiceError::UnknownHandle`] for handles `client` does
    /// not own, or the write failure.
    fn write_handle(
        &self,
        client: ClientId,
        handle: FileHandle,
        contents: &[u8],
    ) -> Result<usize, HostServiceError>;

    /// Closes a handle.
    ///
    /// # Errors
    ///
    /// Returns [`HostServiceError::UnknownHandle`] for handles `client` does
    /// not own.
    fn close_handle(&self, client: ClientId, handle: FileHandle) -> Result<(), HostServiceError>;

    /// Releases every resource `client` still holds, returning the count.
    fn release_client(&self, client: ClientId) -> usize;
}

/// Source of environment variables.
pub trait EnvSource: Send + Sync {
    /// Returns the value of `key`, if set.
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the host process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<F> EnvSource for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn var(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Stock host capabilities: a sandbox, an environment and open files.
pub struct HostCapabilities {
    sandbox: Sandbox,
    env: Box<dyn EnvSource>,
    files: OpenFiles,
}

impl HostCapabilities {
    /// Serves `sandbox` and the host process environment.
    #[must_use]
    pub fn new(sandbox: Sandbox) -> Self {
        Self::with_env(sandbox, ProcessEnv)
    }

    /// Serves `sandbox` with a custom environment source.
    #[must_use]
    pub fn with_env(sandbox: Sandbox, env: impl EnvSource + 'static) -> Self {
        Self {
            sandbox,
            env: Box::new(env),
            files: OpenFiles::new(),
        }
    }

    /// Returns the sandbox.
    #[must_use]
    pub const fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Returns the open file table.
    #[must_use]
    pub const fn open_files(&self) -> &OpenFiles {
        &self.files
    }
}

impl fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("sandbox", &self.sandbox)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

impl HostServices for HostCapabilities {
    fn get_env(&self, key: &str) -> String {
        self.env.var(key).unwrap_or_default()
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, HostServiceError> {
        self.sandbox.read_dir(path)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, HostServiceError> {
        self.sandbox.read_file(path)
    }

    fn write_file(&self, path: &str, contents: &[u8], perm: u32) -> Result<(), HostServiceError> {
        self.sandbox.write_file(path, contents, perm)
    }

    fn open_file(
        &self,
        client: ClientId,
        path: &str,
        mode: OpenMode,
    ) -> Result<FileHandle, HostServiceError> {
        let file = self.sandbox.open_file(path, mode)?;
        Ok(self.files.insert(client, file))
    }

    fn read_handle(
        &self,
        client: ClientId,
        handle: FileHandle,
        max_bytes: usize,
    ) -> Result<Vec<u8>, HostServiceError> {
        let slot = self
            .files
            .get(client, handle)
            .ok_or(HostServiceError::UnknownHandle { handle })?;
        let mut file = slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut buffer = vec![0_u8; max_bytes.min(MAX_READ_CHUNK)];
        let read = file
            .read(&mut buffer)
            .map_err(|err| HostServiceError::handle_io("read", handle, err))?;
        buffer.truncate(read);
        Ok(buffer)
    }

    fn write_handle(
        &self,
        client: ClientId,
        handle: FileHandle,
        contents: &[u8],
    ) -> Result<usize, HostServiceError> {
        let slot = self
            .files
            .get(client, handle)
            .ok_or(HostServiceError::UnknownHandle { handle })?;
        let mut file = slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.write_all(contents)
            .map_err(|err| HostServiceError::handle_io("write", handle, err))?;
        Ok(contents.len())
    }

    fn close_handle(&self, client: ClientId, handle: FileHandle) -> Result<(), HostServiceError> {
        if self.files.remove(client, handle) {
            Ok(())
        } else {
            Err(HostServiceError::UnknownHandle { handle })
        }
    }

    fn release_client(&self, client: ClientId) -> usize {
        self.files.release_client(client)
    }
}
