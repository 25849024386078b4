//! Wire types for the reverse host-service surface.
//!
//! Capability failures are reported in the `error` field of each response;
//! binary contents travel as standard base64.

use cap_std::fs::OpenOptions;
use serde::{Deserialize, Serialize};

use crate::ids::FileHandle;


/// Method names served on a host-service channel.
pub mod methods {
    /// Environment lookup.
    pub const GET_ENV: &str = "host.get_env";
    /// Directory listing.
    pub const READ_DIR: &str = "host.read_dir";
    /// Whole-file read.
    pub const READ_FILE: &str = "host.read_file";
    /// Whole-file write.
    pub const WRITE_FILE: &str = "host.write_file";
    /// Open a stateful file handle.
    pub const OPEN_FILE: &str = "host.open_file";
    /// Read from a handle.
    pub const READ_HANDLE: &str = "host.read_handle";
    /// Write to a handle.
    pub const WRITE_HANDLE: &str = "host.write_handle";
    /// Close a handle.
    pub const CLOSE_HANDLE: &str = "host.close_handle";
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// How a stateful file handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Read an existing file.
    ReadOnly,
    /// Create or truncate, write only.
    WriteTruncate,
    /// Create or append, write only.
    WriteAppend,
    /// Create a new file, failing if it exists.
    WriteExclusive,
    /// Read and write an existing file.
    ReadWrite,
    /// Read and write, creating the file if needed.
    ReadWriteCreate,
    /// Read and write, creating or truncating.
    ReadWriteTruncate,
    /// Read and append, creating the file if needed.
    ReadWriteAppend,
}

impl OpenMode {
    /// Translates the mode into open options.
    #[must_use]
    pub fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Self::ReadOnly => options.read(true),
            Self::WriteTruncate => options.write(true).create(true).truncate(true),
            Self::WriteAppend => options.append(true).create(true),
            Self::WriteExclusive => options.write(true).create_new(true),
            Self::ReadWrite => options.read(true).write(true),
            Self::ReadWriteCreate => options.read(true).write(true).create(true),
            Self::ReadWriteTruncate => options.read(true).write(true).create(true).truncate(true),
            Self::ReadWriteAppend => options.read(true).append(true).create(true),
        };
        options
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirEntry {
    /// File name relative to the listed directory.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Parameters of `host.get_env`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEnvRequest {
    /// Variable name.
    pub key: String,
}

/// Result of `host.get_env`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEnvResponse {
    /// Variable value, empty when unset.
    pub value: String,
}

/// Parameters of `host.read_dir` and `host.read_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRequest {
    /// Path relative to, or absolute inside, the sandbox root.
    pub path: String,
}

/// Result of `host.read_dir`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirResponse {
    /// Immediate entries of the directory.
    #[serde(default)]
    pub entries: Vec<DirEntry>,
    /// Capability failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `host.read_file`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFileResponse {
    /// File contents.
    #[serde(default, with = "base64_bytes")]
    pub contents: Vec<u8>,
    /// Capability failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters of `host.write_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFileRequest {
    /// Destination path.
    pub path: String,
    /// Bytes to write.
    #[serde(with = "base64_bytes")]
    pub contents: Vec<u8>,
    /// Permission bits; 0 selects the default mode.
    #[serde(default)]
    pub perm: u32,
}

/// Result of calls that only report success or failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Capability failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters of `host.open_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileRequest {
    /// Path to open.
    pub path: String,
    /// Access mode.
    pub mode: OpenMode,
}

/// Result of `host.open_file`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileResponse {
    /// Handle of the opened file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<FileHandle>,
    /// Capability failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters of `host.read_handle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadHandleRequest {
    /// Handle to read from.
    pub handle: FileHandle,
    /// Upper bound on returned bytes.
    pub max_bytes: u32,
}

/// Result of `host.read_handle`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadHandleResponse {
    /// Bytes read.
    #[serde(default, with = "base64_bytes")]
    pub contents: Vec<u8>,
    /// Whether the end of the file was reached.
    #[serde(default)]
    pub eof: bool,
    /// Capability failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters of `host.write_handle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteHandleRequest {
    /// Handle to write to.
    pub handle: FileHandle,
    /// Bytes to write.
    #[serde(with = "base64_bytes")]
    pub contents: Vec<u8>,
}

/// Result of `host.write_handle`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteHandleResponse {
    /// Number of bytes written.
    #[serde(default)]
    pub written: u64,
    /// Capability failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters of `host.close_handle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRequest {
    /// Handle to close.
    pub handle: FileHandle,
}
