//! Directory-confined filesystem access.
//!
//! A [`Sandbox`] holds a capability handle on one root directory. Every
//! operation resolves its path beneath that root and opens a further
//! confined directory handle for the target (the directory itself for
//! listings, the parent for file operations). Those handles are dropped on
//! every exit path, so nothing outlives the call.
//!
//! Paths are accepted relative to the root, or absolute when they lie
//! inside it. Lexical `..` escapes are rejected up front; symlink escapes
//! are refused by `cap-std` when the confined handle is opened.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use cap_std::ambient_authority;
use cap_std::fs::{Dir, OpenOptions, OpenOptionsExt};

use crate::error::HostServiceError;
use crate::protocol::{DirEntry, OpenMode};

#[cfg(test)]
mod tests;

/// Mode applied by `write_file` when the caller passes no permission bits.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Returns the mode `write_file` applies for the requested bits.
///
/// Only the permission bits are honoured; zero selects
/// [`DEFAULT_FILE_MODE`].
#[must_use]
pub const fn effective_mode(perm: u32) -> u32 {
    let bits = perm & 0o777;
    if bits == 0 { DEFAULT_FILE_MODE } else { bits }
}

/// Filesystem access confined to one directory tree.
#[derive(Debug)]
pub struct Sandbox {
    root: Dir,
    root_path: PathBuf,
}

impl Sandbox {
    /// Opens a sandbox rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`HostServiceError::RootUnavailable`] if `root` does not
    /// exist or is not a directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, HostServiceError> {
        let requested = root.as_ref();
        let unavailable = |source| HostServiceError::RootUnavailable {
            path: requested.to_path_buf(),
            source: std::sync::Arc::new(source),
        };
        let root_path = std::fs::canonicalize(requested).map_err(unavailable)?;
        let dir = Dir::open_ambient_dir(&root_path, ambient_authority()).map_err(unavailable)?;
        Ok(Self {
            root: dir,
            root_path,
        })
    }

    /// Returns the canonical root path.
    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Lists the immediate entries of the directory at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the path escapes the root, does not exist, is not a
    /// directory, or cannot be read.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, HostServiceError> {
        let relative = self.resolve(path)?;
        let dir = self.confine(&relative, path)?;
        let listing = dir
            .entries()
            .map_err(|err| HostServiceError::io("read directory", path, err))?;
        let mut entries = Vec::new();
        for item in listing {
            let entry = item.map_err(|err| HostServiceError::io("read directory", path, err))?;
            let file_type = entry
                .file_type()
                .map_err(|err| HostServiceError::io("inspect entry in", path, err))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
            });
        }
        Ok(entries)
    }

    /// Reads the whole file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the path escapes the root, names no file, or cannot be read.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, HostServiceError> {
        let (parent, name) = self.split(path)?;
        parent
            .read(&name)
            .map_err(|err| HostServiceError::io("read file", path, err))
    }

    /// Creates or replaces the file at `path`.
    ///
    /// The file ends up with exactly the mode [`effective_mode`] derives
    /// from `perm`, regardless of the process umask or a previous mode. A new
    /// file is created with that mode and an existing one is narrowed before
    /// any contents are written, so the contents are never visible under a
    /// wider mode.
    ///
    /// # Errors
    ///
    /// Fails if the path escapes the root, names no file, or cannot be
    /// written.
    pub fn write_file(&self, path: &str, contents: &[u8], perm: u32) -> Result<(), HostServiceError> {
        let mode = effective_mode(perm);
        let (parent, name) = self.split(path)?;
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true).mode(mode);
        let mut file = parent
            .open_with(&name, &options)
            .map_err(|err| HostServiceError::io("create file", path, err))?
            .into_std();
        file.set_permissions(std::fs::Permissions::from_mode(mode))
            .map_err(|err| HostServiceError::io("set permissions on", path, err))?;
        file.write_all(contents)
            .map_err(|err| HostServiceError::io("write file", path, err))
    }

    /// Opens the file at `path` for stateful access.
    ///
    /// # Errors
    ///
    /// Fails if the path escapes the root, names no file, or cannot be
    /// opened with `mode`.
    pub fn open_file(&self, path: &str, mode: OpenMode) -> Result<std::fs::File, HostServiceError> {
        let (parent, name) = self.split(path)?;
        parent
            .open_with(&name, &mode.options())
            .map(cap_std::fs::File::into_std)
            .map_err(|err| HostServiceError::io("open file", path, err))
    }

    /// Maps a request path to a path relative to the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, HostServiceError> {
        let escape = || HostServiceError::Escape {
            path: path.to_owned(),
        };
        let requested = Path::new(path);
        let relative = if requested.is_absolute() {
            requested
                .strip_prefix(&self.root_path)
                .map_err(|_| escape())?
        } else {
            requested
        };
        let mut depth = 0_usize;
        for component in relative.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escape)?,
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }
        if relative.as_os_str().is_empty() {
            Ok(PathBuf::from("."))
        } else {
            Ok(relative.to_path_buf())
        }
    }

    /// Opens a directory handle confined to `relative`.
    fn confine(&self, relative: &Path, path: &str) -> Result<Dir, HostServiceError> {
        self.root
            .open_dir(relative)
            .map_err(|err| HostServiceError::io("open directory", path, err))
    }

    /// Opens the parent of `path` and returns it with the file name.
    fn split(&self, path: &str) -> Result<(Dir, PathBuf), HostServiceError> {
        let relative = self.resolve(path)?;
        let mut components: Vec<Component<'_>> = relative.components().collect();
        let Some(Component::Normal(name)) = components.pop() else {
            return Err(HostServiceError::NoFileName {
                path: path.to_owned(),
            });
        };
        let parent: PathBuf = if components.is_empty() {
            PathBuf::from(".")
        } else {
            components.iter().collect()
        };
        let dir = self.confine(&parent, path)?;
        Ok((dir, PathBuf::from(name)))
    }
}
