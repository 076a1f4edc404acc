//! Storage value types.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use scriptorium_types::NodeType;

/// Entry kind as reported by a backend.
pub type EntryKind = NodeType;

/// Entry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stat {
    /// File or directory.
    pub kind: NodeType,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time, when the backend tracks one.
    pub mtime: Option<SystemTime>,
}

impl Stat {
    /// Metadata for a file of `size` bytes modified now.
    pub fn file(size: u64) -> Self {
        Self {
            kind: NodeType::File,
            size,
            mtime: Some(SystemTime::now()),
        }
    }

    /// Metadata for a directory.
    pub fn directory() -> Self {
        Self {
            kind: NodeType::Directory,
            size: 0,
            mtime: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: NodeType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: NodeType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, NodeType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, NodeType::Directory)
    }
}

/// Write flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Replace existing content (otherwise an existing file is `AlreadyExists`).
    pub overwrite: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            create: true,
            overwrite: true,
        }
    }
}

impl WriteOptions {
    /// Create only; fail if the file exists.
    pub fn create_new() -> Self {
        Self {
            create: true,
            overwrite: false,
        }
    }

    /// Overwrite only; fail if the file is missing.
    pub fn existing() -> Self {
        Self {
            create: false,
            overwrite: true,
        }
    }
}

/// Directory creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MkdirOptions {
    /// Create missing parents; an existing directory is not an error.
    pub recursive: bool,
}

impl MkdirOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }
}
