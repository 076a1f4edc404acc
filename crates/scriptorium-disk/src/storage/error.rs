//! Storage error types.

use std::io;
use thiserror::Error;

/// Backend-level error.
///
/// `NotFound` and `AlreadyExists` are the tagged kinds callers branch on;
/// everything else is opaque and propagated unchanged.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Path escapes the backend root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Operation not supported here (root rename, symlinks, ...).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidOperation error.
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Wrap an I/O error, promoting the tagged kinds.
    pub fn from_io(err: io::Error, path: impl Into<String>) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.into()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.into()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path.into()),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path.into()),
            _ => Self::Io(err),
        }
    }

    /// The path carried by a path-tagged variant.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::NotFound(p)
            | Self::AlreadyExists(p)
            | Self::NotADirectory(p)
            | Self::IsADirectory(p)
            | Self::PathEscapesRoot(p) => Some(p),
            _ => None,
        }
    }

    /// Same error kind with the path text replaced.
    ///
    /// Used by adapters that translate paths at their boundary.
    pub fn with_path(self, path: impl Into<String>) -> Self {
        match self {
            Self::NotFound(_) => Self::NotFound(path.into()),
            Self::AlreadyExists(_) => Self::AlreadyExists(path.into()),
            Self::NotADirectory(_) => Self::NotADirectory(path.into()),
            Self::IsADirectory(_) => Self::IsADirectory(path.into()),
            Self::PathEscapesRoot(_) => Self::PathEscapesRoot(path.into()),
            other => other,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        let msg = err.to_string();
        Self::from_io(err, msg)
    }
}

/// Storage result type.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_translation() {
        let err = StorageError::from_io(io::Error::from(io::ErrorKind::NotFound), "/a.md");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: /a.md");

        let err = StorageError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), "/d");
        assert!(err.is_already_exists());

        let err: StorageError = io::Error::other("disk on fire").into();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn test_with_path() {
        let err = StorageError::not_found("/ns/a.md").with_path("/a.md");
        assert_eq!(err.to_string(), "not found: /a.md");

        let err = StorageError::other("boom").with_path("/a.md");
        assert_eq!(err.to_string(), "boom");
    }
}
