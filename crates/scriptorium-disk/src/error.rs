//! Disk-level error types.

use thiserror::Error;

use crate::index_cache::IndexCacheError;
use crate::storage::StorageError;
use crate::tree::TreeError;

/// Errors surfaced by [`Disk`](crate::Disk) operations.
///
/// Backend `NotFound`, `AlreadyExists` and `InvalidOperation` are lifted
/// into the matching variants here; every other backend failure stays in
/// `Storage` unchanged.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("disk has been torn down")]
    TornDown,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    IndexCache(#[from] IndexCacheError),

    #[error(transparent)]
    Storage(StorageError),
}

impl DiskError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<StorageError> for DiskError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(p) => Self::NotFound(p),
            StorageError::AlreadyExists(p) => Self::AlreadyExists(p),
            StorageError::InvalidOperation(m) => Self::InvalidOperation(m),
            other => Self::Storage(other),
        }
    }
}

impl From<TreeError> for DiskError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound(p) => Self::NotFound(p.to_string()),
            TreeError::AlreadyExists(p) => Self::AlreadyExists(p.to_string()),
            TreeError::NotADirectory(p) => Self::InvalidOperation(format!("not a directory: {p}")),
            TreeError::InvalidOperation(m) => Self::InvalidOperation(m),
        }
    }
}

/// Disk result type.
pub type DiskResult<T> = Result<T, DiskError>;
