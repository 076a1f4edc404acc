//! The storage backend contract.

use async_trait::async_trait;

use scriptorium_types::AbsPath;

use super::error::{StorageError, StorageResult};
use super::types::{DirEntry, MkdirOptions, Stat, WriteOptions};

/// Storage operations every backend provides.
///
/// Paths are absolute within the backend's own namespace. Expected
/// failure kinds:
///
/// - `list`/`stat`/`read`/`delete` on a missing path: `NotFound`.
/// - `mkdir` on an existing entry (non-recursive): `AlreadyExists`.
/// - `rename` onto an existing destination: `AlreadyExists`.
/// - `rename`/`delete` of the root: `InvalidOperation`.
///
/// `delete` removes directories recursively.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Directory entries, sorted by name.
    async fn list(&self, path: &AbsPath) -> StorageResult<Vec<DirEntry>>;

    /// Entry metadata.
    async fn stat(&self, path: &AbsPath) -> StorageResult<Stat>;

    /// Whole file contents.
    async fn read(&self, path: &AbsPath) -> StorageResult<Vec<u8>>;

    /// Write whole file contents. The parent must exist.
    async fn write(&self, path: &AbsPath, data: &[u8], opts: WriteOptions) -> StorageResult<()>;

    /// Create a directory.
    async fn mkdir(&self, path: &AbsPath, opts: MkdirOptions) -> StorageResult<()>;

    /// Move a file or directory. The destination parent must exist.
    async fn rename(&self, from: &AbsPath, to: &AbsPath) -> StorageResult<()>;

    /// Remove a file, or a directory and everything below it.
    async fn delete(&self, path: &AbsPath) -> StorageResult<()>;

    /// Links are unsupported unless a backend overrides these.
    async fn symlink(&self, path: &AbsPath, _target: &AbsPath) -> StorageResult<()> {
        Err(StorageError::invalid_operation(format!(
            "{}: symlinks not supported ({path})",
            self.name()
        )))
    }

    async fn readlink(&self, path: &AbsPath) -> StorageResult<AbsPath> {
        Err(StorageError::invalid_operation(format!(
            "{}: symlinks not supported ({path})",
            self.name()
        )))
    }

    /// Check if a path exists. Errors other than `NotFound` propagate.
    async fn exists(&self, path: &AbsPath) -> StorageResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create `path` and every missing ancestor, one level at a time.
    ///
    /// `AlreadyExists` at any level counts as success; every other failure
    /// stops the walk and is returned.
    async fn mkdir_recursive(&self, path: &AbsPath) -> StorageResult<()> {
        let mut current = AbsPath::root();
        for seg in path.segments() {
            current = current.join(seg);
            match self.mkdir(&current, MkdirOptions::default()).await {
                Ok(()) | Err(StorageError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Create missing parents, then write.
    ///
    /// Fails fast: any parent-creation error other than `AlreadyExists`
    /// aborts before the write is attempted.
    async fn write_recursive(&self, path: &AbsPath, data: &[u8]) -> StorageResult<()> {
        self.mkdir_recursive(&path.dirname()).await?;
        self.write(path, data, WriteOptions::default()).await
    }
}
