//! Host directory backend.
//!
//! Mounts a real directory as a disk, with path security to prevent
//! escaping the root directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use scriptorium_types::{AbsPath, NodeType};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::ops::StorageBackend;
use crate::storage::types::{DirEntry, MkdirOptions, Stat, WriteOptions};

/// Host directory backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/home/amy/notes`, then `read("/daily/today.md")` reads
/// `/home/amy/notes/daily/today.md`.
///
/// Path security is enforced: a symlink pointing outside the root is
/// rejected with `PathEscapesRoot`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a disk path onto the host filesystem.
    ///
    /// `AbsPath` has no `..` segments, so only symlinks can escape; those
    /// are caught by canonicalizing the deepest existing ancestor.
    fn resolve(&self, path: &AbsPath) -> StorageResult<PathBuf> {
        let full = path
            .segments()
            .fold(self.root.clone(), |acc, seg| acc.join(seg));

        let mut existing = full.as_path();
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }
        if let Ok(canonical) = dunce::canonicalize(existing) {
            if !canonical.starts_with(&self.root) {
                return Err(StorageError::path_escapes_root(format!(
                    "{} is not under {}",
                    canonical.display(),
                    self.root.display()
                )));
            }
        }
        Ok(full)
    }

    fn io_err(path: &AbsPath) -> impl Fn(std::io::Error) -> StorageError + '_ {
        move |e| StorageError::from_io(e, path.to_string())
    }

    /// Convert std::fs::Metadata to Stat.
    fn metadata_to_stat(meta: &std::fs::Metadata) -> Stat {
        let kind = if meta.is_dir() {
            NodeType::Directory
        } else {
            NodeType::File
        };
        Stat {
            kind,
            size: if meta.is_dir() { 0 } else { meta.len() },
            mtime: meta.modified().ok(),
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn list(&self, path: &AbsPath) -> StorageResult<Vec<DirEntry>> {
        let full_path = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await.map_err(Self::io_err(path))?;

        while let Some(entry) = dir.next_entry().await.map_err(Self::io_err(path))? {
            // Follow symlinks for classification; dangling links are skipped
            let Ok(meta) = fs::metadata(entry.path()).await else {
                continue;
            };
            let kind = if meta.is_dir() {
                NodeType::Directory
            } else {
                NodeType::File
            };
            entries.push(DirEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                kind,
            ));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &AbsPath) -> StorageResult<Stat> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path).await.map_err(Self::io_err(path))?;
        Ok(Self::metadata_to_stat(&meta))
    }

    async fn read(&self, path: &AbsPath) -> StorageResult<Vec<u8>> {
        let full_path = self.resolve(path)?;
        if fs::metadata(&full_path)
            .await
            .map_err(Self::io_err(path))?
            .is_dir()
        {
            return Err(StorageError::is_a_directory(path.to_string()));
        }
        fs::read(&full_path).await.map_err(Self::io_err(path))
    }

    async fn write(&self, path: &AbsPath, data: &[u8], opts: WriteOptions) -> StorageResult<()> {
        use tokio::io::AsyncWriteExt;

        let full_path = self.resolve(path)?;

        match fs::metadata(&full_path).await {
            Ok(meta) if meta.is_dir() => {
                return Err(StorageError::is_a_directory(path.to_string()));
            }
            Ok(_) if !opts.overwrite => {
                return Err(StorageError::already_exists(path.to_string()));
            }
            Err(_) if !opts.create => return Err(StorageError::not_found(path.to_string())),
            _ => {}
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(opts.create)
            .truncate(true)
            .open(&full_path)
            .await
            .map_err(Self::io_err(path))?;
        file.write_all(data).await.map_err(Self::io_err(path))?;
        file.flush().await.map_err(Self::io_err(path))
    }

    async fn mkdir(&self, path: &AbsPath, opts: MkdirOptions) -> StorageResult<()> {
        let full_path = self.resolve(path)?;
        if opts.recursive {
            if let Ok(meta) = fs::metadata(&full_path).await {
                if !meta.is_dir() {
                    return Err(StorageError::already_exists(path.to_string()));
                }
            }
            fs::create_dir_all(&full_path)
                .await
                .map_err(Self::io_err(path))
        } else {
            fs::create_dir(&full_path).await.map_err(Self::io_err(path))
        }
    }

    async fn rename(&self, from: &AbsPath, to: &AbsPath) -> StorageResult<()> {
        if from.is_root() || to.is_root() {
            return Err(StorageError::invalid_operation("cannot rename root"));
        }
        if to.starts_with(from) && to != from {
            return Err(StorageError::invalid_operation(format!(
                "cannot move {from} into its own descendant {to}"
            )));
        }

        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;

        // fs::rename silently replaces files; the contract says it must not
        if fs::symlink_metadata(&to_path).await.is_ok() {
            return Err(StorageError::already_exists(to.to_string()));
        }
        fs::symlink_metadata(&from_path)
            .await
            .map_err(Self::io_err(from))?;

        fs::rename(&from_path, &to_path)
            .await
            .map_err(Self::io_err(to))
    }

    async fn delete(&self, path: &AbsPath) -> StorageResult<()> {
        if path.is_root() {
            return Err(StorageError::invalid_operation("cannot remove root"));
        }
        let full_path = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full_path)
            .await
            .map_err(Self::io_err(path))?;
        if meta.is_dir() {
            fs::remove_dir_all(&full_path)
                .await
                .map_err(Self::io_err(path))
        } else {
            fs::remove_file(&full_path)
                .await
                .map_err(Self::io_err(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    fn p(s: &str) -> AbsPath {
        AbsPath::new(s)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (backend, dir) = setup();

        backend
            .write(&p("/test.md"), b"hello world", WriteOptions::default())
            .await
            .unwrap();

        let data = backend.read(&p("/test.md")).await.unwrap();
        assert_eq!(data, b"hello world");
        assert!(dir.path().join("test.md").exists());
    }

    #[tokio::test]
    async fn test_mkdir_and_list() {
        let (backend, _dir) = setup();

        backend.mkdir(&p("/subdir"), MkdirOptions::default()).await.unwrap();
        backend
            .write(&p("/subdir/file.md"), b"", WriteOptions::default())
            .await
            .unwrap();
        backend
            .write(&p("/root.md"), b"", WriteOptions::default())
            .await
            .unwrap();

        let entries = backend.list(&AbsPath::root()).await.unwrap();
        assert_eq!(
            entries,
            vec![DirEntry::file("root.md"), DirEntry::directory("subdir")]
        );
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let (backend, _dir) = setup();
        assert!(matches!(
            backend.read(&p("/nope.md")).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            backend.delete(&p("/nope.md")).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mkdir_existing_is_already_exists() {
        let (backend, _dir) = setup();
        backend.mkdir(&p("/d"), MkdirOptions::default()).await.unwrap();
        let again = backend.mkdir(&p("/d"), MkdirOptions::default()).await;
        assert!(matches!(again, Err(StorageError::AlreadyExists(_))));
        backend.mkdir(&p("/d"), MkdirOptions::recursive()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_does_not_overwrite() {
        let (backend, _dir) = setup();
        backend
            .write(&p("/a.md"), b"a", WriteOptions::default())
            .await
            .unwrap();
        backend
            .write(&p("/b.md"), b"b", WriteOptions::default())
            .await
            .unwrap();

        let result = backend.rename(&p("/a.md"), &p("/b.md")).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
        assert_eq!(backend.read(&p("/b.md")).await.unwrap(), b"b");

        backend.rename(&p("/a.md"), &p("/c.md")).await.unwrap();
        assert_eq!(backend.read(&p("/c.md")).await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_delete_directory() {
        let (backend, _dir) = setup();
        backend.write_recursive(&p("/a/b/c.md"), b"x").await.unwrap();
        backend.delete(&p("/a")).await.unwrap();
        assert!(!backend.exists(&p("/a")).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_blocked() {
        let (backend, dir) = setup();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let result = backend
            .write(&p("/escape/pwned.md"), b"x", WriteOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::PathEscapesRoot(_))));
    }
}
