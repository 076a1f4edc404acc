//! Namespacing adapter.
//!
//! Lets several logical disks share one physical store: every path is
//! prefixed with the disk's namespace on the way in, and error paths are
//! stripped back into the caller's view on the way out.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

use scriptorium_types::AbsPath;

use super::error::{StorageError, StorageResult};
use super::ops::StorageBackend;
use super::types::{DirEntry, MkdirOptions, Stat, WriteOptions};

/// Prefixes every path with a logical root.
///
/// The namespace directory is created on first use. A concurrent creator
/// winning the race (`AlreadyExists`) counts as success.
pub struct NamespacedBackend {
    inner: Arc<dyn StorageBackend>,
    namespace: AbsPath,
    root_ready: OnceCell<()>,
}

impl std::fmt::Debug for NamespacedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespacedBackend")
            .field("inner", &self.inner.name())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl NamespacedBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, namespace: impl Into<AbsPath>) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
            root_ready: OnceCell::new(),
        }
    }

    pub fn namespace(&self) -> &AbsPath {
        &self.namespace
    }

    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    /// Caller path → inner path.
    fn scope(&self, path: &AbsPath) -> AbsPath {
        self.namespace.join_rel(&path.to_rel())
    }

    /// Inner error → caller error.
    fn unscope(&self, err: StorageError) -> StorageError {
        let Some(inner_path) = err.path().map(AbsPath::new) else {
            return err;
        };
        match inner_path.strip_prefix(&self.namespace) {
            Some(rel) => err.with_path(rel.to_abs().to_string()),
            None => err,
        }
    }

    async fn ensure_root(&self) -> StorageResult<()> {
        self.root_ready
            .get_or_try_init(|| async {
                match self.inner.mkdir_recursive(&self.namespace).await {
                    Ok(()) | Err(StorageError::AlreadyExists(_)) => {
                        tracing::debug!(namespace = %self.namespace, "namespace root ready");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl StorageBackend for NamespacedBackend {
    fn name(&self) -> &'static str {
        "namespaced"
    }

    async fn list(&self, path: &AbsPath) -> StorageResult<Vec<DirEntry>> {
        self.ensure_root().await?;
        self.inner
            .list(&self.scope(path))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn stat(&self, path: &AbsPath) -> StorageResult<Stat> {
        self.ensure_root().await?;
        self.inner
            .stat(&self.scope(path))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn read(&self, path: &AbsPath) -> StorageResult<Vec<u8>> {
        self.ensure_root().await?;
        self.inner
            .read(&self.scope(path))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn write(&self, path: &AbsPath, data: &[u8], opts: WriteOptions) -> StorageResult<()> {
        self.ensure_root().await?;
        self.inner
            .write(&self.scope(path), data, opts)
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn mkdir(&self, path: &AbsPath, opts: MkdirOptions) -> StorageResult<()> {
        self.ensure_root().await?;
        if path.is_root() {
            return if opts.recursive {
                Ok(())
            } else {
                Err(StorageError::already_exists("/"))
            };
        }
        self.inner
            .mkdir(&self.scope(path), opts)
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn rename(&self, from: &AbsPath, to: &AbsPath) -> StorageResult<()> {
        // The namespace root is this disk's root; never let it move
        if from.is_root() || to.is_root() {
            return Err(StorageError::invalid_operation("cannot rename root"));
        }
        self.ensure_root().await?;
        self.inner
            .rename(&self.scope(from), &self.scope(to))
            .await
            .map_err(|e| self.unscope(e))
    }

    async fn delete(&self, path: &AbsPath) -> StorageResult<()> {
        if path.is_root() {
            return Err(StorageError::invalid_operation("cannot remove root"));
        }
        self.ensure_root().await?;
        self.inner
            .delete(&self.scope(path))
            .await
            .map_err(|e| self.unscope(e))
    }
}
