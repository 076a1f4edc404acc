//! Sandboxed origin-private storage.
//!
//! Models a handle-based sandbox: there is no addressable root handle and
//! no atomic directory move. The root is synthesized for `list`/`stat`,
//! and renames are carried out as copy-then-delete.

use async_trait::async_trait;
use std::sync::Arc;

use scriptorium_types::{AbsPath, NodeType};

use super::error::{StorageError, StorageResult};
use super::namespaced::NamespacedBackend;
use super::ops::StorageBackend;
use super::types::{DirEntry, MkdirOptions, Stat, WriteOptions};

/// Origin-private storage over a namespaced area of another store.
#[derive(Debug)]
pub struct OriginPrivateBackend {
    store: NamespacedBackend,
}

impl OriginPrivateBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, namespace: impl Into<AbsPath>) -> Self {
        Self {
            store: NamespacedBackend::new(inner, namespace),
        }
    }

    /// Copy `from` (file or directory) to `to`, depth first.
    ///
    /// Boxed for recursion through async.
    fn copy_tree<'a>(
        &'a self,
        from: &'a AbsPath,
        to: &'a AbsPath,
    ) -> futures::future::BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            match self.store.stat(from).await?.kind {
                NodeType::File => {
                    let data = self.store.read(from).await?;
                    self.store.write(to, &data, WriteOptions::create_new()).await
                }
                NodeType::Directory => {
                    self.store.mkdir(to, MkdirOptions::default()).await?;
                    for entry in self.store.list(from).await? {
                        self.copy_tree(&from.join(&entry.name), &to.join(&entry.name))
                            .await?;
                    }
                    Ok(())
                }
            }
        })
    }
}

#[async_trait]
impl StorageBackend for OriginPrivateBackend {
    fn name(&self) -> &'static str {
        "origin_private"
    }

    async fn list(&self, path: &AbsPath) -> StorageResult<Vec<DirEntry>> {
        match self.store.list(path).await {
            Err(StorageError::NotFound(_)) if path.is_root() => Ok(Vec::new()),
            other => other,
        }
    }

    async fn stat(&self, path: &AbsPath) -> StorageResult<Stat> {
        if path.is_root() {
            return Ok(Stat::directory());
        }
        self.store.stat(path).await
    }

    async fn read(&self, path: &AbsPath) -> StorageResult<Vec<u8>> {
        self.store.read(path).await
    }

    async fn write(&self, path: &AbsPath, data: &[u8], opts: WriteOptions) -> StorageResult<()> {
        self.store.write(path, data, opts).await
    }

    async fn mkdir(&self, path: &AbsPath, opts: MkdirOptions) -> StorageResult<()> {
        self.store.mkdir(path, opts).await
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
        if self.store.exists(to).await? {
            return Err(StorageError::already_exists(to.to_string()));
        }
        if !self.store.exists(&to.dirname()).await? {
            return Err(StorageError::not_found(to.dirname().to_string()));
        }

        // Not atomic: a failure part way leaves a partial copy at `to`
        self.copy_tree(from, to).await?;
        self.store.delete(from).await
    }

    async fn delete(&self, path: &AbsPath) -> StorageResult<()> {
        self.store.delete(path).await
    }
}
