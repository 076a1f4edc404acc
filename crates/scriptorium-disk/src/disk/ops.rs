//! Single-item mutations.
//!
//! Each operation holds the disk's queue lock from its first backend call
//! through the reindex, then publishes.

use scriptorium_types::{inc_path, reduce_lineage, AbsPath, DiskEvent, EventOrigin, NodeType, RenamePayload};

use super::Disk;
use crate::error::{DiskError, DiskResult};
use crate::index_cache::IndexOptions;
use crate::storage::{MkdirOptions, StorageError, WriteOptions};

impl Disk {
    /// First path at or after `wanted` (by the increment rule) that neither
    /// storage nor the tree knows about.
    async fn free_path(&self, wanted: &AbsPath) -> DiskResult<AbsPath> {
        if wanted.is_root() {
            return Err(DiskError::invalid_operation("the root cannot be a target"));
        }
        let mut candidate = wanted.clone();
        loop {
            let taken = self.file_tree().contains(&candidate)
                || self
                    .inner
                    .backend
                    .exists(&candidate)
                    .await
                    .map_err(|e| self.fail("stat", &candidate, e))?;
            if !taken {
                return Ok(candidate);
            }
            candidate = inc_path(&candidate);
        }
    }

    /// Create the missing ancestors of a destination, returning the
    /// directories this call made, outermost first.
    async fn create_parents(&self, dir: &AbsPath) -> DiskResult<Vec<AbsPath>> {
        let mut created = Vec::new();
        let mut current = AbsPath::root();
        for seg in dir.segments() {
            current = current.join(seg);
            match self.inner.backend.mkdir(&current, MkdirOptions::default()).await {
                Ok(()) => created.push(current.clone()),
                Err(StorageError::AlreadyExists(_)) => {}
                Err(e) => {
                    self.remove_created(&created).await;
                    return Err(self.fail("mkdir", &current, e));
                }
            }
        }
        Ok(created)
    }

    /// Undo [`create_parents`](Self::create_parents) after a failed move.
    async fn remove_created(&self, created: &[AbsPath]) {
        for dir in created.iter().rev() {
            if let Err(e) = self.inner.backend.delete(dir).await {
                tracing::warn!(disk_id = %self.inner.id, path = %dir, error = %e, "failed to remove directory left by failed move");
            }
        }
    }

    /// Create a file, never overwriting. Returns the path actually written.
    pub async fn new_file(&self, path: impl Into<AbsPath>, content: impl AsRef<[u8]>) -> DiskResult<AbsPath> {
        self.ready().await?;
        let wanted = path.into();
        let _op = self.inner.queue.lock().await;

        let path = self.free_path(&wanted).await?;
        self.inner
            .backend
            .write_recursive(&path, content.as_ref())
            .await
            .map_err(|e| self.fail("write", &path, e))?;
        self.reindex(IndexOptions::default()).await?;
        self.publish(DiskEvent::create(vec![path.clone()]));

        tracing::info!(disk_id = %self.inner.id, path = %path, "created file");
        Ok(path)
    }

    /// Create several files in order.
    ///
    /// Stops at the first failure. Files written before it stay written,
    /// are indexed and announced, and the failure is returned.
    pub async fn new_files<P, C>(&self, files: impl IntoIterator<Item = (P, C)>) -> DiskResult<Vec<AbsPath>>
    where
        P: Into<AbsPath>,
        C: AsRef<[u8]>,
    {
        self.ready().await?;
        let files: Vec<(AbsPath, C)> = files.into_iter().map(|(p, c)| (p.into(), c)).collect();
        let _op = self.inner.queue.lock().await;

        let mut written = Vec::with_capacity(files.len());
        let mut failure = None;
        for (wanted, content) in &files {
            let path = match self.free_path(wanted).await {
                Ok(path) => path,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            if let Err(e) = self.inner.backend.write_recursive(&path, content.as_ref()).await {
                failure = Some(self.fail("write", &path, e));
                break;
            }
            written.push(path);
        }

        if !written.is_empty() {
            self.reindex(IndexOptions::default()).await?;
            self.publish(DiskEvent::create(written.clone()));
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Create a directory (and its parents) at a free path.
    pub async fn new_dir(&self, path: impl Into<AbsPath>) -> DiskResult<AbsPath> {
        self.ready().await?;
        let wanted = path.into();
        let _op = self.inner.queue.lock().await;

        let path = self.free_path(&wanted).await?;
        self.inner
            .backend
            .mkdir_recursive(&path)
            .await
            .map_err(|e| self.fail("mkdir", &path, e))?;
        self.reindex(IndexOptions::default()).await?;
        self.publish(DiskEvent::create(vec![path.clone()]));
        Ok(path)
    }

    /// Delete a file or directory subtree.
    ///
    /// A virtual file only lives in the tree, so removing one is local.
    pub async fn remove_file(&self, path: impl Into<AbsPath>) -> DiskResult<()> {
        self.ready().await?;
        let path = path.into();
        if path.is_root() {
            return Err(DiskError::invalid_operation("cannot delete the root"));
        }
        let _op = self.inner.queue.lock().await;

        let is_virtual = self.file_tree().node(&path).is_some_and(|n| n.is_virtual());
        if is_virtual {
            self.update_tree(|tree| tree.remove(&path))?;
            self.emit_local(&DiskEvent::delete(vec![path]), EventOrigin::Local);
            return Ok(());
        }

        self.inner
            .backend
            .delete(&path)
            .await
            .map_err(|e| self.fail("delete", &path, e))?;
        self.reindex(IndexOptions::default()).await?;
        self.publish(DiskEvent::delete(vec![path]));
        Ok(())
    }

    /// Delete several paths. Descendants of other listed paths are dropped
    /// first, since deleting the ancestor removes them.
    ///
    /// Stops at the first failure, announcing what was already deleted.
    pub async fn remove_multiple_files(&self, paths: &[AbsPath]) -> DiskResult<Vec<AbsPath>> {
        self.ready().await?;
        let targets = reduce_lineage(paths);
        if targets.iter().any(AbsPath::is_root) {
            return Err(DiskError::invalid_operation("cannot delete the root"));
        }
        let _op = self.inner.queue.lock().await;

        let mut removed = Vec::with_capacity(targets.len());
        let mut failure = None;
        for path in targets {
            if let Err(e) = self.inner.backend.delete(&path).await {
                failure = Some(self.fail("delete", &path, e));
                break;
            }
            removed.push(path);
        }

        if !removed.is_empty() {
            self.reindex(IndexOptions::default()).await?;
            self.publish(DiskEvent::delete(removed.clone()));
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Move `old` to `new` (or the next free path after it).
    ///
    /// Identical paths return a no-op payload without touching storage.
    /// A destination inside the source is rejected before any backend call.
    pub async fn rename_dir_or_file(
        &self,
        old: impl Into<AbsPath>,
        new: impl Into<AbsPath>,
        kind: Option<NodeType>,
    ) -> DiskResult<RenamePayload> {
        self.ready().await?;
        let old = old.into();
        let new = new.into();

        if old == new {
            let kind = kind
                .or_else(|| self.file_tree().node(&old).map(|n| n.kind()))
                .unwrap_or(NodeType::File);
            return Ok(RenamePayload::new(old.clone(), old, kind));
        }
        if old.is_root() || new.is_root() {
            return Err(DiskError::invalid_operation("cannot rename the root"));
        }
        if new.starts_with(&old) {
            return Err(DiskError::invalid_operation(format!(
                "cannot move {old} into its own descendant {new}"
            )));
        }

        let _op = self.inner.queue.lock().await;
        // The source must exist before anything is created for the destination
        let stat = self
            .inner
            .backend
            .stat(&old)
            .await
            .map_err(|e| self.fail("stat", &old, e))?;
        let kind = kind.unwrap_or(stat.kind);

        let dest = self.free_path(&new).await?;
        let created = self.create_parents(&dest.dirname()).await?;
        if let Err(e) = self.inner.backend.rename(&old, &dest).await {
            self.remove_created(&created).await;
            return Err(self.fail("rename", &old, e));
        }
        self.reindex(IndexOptions::default()).await?;

        let payload = RenamePayload::new(old, dest, kind);
        self.publish(DiskEvent::Rename(payload.clone()));
        tracing::info!(
            disk_id = %self.inner.id,
            from = %payload.old_path,
            to = %payload.new_path,
            "renamed"
        );
        Ok(payload)
    }

    /// Move a path under the trash directory, keeping its relative layout.
    pub async fn trash(&self, path: impl Into<AbsPath>) -> DiskResult<RenamePayload> {
        let path = path.into();
        let trash_root = self.trash_root();
        if path.starts_with(&trash_root) {
            return Err(DiskError::invalid_operation(format!("{path} is already in the trash")));
        }
        let dest = trash_root.join_rel(&path.to_rel());
        self.rename_dir_or_file(path, dest, None).await
    }

    /// Move a trashed path back to where it came from.
    pub async fn untrash(&self, path: impl Into<AbsPath>) -> DiskResult<RenamePayload> {
        let path = path.into();
        let rel = path
            .strip_prefix(&self.trash_root())
            .filter(|rel| !rel.is_empty())
            .ok_or_else(|| DiskError::invalid_operation(format!("{path} is not in the trash")))?;
        self.rename_dir_or_file(path, rel.to_abs(), None).await
    }

    /// Write `content` to `path`.
    ///
    /// An existing file is overwritten in place with no shape change and
    /// no event. A new file gets its parents, an index pass and a create
    /// event.
    pub async fn write_file(&self, path: impl Into<AbsPath>, content: impl AsRef<[u8]>) -> DiskResult<AbsPath> {
        self.ready().await?;
        let path = path.into();
        let data = content.as_ref();
        let _op = self.inner.queue.lock().await;

        match self.inner.backend.stat(&path).await {
            Ok(stat) if stat.is_dir() => Err(self.fail("write", &path, StorageError::is_a_directory(path.as_str()))),
            Ok(_) => {
                self.inner
                    .backend
                    .write(&path, data, WriteOptions::existing())
                    .await
                    .map_err(|e| self.fail("write", &path, e))?;
                Ok(path)
            }
            Err(StorageError::NotFound(_)) => {
                self.inner
                    .backend
                    .write_recursive(&path, data)
                    .await
                    .map_err(|e| self.fail("write", &path, e))?;
                self.reindex(IndexOptions::default()).await?;
                self.publish(DiskEvent::create(vec![path.clone()]));
                Ok(path)
            }
            Err(e) => Err(self.fail("stat", &path, e)),
        }
    }

    /// Duplicate a file at a free path next to `to`, remembering where it
    /// came from.
    pub async fn copy_file(&self, from: impl Into<AbsPath>, to: impl Into<AbsPath>) -> DiskResult<AbsPath> {
        self.ready().await?;
        let from = from.into();
        let wanted = to.into();
        let _op = self.inner.queue.lock().await;

        let data = self
            .inner
            .backend
            .read(&from)
            .await
            .map_err(|e| self.fail("read", &from, e))?;
        let dest = self.free_path(&wanted).await?;
        self.inner
            .backend
            .write_recursive(&dest, &data)
            .await
            .map_err(|e| self.fail("write", &dest, e))?;
        self.reindex(IndexOptions::default()).await?;
        self.update_tree(|tree| tree.set_source(&dest, Some(from.clone())))?;

        self.publish(DiskEvent::create(vec![dest.clone()]));
        Ok(dest)
    }

    /// Add a file that exists only in this instance's tree until written.
    ///
    /// Announced locally only; other instances cannot read it.
    pub async fn new_virtual_file(&self, path: impl Into<AbsPath>, content: impl Into<String>) -> DiskResult<AbsPath> {
        self.ready().await?;
        let wanted = path.into();
        let _op = self.inner.queue.lock().await;

        let path = self.free_path(&wanted).await?;
        let content = content.into();
        self.update_tree(|tree| tree.insert_virtual(&path, content, None))?;
        self.emit_local(&DiskEvent::create(vec![path.clone()]), EventOrigin::Local);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{MemoryBackend, StorageBackend};
    use scriptorium_types::{DiskId, EventKind};

    fn disk() -> Disk {
        Disk::builder(DiskId::from_string("ops"), Arc::new(MemoryBackend::new()))
            .listen_remote(false)
            .build()
    }

    #[tokio::test]
    async fn test_free_path_skips_virtual_nodes() {
        let disk = disk();
        let first = disk.new_virtual_file("/draft.md", "v").await.unwrap();
        let second = disk.new_file("/draft.md", "real").await.unwrap();
        assert_eq!(first.as_str(), "/draft.md");
        assert_eq!(second.as_str(), "/draft-1.md");
    }

    #[tokio::test]
    async fn test_new_file_at_root_is_rejected() {
        let disk = disk();
        let err = disk.new_file("/", "x").await.unwrap_err();
        assert!(matches!(err, DiskError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_write_file_existing_emits_nothing() {
        let disk = disk();
        disk.new_file("/a.md", "one").await.unwrap();

        let mut sub = disk.subscribe("disk.>");
        disk.write_file("/a.md", "two").await.unwrap();
        assert!(sub.try_recv().is_none());
        assert_eq!(disk.read_text("/a.md").await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_write_file_new_creates_parents() {
        let disk = disk();
        disk.write_file("/deep/down/a.md", "x").await.unwrap();
        let node = disk.node_from_path("/deep/down").await.unwrap().unwrap();
        assert!(node.kind.is_dir());
    }

    #[tokio::test]
    async fn test_write_file_on_directory_fails() {
        let disk = disk();
        disk.new_dir("/d").await.unwrap();
        let err = disk.write_file("/d", "x").await.unwrap_err();
        assert!(matches!(err, DiskError::Storage(StorageError::IsADirectory(_))));
    }

    #[tokio::test]
    async fn test_virtual_file_materializes_on_write() {
        let disk = disk();
        disk.new_virtual_file("/v.md", "draft").await.unwrap();
        assert_eq!(disk.read_text("/v.md").await.unwrap(), "draft");
        assert!(!disk.backend().exists(&AbsPath::new("/v.md")).await.unwrap());

        // Survives an unrelated reindex
        disk.new_file("/other.md", "").await.unwrap();
        assert!(disk.node_from_path("/v.md").await.unwrap().unwrap().is_virtual);

        disk.write_file("/v.md", "final").await.unwrap();
        let node = disk.node_from_path("/v.md").await.unwrap().unwrap();
        assert!(!node.is_virtual);
        assert_eq!(disk.read_text("/v.md").await.unwrap(), "final");
    }

    #[tokio::test]
    async fn test_remove_virtual_file_is_local() {
        let disk = disk();
        disk.new_virtual_file("/v.md", "draft").await.unwrap();
        disk.remove_file("/v.md").await.unwrap();
        assert!(disk.node_from_path("/v.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_copy_file_marks_source() {
        let disk = disk();
        disk.new_file("/a.md", "body").await.unwrap();
        let copy = disk.copy_file("/a.md", "/a.md").await.unwrap();
        assert_eq!(copy.as_str(), "/a-1.md");

        let node = disk.node_from_path(&copy).await.unwrap().unwrap();
        assert_eq!(node.source, Some(AbsPath::new("/a.md")));
        assert_eq!(disk.read_text(&copy).await.unwrap(), "body");

        // Marker survives a rescan
        disk.file_tree_index(IndexOptions::no_persist()).await.unwrap();
        let node = disk.node_from_path(&copy).await.unwrap().unwrap();
        assert_eq!(node.source, Some(AbsPath::new("/a.md")));
    }

    #[tokio::test]
    async fn test_remove_multiple_reduces_lineage() {
        let disk = disk();
        disk.new_file("/dir/a.md", "").await.unwrap();
        disk.new_file("/dir/b.md", "").await.unwrap();
        disk.new_file("/c.md", "").await.unwrap();

        let removed = disk
            .remove_multiple_files(&[AbsPath::new("/dir/a.md"), AbsPath::new("/dir"), AbsPath::new("/c.md")])
            .await
            .unwrap();
        assert_eq!(removed, vec![AbsPath::new("/c.md"), AbsPath::new("/dir")]);
        assert!(disk.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_files_partial_failure_announces_written() {
        let disk = disk();
        disk.new_file("/blocker", "").await.unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = disk.on(EventKind::Create, move |event, _| {
            if let DiskEvent::Create(payload) = event {
                sink.lock().extend(payload.file_paths.clone());
            }
        });

        let err = disk
            .new_files([("/ok.md", "1"), ("/blocker/child.md", "2")])
            .await
            .unwrap_err();
        assert!(matches!(err, DiskError::Storage(StorageError::NotADirectory(_))));
        assert_eq!(*seen.lock(), vec![AbsPath::new("/ok.md")]);
        assert!(disk.node_from_path("/ok.md").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rename_stats_when_kind_missing() {
        let disk = disk();
        disk.new_dir("/src").await.unwrap();
        let payload = disk.rename_dir_or_file("/src", "/dst", None).await.unwrap();
        assert_eq!(payload.file_type, NodeType::Directory);
        assert_eq!(payload.old_name, "src");
        assert_eq!(payload.new_name, "dst");
    }

    #[tokio::test]
    async fn test_rename_to_taken_path_increments() {
        let disk = disk();
        disk.new_file("/a.md", "a").await.unwrap();
        disk.new_file("/b.md", "b").await.unwrap();
        let payload = disk.rename_dir_or_file("/a.md", "/b.md", None).await.unwrap();
        assert_eq!(payload.new_path.as_str(), "/b-1.md");
        assert_eq!(disk.read_text("/b.md").await.unwrap(), "b");
    }
}
