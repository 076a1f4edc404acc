//! Durable index cache.
//!
//! Stores the last known tree shape per disk so a disk can hydrate its
//! mirror at startup without rescanning storage. Snapshots are kept as
//! JSON text in every store, the same form that crosses process
//! boundaries.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

use scriptorium_types::{now_ms, DiskId, IndexSnapshot, SnapshotError};

/// Index cache errors.
#[derive(Debug, Error)]
pub enum IndexCacheError {
    #[error("index snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("index cache sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type IndexCacheResult<T> = Result<T, IndexCacheError>;

/// Per-reindex options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    /// Write the fresh shape to the index store.
    pub persist: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self { persist: true }
    }
}

impl IndexOptions {
    /// Skip the cache write (another reindex follows immediately).
    pub fn no_persist() -> Self {
        Self { persist: false }
    }
}

/// Where index snapshots live.
#[async_trait]
pub trait IndexStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn load(&self, disk: &DiskId) -> IndexCacheResult<Option<IndexSnapshot>>;

    async fn save(&self, disk: &DiskId, snapshot: &IndexSnapshot) -> IndexCacheResult<()>;

    async fn clear(&self, disk: &DiskId) -> IndexCacheResult<()>;
}

/// Discards everything; every init rescans.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndexStore;

#[async_trait]
impl IndexStore for NoIndexStore {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn load(&self, _disk: &DiskId) -> IndexCacheResult<Option<IndexSnapshot>> {
        Ok(None)
    }

    async fn save(&self, _disk: &DiskId, _snapshot: &IndexSnapshot) -> IndexCacheResult<()> {
        Ok(())
    }

    async fn clear(&self, _disk: &DiskId) -> IndexCacheResult<()> {
        Ok(())
    }
}

/// Process-local store, shareable between disks.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    entries: DashMap<String, String>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, disk: &DiskId) -> IndexCacheResult<Option<IndexSnapshot>> {
        // Clone out of the shard before parsing
        let json = self.entries.get(disk.as_str()).map(|e| e.value().clone());
        json.map(|j| IndexSnapshot::from_json(&j))
            .transpose()
            .map_err(Into::into)
    }

    async fn save(&self, disk: &DiskId, snapshot: &IndexSnapshot) -> IndexCacheResult<()> {
        let json = snapshot.to_json()?;
        self.entries.insert(disk.as_str().to_string(), json);
        Ok(())
    }

    async fn clear(&self, disk: &DiskId) -> IndexCacheResult<()> {
        self.entries.remove(disk.as_str());
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS index_cache (
    disk_id TEXT PRIMARY KEY,
    snapshot TEXT NOT NULL,
    saved_at_ms INTEGER NOT NULL
);
"#;

/// SQLite-backed store.
pub struct SqliteIndexStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteIndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndexStore").finish_non_exhaustive()
    }
}

impl SqliteIndexStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> IndexCacheResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> IndexCacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, disk: &DiskId) -> IndexCacheResult<Option<IndexSnapshot>> {
        let json: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT snapshot FROM index_cache WHERE disk_id = ?1",
                params![disk.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| IndexSnapshot::from_json(&j))
            .transpose()
            .map_err(Into::into)
    }

    async fn save(&self, disk: &DiskId, snapshot: &IndexSnapshot) -> IndexCacheResult<()> {
        let json = snapshot.to_json()?;
        self.conn.lock().execute(
            "INSERT INTO index_cache (disk_id, snapshot, saved_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(disk_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                saved_at_ms = excluded.saved_at_ms",
            params![disk.as_str(), json, now_ms() as i64],
        )?;
        Ok(())
    }

    async fn clear(&self, disk: &DiskId) -> IndexCacheResult<()> {
        self.conn.lock().execute(
            "DELETE FROM index_cache WHERE disk_id = ?1",
            params![disk.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::FileTree;
    use scriptorium_types::{AbsPath, NodeType};

    fn snapshot() -> IndexSnapshot {
        let mut tree = FileTree::new();
        tree.insert(&AbsPath::new("/a/b.md"), NodeType::File).unwrap();
        tree.to_snapshot()
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryIndexStore::new();
        let disk = DiskId::from_string("disk-a");
        assert!(store.load(&disk).await.unwrap().is_none());

        let snap = snapshot();
        store.save(&disk, &snap).await.unwrap();
        assert_eq!(store.load(&disk).await.unwrap(), Some(snap));
        assert!(store.load(&DiskId::from_string("disk-b")).await.unwrap().is_none());

        store.clear(&disk).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_overwrites() {
        let store = SqliteIndexStore::in_memory().unwrap();
        let disk = DiskId::from_string("disk-a");

        store.save(&disk, &snapshot()).await.unwrap();
        let empty = FileTree::new().to_snapshot();
        store.save(&disk, &empty).await.unwrap();

        assert_eq!(store.load(&disk).await.unwrap(), Some(empty));
        store.clear(&disk).await.unwrap();
        assert!(store.load(&disk).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_rejects_malformed() {
        let store = SqliteIndexStore::in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO index_cache VALUES ('bad', '{\"nope\":1}', 0)",
                [],
            )
            .unwrap();
        let result = store.load(&DiskId::from_string("bad")).await;
        assert!(matches!(result, Err(IndexCacheError::Snapshot(_))));
    }

    #[tokio::test]
    async fn test_none_store() {
        let store = NoIndexStore;
        let disk = DiskId::new();
        store.save(&disk, &snapshot()).await.unwrap();
        assert!(store.load(&disk).await.unwrap().is_none());
    }
}
