//! SQLite storage backend.
//!
//! The persistent embedded database disk: one row per entry, keyed by
//! absolute path, with the parent path indexed for listing.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use scriptorium_types::{now_ms, AbsPath, NodeType};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::ops::StorageBackend;
use crate::storage::types::{DirEntry, MkdirOptions, Stat, WriteOptions};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    path TEXT PRIMARY KEY,
    parent TEXT NOT NULL,
    kind TEXT NOT NULL,
    data BLOB,
    mtime_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_parent ON entries(parent, path);
INSERT OR IGNORE INTO entries (path, parent, kind, data, mtime_ms)
    VALUES ('/', '', 'directory', NULL, 0);
"#;

/// SQLite-backed storage.
///
/// The connection sits behind a mutex; every operation is a short
/// synchronous statement (or one transaction for subtree moves).
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn kind_of(conn: &Connection, path: &AbsPath) -> StorageResult<Option<NodeType>> {
        let kind: Option<String> = conn
            .query_row(
                "SELECT kind FROM entries WHERE path = ?1",
                params![path.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        kind.map(|k| {
            k.parse::<NodeType>()
                .map_err(|_| StorageError::other(format!("corrupt kind {k:?} at {path}")))
        })
        .transpose()
    }

    fn require_parent_dir(conn: &Connection, path: &AbsPath) -> StorageResult<()> {
        let parent = path.dirname();
        match Self::kind_of(conn, &parent)? {
            Some(NodeType::Directory) => Ok(()),
            Some(NodeType::File) => Err(StorageError::not_a_directory(parent.to_string())),
            None => Err(StorageError::not_found(parent.to_string())),
        }
    }

    fn insert_dir(conn: &Connection, path: &AbsPath) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO entries (path, parent, kind, data, mtime_ms)
             VALUES (?1, ?2, 'directory', NULL, ?3)",
            params![path.as_str(), path.dirname().as_str(), now_ms() as i64],
        )?;
        Ok(())
    }

    /// Rows for `path` and everything below it.
    fn subtree(conn: &Connection, path: &AbsPath) -> StorageResult<Vec<AbsPath>> {
        let prefix = format!("{}/", path.as_str());
        let mut stmt = conn.prepare(
            "SELECT path FROM entries
             WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
        )?;
        let rows = stmt.query_map(params![path.as_str(), prefix], |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(AbsPath::new(row?));
        }
        Ok(out)
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn list(&self, path: &AbsPath) -> StorageResult<Vec<DirEntry>> {
        let conn = self.conn.lock();
        match Self::kind_of(&conn, path)? {
            Some(NodeType::Directory) => {}
            Some(NodeType::File) => return Err(StorageError::not_a_directory(path.to_string())),
            None => return Err(StorageError::not_found(path.to_string())),
        }

        let mut stmt = conn.prepare(
            "SELECT path, kind FROM entries WHERE parent = ?1 AND path != '/' ORDER BY path",
        )?;
        let rows = stmt.query_map(params![path.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (child, kind) = row?;
            let kind = kind
                .parse::<NodeType>()
                .map_err(|_| StorageError::other(format!("corrupt kind {kind:?} at {child}")))?;
            entries.push(DirEntry::new(AbsPath::new(&child).basename(), kind));
        }
        Ok(entries)
    }

    async fn stat(&self, path: &AbsPath) -> StorageResult<Stat> {
        let conn = self.conn.lock();
        let row: Option<(String, Option<i64>, i64)> = conn
            .query_row(
                "SELECT kind, length(data), mtime_ms FROM entries WHERE path = ?1",
                params![path.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (kind, size, mtime_ms) = row.ok_or_else(|| StorageError::not_found(path.to_string()))?;
        let kind = kind
            .parse::<NodeType>()
            .map_err(|_| StorageError::other(format!("corrupt kind {kind:?} at {path}")))?;
        Ok(Stat {
            kind,
            size: size.unwrap_or(0) as u64,
            mtime: (mtime_ms > 0)
                .then(|| UNIX_EPOCH + Duration::from_millis(mtime_ms as u64)),
        })
    }

    async fn read(&self, path: &AbsPath) -> StorageResult<Vec<u8>> {
        let conn = self.conn.lock();
        let row: Option<(String, Option<Vec<u8>>)> = conn
            .query_row(
                "SELECT kind, data FROM entries WHERE path = ?1",
                params![path.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((kind, _)) if kind == "directory" => {
                Err(StorageError::is_a_directory(path.to_string()))
            }
            Some((_, data)) => Ok(data.unwrap_or_default()),
            None => Err(StorageError::not_found(path.to_string())),
        }
    }

    async fn write(&self, path: &AbsPath, data: &[u8], opts: WriteOptions) -> StorageResult<()> {
        let conn = self.conn.lock();
        match Self::kind_of(&conn, path)? {
            Some(NodeType::Directory) => {
                return Err(StorageError::is_a_directory(path.to_string()));
            }
            Some(NodeType::File) if !opts.overwrite => {
                return Err(StorageError::already_exists(path.to_string()));
            }
            None if !opts.create => return Err(StorageError::not_found(path.to_string())),
            _ => {}
        }
        Self::require_parent_dir(&conn, path)?;

        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        conn.execute(
            "INSERT INTO entries (path, parent, kind, data, mtime_ms)
             VALUES (?1, ?2, 'file', ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET data = excluded.data, mtime_ms = excluded.mtime_ms",
            params![path.as_str(), path.dirname().as_str(), data, mtime],
        )?;
        Ok(())
    }

    async fn mkdir(&self, path: &AbsPath, opts: MkdirOptions) -> StorageResult<()> {
        let conn = self.conn.lock();

        if opts.recursive {
            let mut current = AbsPath::root();
            for seg in path.segments() {
                current = current.join(seg);
                match Self::kind_of(&conn, &current)? {
                    Some(NodeType::Directory) => {}
                    Some(NodeType::File) => {
                        return Err(StorageError::already_exists(current.to_string()));
                    }
                    None => Self::insert_dir(&conn, &current)?,
                }
            }
            return Ok(());
        }

        if Self::kind_of(&conn, path)?.is_some() {
            return Err(StorageError::already_exists(path.to_string()));
        }
        Self::require_parent_dir(&conn, path)?;
        Self::insert_dir(&conn, path)
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

        let mut conn = self.conn.lock();
        if Self::kind_of(&conn, from)?.is_none() {
            return Err(StorageError::not_found(from.to_string()));
        }
        if Self::kind_of(&conn, to)?.is_some() {
            return Err(StorageError::already_exists(to.to_string()));
        }
        Self::require_parent_dir(&conn, to)?;

        let moved = Self::subtree(&conn, from)?;
        let tx = conn.transaction()?;
        for old in moved {
            let Some(new) = old.rebase(from, to) else {
                continue;
            };
            tx.execute(
                "UPDATE entries SET path = ?1, parent = ?2 WHERE path = ?3",
                params![new.as_str(), new.dirname().as_str(), old.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, path: &AbsPath) -> StorageResult<()> {
        if path.is_root() {
            return Err(StorageError::invalid_operation("cannot remove root"));
        }
        let conn = self.conn.lock();
        if Self::kind_of(&conn, path)?.is_none() {
            return Err(StorageError::not_found(path.to_string()));
        }
        let prefix = format!("{}/", path.as_str());
        conn.execute(
            "DELETE FROM entries WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
            params![path.as_str(), prefix],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> AbsPath {
        AbsPath::new(s)
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let db = SqliteBackend::in_memory().unwrap();
        db.mkdir(&p("/docs"), MkdirOptions::default()).await.unwrap();
        db.write(&p("/docs/a.md"), b"alpha", WriteOptions::default())
            .await
            .unwrap();
        db.write(&p("/b.md"), b"beta", WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(db.read(&p("/docs/a.md")).await.unwrap(), b"alpha");
        assert_eq!(db.stat(&p("/b.md")).await.unwrap().size, 4);

        let root = db.list(&AbsPath::root()).await.unwrap();
        assert_eq!(root, vec![DirEntry::file("b.md"), DirEntry::directory("docs")]);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_row() {
        let db = SqliteBackend::in_memory().unwrap();
        db.write(&p("/a.md"), b"one", WriteOptions::default()).await.unwrap();
        db.write(&p("/a.md"), b"two", WriteOptions::default()).await.unwrap();
        assert_eq!(db.read(&p("/a.md")).await.unwrap(), b"two");
        assert_eq!(db.list(&AbsPath::root()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rename_subtree() {
        let db = SqliteBackend::in_memory().unwrap();
        db.write_recursive(&p("/old/sub/file.md"), b"content").await.unwrap();
        db.write_recursive(&p("/old_sibling.md"), b"s").await.unwrap();

        db.rename(&p("/old"), &p("/new")).await.unwrap();

        assert!(!db.exists(&p("/old")).await.unwrap());
        assert!(db.exists(&p("/old_sibling.md")).await.unwrap());
        assert_eq!(db.read(&p("/new/sub/file.md")).await.unwrap(), b"content");
        assert_eq!(db.list(&p("/new")).await.unwrap(), vec![DirEntry::directory("sub")]);
    }

    #[tokio::test]
    async fn test_delete_subtree_only() {
        let db = SqliteBackend::in_memory().unwrap();
        db.write_recursive(&p("/a/b.md"), b"").await.unwrap();
        db.write_recursive(&p("/a_b.md"), b"").await.unwrap();

        db.delete(&p("/a")).await.unwrap();
        assert!(!db.exists(&p("/a/b.md")).await.unwrap());
        assert!(db.exists(&p("/a_b.md")).await.unwrap());
        assert!(matches!(db.delete(&p("/a")).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_persists_across_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("disk.db");
        {
            let db = SqliteBackend::open(&file).unwrap();
            db.write_recursive(&p("/keep/me.md"), b"still here").await.unwrap();
        }
        let db = SqliteBackend::open(&file).unwrap();
        assert_eq!(db.read(&p("/keep/me.md")).await.unwrap(), b"still here");
    }
}
