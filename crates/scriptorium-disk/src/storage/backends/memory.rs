//! In-memory storage backend.
//!
//! Used for scratch disks and testing. All data is ephemeral.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::SystemTime;

use scriptorium_types::{AbsPath, NodeType};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::ops::StorageBackend;
use crate::storage::types::{DirEntry, MkdirOptions, Stat, WriteOptions};

/// Entry in the memory store.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, mtime: SystemTime },
    Directory,
}

impl Entry {
    fn kind(&self) -> NodeType {
        match self {
            Entry::File { .. } => NodeType::File,
            Entry::Directory => NodeType::Directory,
        }
    }

    fn stat(&self) -> Stat {
        match self {
            Entry::File { data, mtime } => Stat {
                kind: NodeType::File,
                size: data.len() as u64,
                mtime: Some(*mtime),
            },
            Entry::Directory => Stat::directory(),
        }
    }
}

/// In-memory storage backend.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<AbsPath, Entry>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty store.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        // Root directory always exists
        entries.insert(AbsPath::root(), Entry::Directory);
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Number of entries, root included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    fn require_parent_dir(entries: &BTreeMap<AbsPath, Entry>, path: &AbsPath) -> StorageResult<()> {
        let parent = path.dirname();
        match entries.get(&parent) {
            Some(Entry::Directory) => Ok(()),
            Some(_) => Err(StorageError::not_a_directory(parent.to_string())),
            None => Err(StorageError::not_found(parent.to_string())),
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, path: &AbsPath) -> StorageResult<Vec<DirEntry>> {
        let entries = self.entries.read();

        match entries.get(path) {
            Some(Entry::Directory) => {}
            Some(_) => return Err(StorageError::not_a_directory(path.to_string())),
            None => return Err(StorageError::not_found(path.to_string())),
        }

        // BTreeMap order gives a name-sorted listing
        let result = entries
            .iter()
            .filter(|(p, _)| !p.is_root() && &p.dirname() == path)
            .map(|(p, e)| DirEntry::new(p.basename(), e.kind()))
            .collect();
        Ok(result)
    }

    async fn stat(&self, path: &AbsPath) -> StorageResult<Stat> {
        self.entries
            .read()
            .get(path)
            .map(Entry::stat)
            .ok_or_else(|| StorageError::not_found(path.to_string()))
    }

    async fn read(&self, path: &AbsPath) -> StorageResult<Vec<u8>> {
        match self.entries.read().get(path) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(Entry::Directory) => Err(StorageError::is_a_directory(path.to_string())),
            None => Err(StorageError::not_found(path.to_string())),
        }
    }

    async fn write(&self, path: &AbsPath, data: &[u8], opts: WriteOptions) -> StorageResult<()> {
        let mut entries = self.entries.write();

        match entries.get(path) {
            Some(Entry::Directory) => return Err(StorageError::is_a_directory(path.to_string())),
            Some(Entry::File { .. }) if !opts.overwrite => {
                return Err(StorageError::already_exists(path.to_string()));
            }
            None if !opts.create => return Err(StorageError::not_found(path.to_string())),
            _ => {}
        }
        Self::require_parent_dir(&entries, path)?;

        entries.insert(
            path.clone(),
            Entry::File {
                data: data.to_vec(),
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn mkdir(&self, path: &AbsPath, opts: MkdirOptions) -> StorageResult<()> {
        let mut entries = self.entries.write();

        if opts.recursive {
            let mut current = AbsPath::root();
            for seg in path.segments() {
                current = current.join(seg);
                match entries.get(&current) {
                    Some(Entry::Directory) => {}
                    Some(_) => return Err(StorageError::already_exists(current.to_string())),
                    None => {
                        entries.insert(current.clone(), Entry::Directory);
                    }
                }
            }
            return Ok(());
        }

        if entries.contains_key(path) {
            return Err(StorageError::already_exists(path.to_string()));
        }
        Self::require_parent_dir(&entries, path)?;
        entries.insert(path.clone(), Entry::Directory);
        Ok(())
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

        let mut entries = self.entries.write();

        if !entries.contains_key(from) {
            return Err(StorageError::not_found(from.to_string()));
        }
        if entries.contains_key(to) {
            return Err(StorageError::already_exists(to.to_string()));
        }
        Self::require_parent_dir(&entries, to)?;

        // Move the entry and, for directories, everything beneath it
        let moved: Vec<AbsPath> = entries
            .keys()
            .filter(|k| k.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            if let (Some(entry), Some(new)) = (entries.remove(&old), old.rebase(from, to)) {
                entries.insert(new, entry);
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &AbsPath) -> StorageResult<()> {
        if path.is_root() {
            return Err(StorageError::invalid_operation("cannot remove root"));
        }

        let mut entries = self.entries.write();
        if !entries.contains_key(path) {
            return Err(StorageError::not_found(path.to_string()));
        }
        entries.retain(|k, _| !k.starts_with(path));
        Ok(())
    }
}
