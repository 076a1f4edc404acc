//! # scriptorium-disk
//!
//! A virtual file tree over pluggable storage.
//!
//! A disk:
//! - Mirrors its backend as an in-memory tree, rebuilt after every mutation
//! - Persists the tree shape so startup can skip a full scan
//! - Never overwrites on create; colliding names get a numeric suffix
//! - Announces changes locally and to other instances sharing its id
//!
//! # Key Types
//!
//! |-----------------------|--------------------------------------------|
//! | Type                  | Purpose                                    |
//! |-----------------------|--------------------------------------------|
//! | [`Disk`]              | The façade; all mutation goes through it   |
//! | [`StorageBackend`]    | Async storage contract                     |
//! | [`FileTree`]          | Arena tree mirror of a backend             |
//! | [`IndexStore`]        | Durable tree-shape cache                   |
//! | [`EventBus`]          | Per-instance listeners                     |
//! | [`RemoteHub`]         | Cross-instance channels keyed by disk id   |
//! | [`Gate`]              | Exclusive access for batch scans           |
//! | [`DiskConfig`]        | TOML configuration                         |
//! |-----------------------|--------------------------------------------|

pub mod config;
pub mod disk;
pub mod error;
pub mod events;
pub mod gate;
pub mod index_cache;
pub mod storage;
pub mod telemetry;
pub mod tree;

pub use config::{BackendConfig, DiskConfig, IndexCacheConfig};
pub use disk::{Disk, DiskBuilder, DiskPhase, ReferenceReplacer};
pub use error::{DiskError, DiskResult};
pub use events::{
    decode_remote, encode_remote, matches_pattern, Delivered, EventBus, EventSubscription,
    RemoteEnvelope, RemoteHub, Unsubscribe,
};
pub use gate::{Gate, GateGuard};
pub use index_cache::{
    IndexCacheError, IndexOptions, IndexStore, MemoryIndexStore, NoIndexStore, SqliteIndexStore,
};
pub use storage::{
    DirEntry, LocalBackend, MemoryBackend, MkdirOptions, NamespacedBackend, OriginPrivateBackend,
    SqliteBackend, Stat, StorageBackend, StorageError, StorageResult, TracedBackend, WriteOptions,
};
pub use tree::{same_shape, FileTree, NodeId, NodeInfo, SharedIter, TreeError, TreeView};

pub use scriptorium_types::{
    AbsPath, DiskEvent, DiskId, EventKind, EventOrigin, FileCategory, IndexChange, IndexSnapshot,
    NodeType, RelPath, RenamePayload,
};
