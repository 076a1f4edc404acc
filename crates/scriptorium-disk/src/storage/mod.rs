//! Storage layer.
//!
//! One filesystem contract ([`StorageBackend`]) over several physical
//! stores, plus adapters that wrap any backend:
//!
//! - [`NamespacedBackend`] gives each logical disk its own root inside a
//!   shared store.
//! - [`OriginPrivateBackend`] models a handle-based sandbox.
//! - [`TracedBackend`] adds spans and an in-flight counter.

pub mod backends;
mod error;
mod namespaced;
mod ops;
mod origin_private;
mod traced;
mod types;

pub use backends::{LocalBackend, MemoryBackend, SqliteBackend};
pub use error::{StorageError, StorageResult};
pub use namespaced::NamespacedBackend;
pub use ops::StorageBackend;
pub use origin_private::OriginPrivateBackend;
pub use traced::TracedBackend;
pub use types::{DirEntry, EntryKind, MkdirOptions, Stat, WriteOptions};
