//! Storage backend implementations.

mod local;
mod memory;
mod sqlite;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
