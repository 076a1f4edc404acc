//! Shared value types for scriptorium disks.
//!
//! A leaf crate with no async code and no I/O: the path algebra every
//! layer agrees on, the structural event vocabulary, and the persisted
//! index snapshot shape.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`AbsPath`]       | Normalized absolute path (`/a/b.md`)         |
//! | [`RelPath`]       | Normalized relative path (`a/b.md`)          |
//! | [`DiskId`]        | Which logical disk                           |
//! | [`NodeType`]      | File or directory                            |
//! | [`FileCategory`]  | Image / markdown / text / other              |
//! | [`DiskEvent`]     | Create, rename, delete, index change         |
//! | [`IndexSnapshot`] | Persisted tree shape                         |
//! |-------------------|----------------------------------------------|

pub mod event;
pub mod ids;
pub mod kind;
pub mod path;
pub mod snapshot;

pub use event::{
    CreatePayload, DeletePayload, DiskEvent, EventKind, EventOrigin, IndexChange, RenamePayload,
    WritePayload,
};
pub use ids::DiskId;
pub use kind::{FileCategory, NodeType};
pub use path::{
    abs_path, decode_path, encode_path, inc_name, inc_path, is_ancestor, join_path, reduce_lineage,
    rel_path, AbsPath, RelPath,
};
pub use snapshot::{now_ms, IndexSnapshot, SnapshotError, SnapshotNode};
