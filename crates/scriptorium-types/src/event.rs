//! Structural change events.
//!
//! Events are plain values: cloned into every local subscriber and
//! serialized to JSON when they cross an execution-context boundary.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::kind::NodeType;
use crate::path::AbsPath;

/// Where an event was produced, relative to the receiving disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventOrigin {
    /// Produced by an operation on this disk instance.
    #[default]
    Local,
    /// Received from another instance sharing the same disk id.
    Remote,
}

/// The four subscription kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Create,
    Rename,
    Delete,
    Index,
}

/// New paths, after free-path resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayload {
    pub file_paths: Vec<AbsPath>,
}

/// A single rename or move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePayload {
    pub old_path: AbsPath,
    pub old_name: String,
    pub new_path: AbsPath,
    pub new_name: String,
    pub file_type: NodeType,
}

impl RenamePayload {
    pub fn new(old_path: AbsPath, new_path: AbsPath, file_type: NodeType) -> Self {
        Self {
            old_name: old_path.basename().to_string(),
            new_name: new_path.basename().to_string(),
            old_path,
            new_path,
            file_type,
        }
    }

    /// True for the identical-path short circuit.
    pub fn is_noop(&self) -> bool {
        self.old_path == self.new_path
    }
}

/// Removed paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePayload {
    pub file_paths: Vec<AbsPath>,
}

/// Files whose content was rewritten without changing the tree shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePayload {
    pub file_paths: Vec<AbsPath>,
}

/// What caused an index change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum IndexChange {
    Create(CreatePayload),
    Rename(RenamePayload),
    Delete(DeletePayload),
    Write(WritePayload),
    /// Full rescan with no single cause (init, remote refresh).
    Rebuild,
}

impl IndexChange {
    pub fn trigger(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Rename(_) => "rename",
            Self::Delete(_) => "delete",
            Self::Write(_) => "write",
            Self::Rebuild => "rebuild",
        }
    }
}

/// A structural change on a disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiskEvent {
    Create(CreatePayload),
    Rename(RenamePayload),
    Delete(DeletePayload),
    Index { change: IndexChange },
}

impl DiskEvent {
    pub fn create(file_paths: Vec<AbsPath>) -> Self {
        Self::Create(CreatePayload { file_paths })
    }

    pub fn delete(file_paths: Vec<AbsPath>) -> Self {
        Self::Delete(DeletePayload { file_paths })
    }

    pub fn index(change: IndexChange) -> Self {
        Self::Index { change }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Create(_) => EventKind::Create,
            Self::Rename(_) => EventKind::Rename,
            Self::Delete(_) => EventKind::Delete,
            Self::Index { .. } => EventKind::Index,
        }
    }

    /// Subject string used in logs (`disk.create`, `disk.index`, ...).
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Create(_) => "disk.create",
            Self::Rename(_) => "disk.rename",
            Self::Delete(_) => "disk.delete",
            Self::Index { .. } => "disk.index",
        }
    }

    /// The index event that accompanies this structural event.
    ///
    /// `None` for index events themselves.
    pub fn to_index_change(&self) -> Option<IndexChange> {
        match self {
            Self::Create(p) => Some(IndexChange::Create(p.clone())),
            Self::Rename(p) => Some(IndexChange::Rename(p.clone())),
            Self::Delete(p) => Some(IndexChange::Delete(p.clone())),
            Self::Index { .. } => None,
        }
    }
}
