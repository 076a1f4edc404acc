//! Serializable index snapshot.
//!
//! The persisted shape of a disk's tree mirror:
//! `{ path, basename, dirname, depth, type, children? }`, nested.
//! Directories always carry `children` (possibly empty); files never do.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kind::NodeType;
use crate::path::AbsPath;

/// Snapshot decoding errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

/// One node of the snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub path: AbsPath,
    pub basename: String,
    pub dirname: AbsPath,
    pub depth: usize,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<SnapshotNode>>,
}

impl SnapshotNode {
    /// Build a node with the derived fields filled from `path`.
    pub fn new(path: AbsPath, node_type: NodeType) -> Self {
        Self {
            basename: path.basename().to_string(),
            dirname: path.dirname(),
            depth: path.depth(),
            children: node_type.is_dir().then(Vec::new),
            node_type,
            path,
        }
    }

    /// Depth-first visit of this node and its descendants.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a SnapshotNode)) {
        f(self);
        if let Some(children) = &self.children {
            for child in children {
                child.visit(f);
            }
        }
    }
}

/// A timestamped root snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// When the root was created, in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    pub root: SnapshotNode,
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl IndexSnapshot {
    pub fn new(root: SnapshotNode, created_at_ms: u64) -> Self {
        Self { created_at_ms, root }
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and check the structural invariants.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: IndexSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Root must be `/` and every child must sit directly under its parent.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if !self.root.path.is_root() || !self.root.node_type.is_dir() {
            return Err(SnapshotError::Malformed(format!(
                "root must be a directory at /, got {} ({})",
                self.root.path, self.root.node_type
            )));
        }
        fn check(node: &SnapshotNode) -> Result<(), SnapshotError> {
            match (&node.children, node.node_type) {
                (Some(children), NodeType::Directory) => {
                    for child in children {
                        if child.path.dirname() != node.path || child.path.is_root() {
                            return Err(SnapshotError::Malformed(format!(
                                "{} is not a child of {}",
                                child.path, node.path
                            )));
                        }
                        check(child)?;
                    }
                    Ok(())
                }
                (Some(_), NodeType::File) => Err(SnapshotError::Malformed(format!(
                    "file {} has children",
                    node.path
                ))),
                (None, _) => Ok(()),
            }
        }
        check(&self.root)
    }

    /// True when older than `max_age` relative to `now_ms`.
    pub fn is_stale(&self, max_age: Duration, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > max_age.as_millis() as u64
    }

    /// Every (path, type) pair except the root.
    pub fn shape(&self) -> BTreeSet<(AbsPath, NodeType)> {
        let mut out = BTreeSet::new();
        self.root.visit(&mut |n| {
            if !n.path.is_root() {
                out.insert((n.path.clone(), n.node_type));
            }
        });
        out
    }
}
