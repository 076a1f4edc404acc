//! Arena node types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use scriptorium_types::{AbsPath, FileCategory, NodeType};

/// Index of a node in its [`FileTree`](super::FileTree) arena.
///
/// Only meaningful for the tree that issued it; ids of removed nodes may
/// be reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// One file or directory in the tree mirror.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) path: AbsPath,
    pub(crate) kind: NodeType,
    pub(crate) parent: Option<NodeId>,
    /// Basename → child, directories only.
    pub(crate) children: BTreeMap<String, NodeId>,
    /// Children in sibling sort order.
    pub(crate) order: Vec<NodeId>,
    pub(crate) source: Option<AbsPath>,
    pub(crate) virtual_content: Option<String>,
    pub(crate) is_virtual: bool,
}

impl Node {
    pub(crate) fn new(path: AbsPath, kind: NodeType, parent: Option<NodeId>) -> Self {
        Self {
            path,
            kind,
            parent,
            children: BTreeMap::new(),
            order: Vec::new(),
            source: None,
            virtual_content: None,
            is_virtual: false,
        }
    }

    pub fn path(&self) -> &AbsPath {
        &self.path
    }

    pub fn basename(&self) -> &str {
        self.path.basename()
    }

    pub fn dirname(&self) -> AbsPath {
        self.path.dirname()
    }

    pub fn depth(&self) -> usize {
        self.path.depth()
    }

    pub fn kind(&self) -> NodeType {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn category(&self) -> FileCategory {
        FileCategory::from_path(&self.path)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Where this node was copied or derived from.
    pub fn source(&self) -> Option<&AbsPath> {
        self.source.as_ref()
    }

    pub fn virtual_content(&self) -> Option<&str> {
        self.virtual_content.as_deref()
    }

    /// No backing storage entry (yet).
    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn child_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_dotfile(&self) -> bool {
        self.path.segments().any(|s| s.starts_with('.'))
    }
}

/// Owned, read-only view of a node for collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub path: AbsPath,
    pub basename: String,
    pub dirname: AbsPath,
    pub depth: usize,
    #[serde(rename = "type")]
    pub kind: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AbsPath>,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_content: Option<String>,
    /// Direct children in sibling order (empty for files).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AbsPath>,
}

impl NodeInfo {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn category(&self) -> FileCategory {
        FileCategory::from_path(&self.path)
    }
}
