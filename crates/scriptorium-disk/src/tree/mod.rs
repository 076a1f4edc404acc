//! In-memory tree mirror.
//!
//! An arena of [`Node`]s addressed by [`NodeId`]. Parent and child links
//! are ids, so there are no ownership cycles. Every node's path is exactly
//! `parent.path / basename`; renames and moves rewrite the whole subtree.
//!
//! Sibling order (see [`sort`]) is recomputed whenever a directory's child
//! set changes.

mod iter;
mod node;
pub mod sort;

use std::collections::BTreeSet;
use std::future::Future;
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use scriptorium_types::{now_ms, AbsPath, IndexSnapshot, NodeType, RelPath, SnapshotNode};

pub use iter::{Iter, SharedIter};
pub use node::{Node, NodeId, NodeInfo};
use sort::{compare, SortKey};

/// Tree mutation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("no node at {0}")]
    NotFound(AbsPath),

    #[error("node already exists at {0}")]
    AlreadyExists(AbsPath),

    #[error("not a directory: {0}")]
    NotADirectory(AbsPath),

    #[error("invalid tree operation: {0}")]
    InvalidOperation(String),
}

pub type TreeResult<T> = Result<T, TreeError>;

/// Filtered projections of a tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TreeView {
    #[default]
    All,
    /// Drop every node whose basename starts with `.` (and its subtree).
    HideDotfiles,
    /// Only the trash directory and what is in it.
    TrashOnly,
    /// Everything except the trash directory.
    HideTrash,
}

/// The tree mirror.
#[derive(Clone, Debug)]
pub struct FileTree {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    root: NodeId,
    created_at_ms: u64,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    /// An empty tree: just the root directory.
    pub fn new() -> Self {
        Self::with_created_at(now_ms())
    }

    fn with_created_at(created_at_ms: u64) -> Self {
        Self {
            slots: vec![Some(Node::new(AbsPath::root(), NodeType::Directory, None))],
            free: Vec::new(),
            root: NodeId(0),
            created_at_ms,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// When this root was built (ms since the Unix epoch).
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Exact lookup; `None` if any segment is missing.
    pub fn node_from_path(&self, path: &AbsPath) -> Option<NodeId> {
        self.lookup(self.root, &path.to_rel())
    }

    fn lookup(&self, dir: NodeId, rest: &RelPath) -> Option<NodeId> {
        match rest.split_first() {
            None => Some(dir),
            Some((first, tail)) => {
                let child = *self.get(dir)?.children.get(first)?;
                self.lookup(child, &tail)
            }
        }
    }

    /// Node at `path`.
    pub fn node(&self, path: &AbsPath) -> Option<&Node> {
        self.node_from_path(path).and_then(|id| self.get(id))
    }

    pub fn contains(&self, path: &AbsPath) -> bool {
        self.node_from_path(path).is_some()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Direct children in sibling order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.order.as_slice()).unwrap_or(&[])
    }

    /// Owned view of one node.
    pub fn info(&self, id: NodeId) -> Option<NodeInfo> {
        let node = self.get(id)?;
        Some(NodeInfo {
            path: node.path.clone(),
            basename: node.basename().to_string(),
            dirname: node.dirname(),
            depth: node.depth(),
            kind: node.kind,
            source: node.source.clone(),
            is_virtual: node.is_virtual,
            virtual_content: node.virtual_content.clone(),
            children: node
                .order
                .iter()
                .filter_map(|c| self.get(*c).map(|n| n.path.clone()))
                .collect(),
        })
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True when only the root exists.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Lazy pre-order traversal of the whole tree, root first.
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self, self.root)
    }

    /// Lazy pre-order traversal of the subtree at `id`.
    pub fn iter_from(&self, id: NodeId) -> Iter<'_> {
        Iter::new(self, id)
    }

    /// Lazy traversal yielding only nodes that pass `filter`.
    ///
    /// Rejected directories are still descended into.
    pub fn iter_where<'a, F>(&'a self, mut filter: F) -> impl Iterator<Item = &'a Node> + 'a
    where
        F: FnMut(&Node) -> bool + 'a,
    {
        self.iter().map(|(_, n)| n).filter(move |n| filter(n))
    }

    /// Depth-first pre-order walk; `Break` stops it.
    pub fn walk<F>(&self, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(NodeId, &Node) -> ControlFlow<()>,
    {
        for (id, node) in self.iter() {
            if visit(id, node).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Like [`walk`](Self::walk) with an async visitor.
    ///
    /// The visitor receives owned views so it can hold them across awaits.
    pub async fn walk_async<F, Fut>(&self, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(NodeInfo) -> Fut,
        Fut: Future<Output = ControlFlow<()>>,
    {
        for (id, _) in self.iter() {
            let Some(info) = self.info(id) else { continue };
            if visit(info).await.is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Every node except the root, pre-order.
    pub fn all(&self) -> Vec<NodeInfo> {
        self.iter()
            .filter(|(id, _)| *id != self.root)
            .filter_map(|(id, _)| self.info(id))
            .collect()
    }

    /// Every path except the root, pre-order.
    pub fn paths(&self) -> Vec<AbsPath> {
        self.iter()
            .filter(|(id, _)| *id != self.root)
            .map(|(_, n)| n.path.clone())
            .collect()
    }

    /// Virtual nodes, pre-order.
    pub fn virtual_nodes(&self) -> Vec<NodeInfo> {
        self.iter()
            .filter(|(_, n)| n.is_virtual)
            .filter_map(|(id, _)| self.info(id))
            .collect()
    }

    /// (path, type) of every stored node; root and virtual nodes excluded.
    pub fn shape(&self) -> BTreeSet<(AbsPath, NodeType)> {
        self.iter()
            .filter(|(id, n)| *id != self.root && !n.is_virtual)
            .map(|(_, n)| (n.path.clone(), n.kind))
            .collect()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                NodeId(idx)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    /// Recompute sibling order for a directory.
    fn resort(&mut self, dir: NodeId) {
        let Some(node) = self.get(dir) else { return };
        let mut keyed: Vec<(NodeId, SortKey<'_>)> = node
            .children
            .values()
            .filter_map(|id| {
                self.get(*id).map(|c| {
                    (
                        *id,
                        SortKey {
                            kind: c.kind,
                            category: c.category(),
                            name: c.basename(),
                        },
                    )
                })
            })
            .collect();
        keyed.sort_by(|a, b| compare(&a.1, &b.1));
        let order: Vec<NodeId> = keyed.into_iter().map(|(id, _)| id).collect();
        if let Some(node) = self.get_mut(dir) {
            node.order = order;
        }
    }

    /// Add `name` under `parent`, or return the existing child of that kind.
    fn attach(&mut self, parent: NodeId, name: &str, kind: NodeType) -> TreeResult<NodeId> {
        let parent_node = self
            .get(parent)
            .ok_or_else(|| TreeError::InvalidOperation(format!("stale node id {parent:?}")))?;
        if !parent_node.is_dir() {
            return Err(TreeError::NotADirectory(parent_node.path.clone()));
        }
        if let Some(existing) = parent_node.children.get(name).copied() {
            return match self.get(existing) {
                Some(n) if n.kind == kind => Ok(existing),
                _ => Err(TreeError::AlreadyExists(parent_node.path.join(name))),
            };
        }

        let path = parent_node.path.join(name);
        let id = self.alloc(Node::new(path, kind, Some(parent)));
        if let Some(p) = self.get_mut(parent) {
            p.children.insert(name.to_string(), id);
        }
        self.resort(parent);
        Ok(id)
    }

    /// Directory at `path`, creating missing ancestors.
    fn ensure_dir(&mut self, path: &AbsPath) -> TreeResult<NodeId> {
        let mut current = self.root;
        for seg in path.segments() {
            current = self.attach(current, seg, NodeType::Directory)?;
        }
        Ok(current)
    }

    /// Insert a node, creating missing ancestor directories.
    ///
    /// Inserting an existing path of the same kind returns its id.
    pub fn insert(&mut self, path: &AbsPath, kind: NodeType) -> TreeResult<NodeId> {
        if path.is_root() {
            return match kind {
                NodeType::Directory => Ok(self.root),
                NodeType::File => Err(TreeError::AlreadyExists(path.clone())),
            };
        }
        let parent = self.ensure_dir(&path.dirname())?;
        self.attach(parent, path.basename(), kind)
    }

    /// Insert a file that has no storage entry yet.
    pub fn insert_virtual(
        &mut self,
        path: &AbsPath,
        content: impl Into<String>,
        source: Option<AbsPath>,
    ) -> TreeResult<NodeId> {
        if let Some(existing) = self.node(path) {
            if !existing.is_virtual {
                return Err(TreeError::AlreadyExists(path.clone()));
            }
        }
        let id = self.insert(path, NodeType::File)?;
        if let Some(node) = self.get_mut(id) {
            node.is_virtual = true;
            node.virtual_content = Some(content.into());
            node.source = source;
        }
        Ok(id)
    }

    /// Clear the virtual marker once storage has caught up.
    pub fn materialize(&mut self, path: &AbsPath) -> bool {
        let Some(id) = self.node_from_path(path) else {
            return false;
        };
        match self.get_mut(id) {
            Some(node) if node.is_virtual => {
                node.is_virtual = false;
                node.virtual_content = None;
                true
            }
            _ => false,
        }
    }

    /// Record where a node was copied from.
    pub fn set_source(&mut self, path: &AbsPath, source: Option<AbsPath>) -> TreeResult<()> {
        let id = self
            .node_from_path(path)
            .ok_or_else(|| TreeError::NotFound(path.clone()))?;
        if let Some(node) = self.get_mut(id) {
            node.source = source;
        }
        Ok(())
    }

    /// Drop the subtree at `id` from the arena.
    fn free_subtree(&mut self, id: NodeId) -> Vec<AbsPath> {
        let ids: Vec<NodeId> = self.iter_from(id).map(|(id, _)| id).collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.slots.get_mut(id.0).and_then(Option::take) {
                removed.push(node.path);
                self.free.push(id.0);
            }
        }
        removed
    }

    fn detach(&mut self, id: NodeId) {
        let Some((parent, name)) = self
            .get(id)
            .and_then(|n| n.parent.map(|p| (p, n.basename().to_string())))
        else {
            return;
        };
        if let Some(p) = self.get_mut(parent) {
            p.children.remove(&name);
            p.order.retain(|c| *c != id);
        }
    }

    /// Prune the subtree at `path`. Returns the removed paths, pre-order.
    pub fn remove(&mut self, path: &AbsPath) -> TreeResult<Vec<AbsPath>> {
        if path.is_root() {
            return Err(TreeError::InvalidOperation("cannot remove root".into()));
        }
        let id = self
            .node_from_path(path)
            .ok_or_else(|| TreeError::NotFound(path.clone()))?;
        self.detach(id);
        Ok(self.free_subtree(id))
    }

    /// Rename in place: same parent, new basename.
    pub fn rename(&mut self, path: &AbsPath, new_basename: &str) -> TreeResult<AbsPath> {
        let to = path.with_basename(new_basename);
        self.move_to(path, &to)
    }

    /// Move under a different directory, keeping the basename.
    pub fn move_node(&mut self, path: &AbsPath, new_parent: &AbsPath) -> TreeResult<AbsPath> {
        let to = new_parent.join(path.basename());
        self.move_to(path, &to)
    }

    /// Move `from` to exactly `to`, rewriting every descendant path.
    ///
    /// Missing ancestors of `to` are created as directories.
    pub fn move_to(&mut self, from: &AbsPath, to: &AbsPath) -> TreeResult<AbsPath> {
        if from.is_root() || to.is_root() {
            return Err(TreeError::InvalidOperation("cannot move root".into()));
        }
        if from == to {
            return Ok(to.clone());
        }
        if to.starts_with(from) {
            return Err(TreeError::InvalidOperation(format!(
                "cannot move {from} into its own descendant {to}"
            )));
        }
        let id = self
            .node_from_path(from)
            .ok_or_else(|| TreeError::NotFound(from.clone()))?;
        if self.contains(to) {
            return Err(TreeError::AlreadyExists(to.clone()));
        }

        let new_parent = self.ensure_dir(&to.dirname())?;
        let old_parent = self.parent(id);
        self.detach(id);
        if let Some(p) = self.get_mut(new_parent) {
            p.children.insert(to.basename().to_string(), id);
        }
        if let Some(node) = self.get_mut(id) {
            node.parent = Some(new_parent);
        }
        self.cascade_path(id, to.clone());
        self.resort(new_parent);
        if let Some(old) = old_parent.filter(|p| *p != new_parent) {
            self.resort(old);
        }
        Ok(to.clone())
    }

    /// Set `id`'s path and recompute every descendant from its parent.
    fn cascade_path(&mut self, id: NodeId, path: AbsPath) {
        let mut stack = vec![(id, path)];
        while let Some((id, path)) = stack.pop() {
            let Some(node) = self.get_mut(id) else { continue };
            node.path = path;
            let base = node.path.clone();
            let children: Vec<(String, NodeId)> =
                node.children.iter().map(|(k, v)| (k.clone(), *v)).collect();
            for (name, child) in children {
                stack.push((child, base.join(&name)));
            }
        }
    }

    /// Replace a directory's children wholesale and sort once.
    ///
    /// Old children and their subtrees are dropped. A repeated name keeps
    /// its first entry. Returns the new ids in sibling order.
    pub fn replace_children<I, S>(&mut self, dir: NodeId, entries: I) -> TreeResult<Vec<NodeId>>
    where
        I: IntoIterator<Item = (S, NodeType)>,
        S: Into<String>,
    {
        let node = self
            .get(dir)
            .ok_or_else(|| TreeError::InvalidOperation(format!("stale node id {dir:?}")))?;
        if !node.is_dir() {
            return Err(TreeError::NotADirectory(node.path.clone()));
        }
        let base = node.path.clone();
        let old: Vec<NodeId> = node.children.values().copied().collect();
        for child in old {
            self.free_subtree(child);
        }
        if let Some(node) = self.get_mut(dir) {
            node.children.clear();
            node.order.clear();
        }

        for (name, kind) in entries {
            let name = name.into();
            if self.get(dir).is_some_and(|n| n.children.contains_key(&name)) {
                tracing::debug!(dir = %base, name = %name, "skipping repeated entry");
                continue;
            }
            let id = self.alloc(Node::new(base.join(&name), kind, Some(dir)));
            if let Some(node) = self.get_mut(dir) {
                node.children.insert(name, id);
            }
        }
        self.resort(dir);
        Ok(self.children(dir).to_vec())
    }

    // ========================================================================
    // Copies and views
    // ========================================================================

    /// Independent copy with markers preserved.
    pub fn deep_copy(&self) -> FileTree {
        self.filtered_copy(|_| true)
    }

    /// Copy keeping only nodes that pass `keep`; a rejected node takes its
    /// subtree with it. The root is always kept.
    pub fn filtered_copy<F>(&self, mut keep: F) -> FileTree
    where
        F: FnMut(&Node) -> bool,
    {
        let mut out = FileTree::with_created_at(self.created_at_ms);
        let mut stack = vec![(self.root, out.root)];
        while let Some((src, dst)) = stack.pop() {
            for child in self.children(src).iter().rev() {
                let Some(node) = self.get(*child) else { continue };
                if !keep(node) {
                    continue;
                }
                let copy = Node {
                    parent: Some(dst),
                    children: Default::default(),
                    order: Vec::new(),
                    ..node.clone()
                };
                let id = out.alloc(copy);
                if let Some(d) = out.get_mut(dst) {
                    d.children.insert(node.basename().to_string(), id);
                }
                stack.push((*child, id));
            }
            out.resort(dst);
        }
        out
    }

    /// A filtered projection; `trash_dir` is the trash directory's name at
    /// the root.
    pub fn view(&self, view: TreeView, trash_dir: &str) -> FileTree {
        let trash = AbsPath::root().join(trash_dir);
        match view {
            TreeView::All => self.deep_copy(),
            TreeView::HideDotfiles => self.filtered_copy(|n| !n.basename().starts_with('.')),
            TreeView::TrashOnly => self.filtered_copy(|n| n.path.starts_with(&trash)),
            TreeView::HideTrash => self.filtered_copy(|n| !n.path.starts_with(&trash)),
        }
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Serializable shape of the stored tree (virtual nodes omitted).
    pub fn to_snapshot(&self) -> IndexSnapshot {
        IndexSnapshot::new(self.snapshot_node(self.root), self.created_at_ms)
    }

    fn snapshot_node(&self, id: NodeId) -> SnapshotNode {
        let Some(node) = self.get(id) else {
            return SnapshotNode::new(AbsPath::root(), NodeType::Directory);
        };
        let mut out = SnapshotNode::new(node.path.clone(), node.kind);
        if let Some(children) = out.children.as_mut() {
            for child in &node.order {
                if self.get(*child).is_some_and(|c| !c.is_virtual) {
                    children.push(self.snapshot_node(*child));
                }
            }
        }
        out
    }

    /// Rebuild a tree from a snapshot, trusting its structure.
    pub fn from_snapshot(snapshot: &IndexSnapshot) -> TreeResult<FileTree> {
        if !snapshot.root.path.is_root() {
            return Err(TreeError::InvalidOperation(format!(
                "snapshot root is {}",
                snapshot.root.path
            )));
        }
        let mut tree = FileTree::with_created_at(snapshot.created_at_ms);
        let mut stack = vec![(&snapshot.root, tree.root)];
        while let Some((snap, dir)) = stack.pop() {
            let Some(children) = &snap.children else { continue };
            let ids = tree.replace_children(
                dir,
                children.iter().map(|c| (c.basename.clone(), c.node_type)),
            )?;
            for id in ids {
                let name = tree.get(id).map(|n| n.basename().to_string());
                if let Some(child) = children.iter().find(|c| Some(&c.basename) == name.as_ref()) {
                    stack.push((child, id));
                }
            }
        }
        Ok(tree)
    }
}

/// True when both trees have the same stored (path, type) set.
pub fn same_shape(a: &FileTree, b: &FileTree) -> bool {
    a.shape() == b.shape()
}
