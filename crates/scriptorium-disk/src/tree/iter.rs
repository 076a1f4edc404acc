//! Lazy depth-first traversal.

use std::sync::Arc;

use super::node::{Node, NodeId, NodeInfo};
use super::FileTree;

/// Pre-order iterator over a subtree, siblings in sort order.
pub struct Iter<'a> {
    tree: &'a FileTree,
    stack: Vec<NodeId>,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(tree: &'a FileTree, start: NodeId) -> Self {
        Self {
            tree,
            stack: vec![start],
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if let Some(node) = self.tree.get(id) {
                // Push children in reverse so the first sibling pops first
                self.stack.extend(node.order.iter().rev().copied());
                return Some((id, node));
            }
        }
        None
    }
}

/// Pre-order iterator that owns a shared snapshot of the tree.
///
/// Yields owned [`NodeInfo`]s one at a time, so callers can iterate
/// without holding any lock on the live tree.
pub struct SharedIter {
    tree: Arc<FileTree>,
    stack: Vec<NodeId>,
    filter: Option<Box<dyn FnMut(&Node) -> bool + Send>>,
}

impl SharedIter {
    pub fn new(tree: Arc<FileTree>) -> Self {
        let stack = vec![tree.root()];
        Self {
            tree,
            stack,
            filter: None,
        }
    }

    /// Only yield nodes passing `filter` (traversal still descends).
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&Node) -> bool + Send + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl Iterator for SharedIter {
    type Item = NodeInfo;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let Some(node) = self.tree.get(id) else { continue };
            self.stack.extend(node.order.iter().rev().copied());
            if id == self.tree.root() {
                continue;
            }
            if let Some(filter) = self.filter.as_mut() {
                if !filter(node) {
                    continue;
                }
            }
            return self.tree.info(id);
        }
        None
    }
}
