//! Sibling sort order.
//!
//! Directories before files. Files by category (images, markdown, other
//! text, everything else). Ties by case-insensitive basename, then by the
//! exact basename so the order is total.

use std::cmp::Ordering;

use scriptorium_types::{FileCategory, NodeType};

/// Sort key for one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey<'a> {
    pub kind: NodeType,
    pub category: FileCategory,
    pub name: &'a str,
}

pub fn compare(a: &SortKey<'_>, b: &SortKey<'_>) -> Ordering {
    let rank = |k: &SortKey<'_>| match k.kind {
        NodeType::Directory => 0u8,
        NodeType::File => 1,
    };
    rank(a)
        .cmp(&rank(b))
        .then_with(|| match (a.kind, b.kind) {
            (NodeType::File, NodeType::File) => a.category.cmp(&b.category),
            _ => Ordering::Equal,
        })
        .then_with(|| caseless(a.name).cmp(caseless(b.name)))
        .then_with(|| a.name.cmp(b.name))
}

fn caseless(name: &str) -> impl Iterator<Item = char> + '_ {
    name.chars().flat_map(char::to_lowercase)
}
