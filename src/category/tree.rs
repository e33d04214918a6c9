//! Parent/child adjacency over the whole category table, and subtree expansion.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use crate::core::model::CategoryId;

/// One `question_categories` row reduced to its tree link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryEdge {
    pub id: CategoryId,
    /// `None` (or a non-positive value in the host table) marks a root.
    pub parent: Option<CategoryId>,
}

/// Parent → children map, built once per run.
#[derive(Debug, Clone, Default)]
pub struct CategoryTree {
    children: BTreeMap<CategoryId, Vec<CategoryId>>,
}

impl CategoryTree {
    #[must_use]
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = CategoryEdge>,
    {
        let mut children: BTreeMap<CategoryId, Vec<CategoryId>> = BTreeMap::new();
        for edge in edges {
            if let Some(parent) = edge.parent.filter(|p| *p > 0) {
                children.entry(parent).or_default().push(edge.id);
            }
        }
        Self { children }
    }

    #[must_use]
    pub fn children_of(&self, id: CategoryId) -> &[CategoryId] {
        self.children.get(&id).map_or(&[], Vec::as_slice)
    }

    /// `root` plus every transitively reachable descendant, each once.
    ///
    /// A visited set bounds the walk, so a parent cycle left behind by a damaged
    /// table terminates instead of looping.
    #[must_use]
    pub fn expand(&self, root: CategoryId) -> BTreeSet<CategoryId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            stack.extend(
                self.children_of(id)
                    .iter()
                    .copied()
                    .filter(|child| !seen.contains(child)),
            );
        }
        seen
    }
}
