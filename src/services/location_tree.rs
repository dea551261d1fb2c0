//! Nested-interval index over the location hierarchy.
//!
//! Every location carries `left`/`right` bounds such that B lies under A iff
//! `A.left <= B.left && B.right <= A.right`. The index keeps the bounded nodes
//! sorted by `left` so a subtree is one contiguous range found by binary search.

use std::collections::HashMap;

use crate::models::{LocationId, LocationKind, LocationNode};

#[derive(Debug, Clone, Default)]
pub struct LocationTree {
    nodes: HashMap<LocationId, LocationNode>,
    /// (left, right, id) of every node with usable bounds, ascending by left.
    ordered: Vec<(i64, i64, LocationId)>,
}

impl LocationTree {
    pub fn new(nodes: impl IntoIterator<Item = LocationNode>) -> Self {
        let nodes: HashMap<LocationId, LocationNode> =
            nodes.into_iter().map(|node| (node.id, node)).collect();
        let mut ordered: Vec<(i64, i64, LocationId)> = nodes
            .values()
            .filter_map(|node| node.bounds().map(|(l, r)| (l, r, node.id)))
            .collect();
        ordered.sort_unstable();
        Self { nodes, ordered }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: LocationId) -> Option<&LocationNode> {
        self.nodes.get(&id)
    }

    fn bounds(&self, id: LocationId) -> Option<(i64, i64)> {
        self.nodes.get(&id).and_then(LocationNode::bounds)
    }

    /// True when `descendant` is `ancestor` or lies below it. Unknown or
    /// unbounded locations contain nothing and are contained by nothing.
    pub fn contains(&self, ancestor: LocationId, descendant: LocationId) -> bool {
        match (self.bounds(ancestor), self.bounds(descendant)) {
            (Some((al, ar)), Some((dl, dr))) => al <= dl && dr <= ar,
            _ => false,
        }
    }

    /// Ids of the subtree rooted at `root`, root included, in `left` order.
    pub fn subtree(&self, root: LocationId) -> Vec<LocationId> {
        let Some((left, right)) = self.bounds(root) else {
            return Vec::new();
        };
        let start = self.ordered.partition_point(|(l, _, _)| *l < left);
        self.ordered[start..]
            .iter()
            .take_while(|(l, _, _)| *l <= right)
            .filter(|(_, r, _)| *r <= right)
            .map(|(_, _, id)| *id)
            .collect()
    }

    /// Innermost location of `kind` containing `location` (itself included).
    pub fn enclosing(&self, location: LocationId, kind: LocationKind) -> Option<LocationId> {
        let (left, right) = self.bounds(location)?;
        let end = self.ordered.partition_point(|(l, _, _)| *l <= left);
        self.ordered[..end]
            .iter()
            .rev()
            .filter(|(_, r, _)| *r >= right)
            .map(|(_, _, id)| *id)
            .find(|id| self.nodes.get(id).map(|n| n.kind) == Some(kind))
    }

    /// Root storage location of a warehouse.
    pub fn warehouse_storage(&self, warehouse: LocationId) -> Option<LocationId> {
        self.nodes
            .get(&warehouse)
            .filter(|node| node.kind == LocationKind::Warehouse)
            .and_then(|node| node.storage_location_id)
    }

    /// Storage root of the warehouse enclosing `location`, if any.
    pub fn storage_root_of(&self, location: LocationId) -> Option<LocationId> {
        let warehouse = self.enclosing(location, LocationKind::Warehouse)?;
        self.warehouse_storage(warehouse)
            .filter(|storage| self.contains(*storage, location))
    }
}

/// Recomputes nested-set bounds from parent pointers with a depth-first walk.
///
/// Children are visited in id order so the numbering is stable. Nodes whose
/// parent is unknown are treated as roots.
pub fn assign_bounds(nodes: &mut [LocationNode]) {
    let index: HashMap<LocationId, usize> =
        nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
    let mut children: HashMap<Option<LocationId>, Vec<LocationId>> = HashMap::new();
    for node in nodes.iter() {
        let parent = node.parent_id.filter(|p| index.contains_key(p));
        children.entry(parent).or_default().push(node.id);
    }
    for ids in children.values_mut() {
        ids.sort_unstable();
    }

    let mut counter = 0i64;
    // (id, entered) pairs; a node is pushed twice, once to open and once to close.
    let mut stack: Vec<(LocationId, bool)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|id| (*id, false)).collect())
        .unwrap_or_default();
    while let Some((id, entered)) = stack.pop() {
        let Some(&i) = index.get(&id) else { continue };
        counter += 1;
        if entered {
            nodes[i].right = Some(counter);
            continue;
        }
        nodes[i].left = Some(counter);
        stack.push((id, true));
        if let Some(kids) = children.get(&Some(id)) {
            stack.extend(kids.iter().rev().map(|kid| (*kid, false)));
        }
    }
}
