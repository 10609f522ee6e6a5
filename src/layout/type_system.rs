/*
 * restruct: lift compiled code back to structured source.
 * Copyright (C) 2023  Ruifeng Xie
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The layout constraint graph: a typed DAG whose nodes accumulate access
//! sizes and whose edges carry offset expressions, plus the union-find of
//! structural equivalence classes maintained alongside it.

use std::collections::BTreeSet;
use crate::graph::NodeSet;

/// Index of a node in the [`LayoutTypeSystem`].
pub type LtsnId = usize;

/// How a node's children relate to each other and to the node's accesses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InterferingInfo {
    /// Not yet classified; reaching the materialiser like this is fatal.
    Unknown,
    /// Children occupy disjoint ranges: the node is a struct.
    AllChildrenAreNonInterfering,
    /// Children overlap: the node is a union.
    AllChildrenAreInterfering,
}

/// `offset + Σ_i stride_i · index_i`, with optional per-dimension trip
/// counts. `Strides` and `TripCounts` always have the same length; an
/// absent trip count is an unknown-length array, sized as one element.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OffsetExpression {
    /// Byte offset of the child inside the parent.
    pub offset: i64,
    /// Per-dimension strides, outermost first. Only positive strides are
    /// meaningful.
    pub strides: Vec<i64>,
    /// Per-dimension trip counts, aligned with `strides`.
    pub trip_counts: Vec<Option<i64>>,
}

impl OffsetExpression {
    /// A plain field at `offset`, no array structure.
    pub fn fixed(offset: i64) -> Self {
        OffsetExpression { offset, strides: Vec::new(), trip_counts: Vec::new() }
    }

    /// A one-dimensional array at `offset`.
    pub fn array(offset: i64, stride: i64, trip_count: Option<i64>) -> Self {
        OffsetExpression { offset, strides: vec![stride], trip_counts: vec![trip_count] }
    }
}

/// Tag on an outgoing edge of the constraint graph.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EdgeTag {
    /// The child is a member at the given offset expression.
    Instance(OffsetExpression),
    /// The child is a base type of the parent; at most one per node.
    Inheritance,
}

/// One node of the constraint graph.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LtsNode {
    /// Stable id, equal to the node's index.
    pub id: LtsnId,
    /// Size in bytes.
    pub size: u64,
    /// Observed access widths in bytes.
    pub access_sizes: BTreeSet<u64>,
    /// Classification driving struct/union materialisation.
    pub interfering: InterferingInfo,
}

/// Union-find over node ids, with compacted class indices.
///
/// Removed nodes keep their union-find structure but stop having a class
/// id, so layouts are never materialised for them.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct EqClasses {
    parent: Vec<usize>,
    removed: BTreeSet<usize>,
}

impl EqClasses {
    fn grow(&mut self, n: usize) {
        while self.parent.len() <= n {
            self.parent.push(self.parent.len());
        }
    }

    /// Representative of `x`'s class.
    pub fn find(&self, mut x: usize) -> usize {
        while self.parent[x] != x {
            x = self.parent[x];
        }
        x
    }

    /// Merge the classes of `a` and `b`.
    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = rb.min(ra);
        }
    }

    /// Drop `x` from layout materialisation.
    pub fn remove(&mut self, x: usize) {
        self.removed.insert(x);
    }

    fn live_roots(&self) -> Vec<usize> {
        let mut roots: Vec<usize> = (0..self.parent.len())
            .filter(|&x| !self.removed.contains(&x))
            .map(|x| self.find(x))
            .collect();
        roots.sort_unstable();
        roots.dedup();
        roots
    }

    /// Number of live equivalence classes.
    pub fn num_classes(&self) -> usize {
        self.live_roots().len()
    }

    /// Compacted class index of `x`, or [`None`] for removed nodes.
    pub fn eq_class_id(&self, x: usize) -> Option<usize> {
        if self.removed.contains(&x) { return None; }
        let root = self.find(x);
        self.live_roots().binary_search(&root).ok()
    }
}

/// The layout constraint graph.
#[derive(Debug, Default, Clone)]
pub struct LayoutTypeSystem {
    nodes: Vec<LtsNode>,
    edges: Vec<Vec<(LtsnId, EdgeTag)>>,
    eq_classes: EqClasses,
}

impl LayoutTypeSystem {
    /// An empty graph.
    pub fn new() -> Self { Self::default() }

    /// Number of nodes.
    pub fn len(&self) -> usize { self.nodes.len() }

    /// Whether the graph holds no nodes.
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Append a node.
    pub fn add_node(
        &mut self,
        size: u64,
        access_sizes: impl IntoIterator<Item = u64>,
        interfering: InterferingInfo,
    ) -> LtsnId {
        let id = self.nodes.len();
        self.nodes.push(LtsNode {
            id,
            size,
            access_sizes: access_sizes.into_iter().collect(),
            interfering,
        });
        self.edges.push(Vec::new());
        self.eq_classes.grow(id);
        id
    }

    /// Append an instance edge.
    pub fn add_instance_edge(&mut self, from: LtsnId, to: LtsnId, expr: OffsetExpression) {
        self.edges[from].push((to, EdgeTag::Instance(expr)));
    }

    /// Append an inheritance edge.
    pub fn add_inheritance_edge(&mut self, from: LtsnId, to: LtsnId) {
        self.edges[from].push((to, EdgeTag::Inheritance));
    }

    /// The node behind `id`.
    pub fn node(&self, id: LtsnId) -> &LtsNode { &self.nodes[id] }

    /// Outgoing edges of `id`, in insertion order.
    pub fn edges(&self, id: LtsnId) -> &[(LtsnId, EdgeTag)] { &self.edges[id] }

    /// The equivalence classes maintained alongside the graph.
    pub fn eq_classes(&self) -> &EqClasses { &self.eq_classes }

    /// Merge the equivalence classes of `a` and `b`.
    pub fn unify(&mut self, a: LtsnId, b: LtsnId) {
        self.eq_classes.union(a, b);
    }

    /// Drop `id` from layout materialisation.
    pub fn prune(&mut self, id: LtsnId) {
        self.eq_classes.remove(id);
    }

    /// Nodes without incoming edges, in id order.
    pub fn roots(&self) -> Vec<LtsnId> {
        let mut has_incoming = vec![false; self.nodes.len()];
        for targets in &self.edges {
            for &(to, _) in targets {
                has_incoming[to] = true;
            }
        }
        (0..self.nodes.len()).filter(|&n| !has_incoming[n]).collect()
    }

    /// Post-order of the nodes reachable from `root`, skipping `visited`
    /// nodes and extending it.
    pub fn post_order_ext(&self, root: LtsnId, visited: &mut NodeSet) -> Vec<LtsnId> {
        let mut order = Vec::new();
        self.post_order_rec(root, visited, &mut order);
        order
    }

    fn post_order_rec(&self, n: LtsnId, visited: &mut NodeSet, order: &mut Vec<LtsnId>) {
        if !visited.insert(n) { return; }
        for &(child, _) in &self.edges[n] {
            self.post_order_rec(child, visited, order);
        }
        order.push(n);
    }
}

#[cfg(test)]
mod tests {
    use super::{EqClasses, InterferingInfo, LayoutTypeSystem, OffsetExpression};

    #[test]
    fn test_eq_classes() {
        let mut classes = EqClasses::default();
        classes.grow(4);
        classes.union(0, 2);
        assert_eq!(classes.find(2), 0);
        assert_eq!(classes.num_classes(), 4);
        assert_eq!(classes.eq_class_id(0), classes.eq_class_id(2));
        classes.remove(3);
        assert_eq!(classes.num_classes(), 3);
        assert_eq!(classes.eq_class_id(3), None);
        assert_eq!(classes.eq_class_id(4), Some(2));
    }

    #[test]
    fn test_post_order() {
        let mut ts = LayoutTypeSystem::new();
        let leaf = ts.add_node(4, [4], InterferingInfo::AllChildrenAreNonInterfering);
        let mid = ts.add_node(8, [], InterferingInfo::AllChildrenAreNonInterfering);
        let root = ts.add_node(16, [], InterferingInfo::AllChildrenAreNonInterfering);
        ts.add_instance_edge(mid, leaf, OffsetExpression::fixed(0));
        ts.add_instance_edge(root, mid, OffsetExpression::fixed(0));
        ts.add_instance_edge(root, leaf, OffsetExpression::fixed(8));
        assert_eq!(ts.roots(), [root]);
        let mut visited = Default::default();
        assert_eq!(ts.post_order_ext(root, &mut visited), [leaf, mid, root]);
    }
}
