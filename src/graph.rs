/*
 * restruct: lift compiled code back to structured source.
 * Copyright (C) 2022  Ruifeng Xie
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

//! Directed multigraph storage and the algorithms shared by the passes.
//!
//! Nodes live in an arena and are addressed by their insertion index, so
//! identity is stable across edge rewiring; neighbours are stored by index
//! and successor order is preserved everywhere (it is semantic for
//! conditionals and dispatchers).

pub mod dominator;
pub mod equivalence;

use std::collections::BTreeSet;
use derivative::Derivative;
use smallvec::SmallVec;

/// Set of node indices.
pub type NodeSet = BTreeSet<usize>;

/// Ordered successor list of a node.
pub type SuccList = SmallVec<[usize; 2]>;

/// Directed multigraph with stable node identity and insertion-order
/// iteration.
#[derive(Derivative)]
#[derivative(Debug(bound = "N: std::fmt::Debug"))]
#[derivative(Clone(bound = "N: Clone"))]
#[derivative(Default(bound = ""))]
#[derivative(Eq(bound = "N: Eq"), PartialEq(bound = "N: PartialEq"))]
pub struct DiGraph<N> {
    nodes: Vec<N>,
    succs: Vec<SuccList>,
}

impl<N> DiGraph<N> {
    /// An empty graph.
    pub fn new() -> Self {
        DiGraph { nodes: Vec::new(), succs: Vec::new() }
    }

    /// Number of nodes ever inserted.
    pub fn node_count(&self) -> usize { self.nodes.len() }

    /// Append a node, returning its stable index.
    pub fn add_node(&mut self, node: N) -> usize {
        self.nodes.push(node);
        self.succs.push(SuccList::new());
        self.nodes.len() - 1
    }

    /// Append an edge `from -> to` after all existing successors of `from`.
    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.succs[from].push(to);
    }

    /// Payload of node `k`.
    pub fn node(&self, k: usize) -> &N { &self.nodes[k] }

    /// Mutable payload of node `k`.
    pub fn node_mut(&mut self, k: usize) -> &mut N { &mut self.nodes[k] }

    /// Ordered successors of node `k`.
    pub fn successors(&self, k: usize) -> &[usize] { &self.succs[k] }

    /// Replace the whole successor list of node `k`.
    pub fn set_successors(&mut self, k: usize, succs: SuccList) {
        self.succs[k] = succs;
    }

    /// Redirect every `from -> old` edge to `from -> new`, keeping its
    /// position in the successor list.
    pub fn redirect_edge(&mut self, from: usize, old: usize, new: usize) {
        for target in self.succs[from].iter_mut() {
            if *target == old { *target = new; }
        }
    }

    /// Iterate `(index, payload)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &N)> {
        self.nodes.iter().enumerate()
    }

    /// Predecessor lists for all nodes, recomputed from the successor lists.
    pub fn predecessors(&self) -> Vec<SuccList> {
        let mut preds = vec![SuccList::new(); self.nodes.len()];
        for (from, succs) in self.succs.iter().enumerate() {
            for &to in succs {
                preds[to].push(from);
            }
        }
        preds
    }

    /// Collect all the nodes reachable from `k` into an existing set.
    pub fn collect_reachable_into(&self, k: usize, result: &mut NodeSet) {
        if k >= self.node_count() { return; }
        if result.insert(k) {
            for &n in self.successors(k) {
                self.collect_reachable_into(n, result);
            }
        }
    }

    /// All the nodes reachable from `k`.
    pub fn collect_reachable(&self, k: usize) -> NodeSet {
        let mut result = NodeSet::new();
        self.collect_reachable_into(k, &mut result);
        result
    }

    /// Nodes in post order of a DFS from `entry`, following successor order.
    pub fn post_order(&self, entry: usize) -> Vec<usize> {
        let mut visited = vec![false; self.node_count()];
        let mut order = Vec::with_capacity(self.node_count());
        self.post_order_from(entry, &mut visited, &mut order);
        order
    }

    fn post_order_from(&self, k: usize, visited: &mut [bool], order: &mut Vec<usize>) {
        if std::mem::replace(&mut visited[k], true) { return; }
        for &n in self.successors(k) {
            self.post_order_from(n, visited, order);
        }
        order.push(k);
    }

    /// Nodes in reverse post order of a DFS from `entry`.
    pub fn reverse_post_order(&self, entry: usize) -> Vec<usize> {
        let mut order = self.post_order(entry);
        order.reverse();
        order
    }

    /// Nodes with an empty successor list.
    pub fn exits(&self) -> NodeSet {
        self.succs.iter().enumerate()
            .filter(|(_, succs)| succs.is_empty())
            .map(|(k, _)| k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::DiGraph;

    fn diamond() -> DiGraph<char> {
        // 0 -> {1, 2} -> 3
        let mut g = DiGraph::new();
        for c in "eabx".chars() { g.add_node(c); }
        g.add_edge(0, 1);
        g.add_edge(0, 2);
        g.add_edge(1, 3);
        g.add_edge(2, 3);
        g
    }

    #[test]
    fn test_insertion_order() {
        let g = diamond();
        assert_eq!(g.iter().map(|(k, _)| k).collect::<Vec<_>>(), [0, 1, 2, 3]);
        assert_eq!(g.successors(0), [1, 2]);
    }

    #[test]
    fn test_reachability() {
        let g = diamond();
        assert_eq!(g.collect_reachable(1).into_iter().collect::<Vec<_>>(), [1, 3]);
        assert_eq!(g.exits().into_iter().collect::<Vec<_>>(), [3]);
    }

    #[test]
    fn test_orders() {
        let g = diamond();
        assert_eq!(g.post_order(0), [3, 1, 2, 0]);
        assert_eq!(g.reverse_post_order(0), [0, 2, 1, 3]);
    }

    #[test]
    fn test_redirect() {
        let mut g = diamond();
        let n = g.add_node('y');
        g.redirect_edge(1, 3, n);
        assert_eq!(g.successors(1), [n]);
        assert_eq!(g.successors(2), [3]);
    }
}
