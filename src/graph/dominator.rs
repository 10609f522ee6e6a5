/*
 * restruct: lift compiled code back to structured source.
 * Copyright (C) 2022  Zhichao Guan
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

//! Dominator and post-dominator computation.
//!
//! Both are computed by the iterative set-intersection schedule and are
//! recomputed from scratch after every structural mutation: the combing
//! passes mutate in coarse phases, so caching buys nothing worth the
//! invalidation bugs.

use super::{DiGraph, NodeSet, SuccList};

/// Dominator (or post-dominator) sets for every node of a graph.
///
/// Nodes unreachable from the root(s) keep the full node set as dominators;
/// callers canonicalise unreachable nodes away before asking.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Dominators {
    sets: Vec<NodeSet>,
}

impl Dominators {
    /// Compute dominator sets with `entry` as the root.
    pub fn compute<N>(graph: &DiGraph<N>, entry: usize) -> Self {
        let preds = graph.predecessors();
        let order = graph.reverse_post_order(entry);
        Self::solve(graph.node_count(), &preds, &NodeSet::from([entry]), &order)
    }

    /// Compute post-dominator sets, rooted at a virtual exit which every
    /// successor-less node reaches. The virtual node is never materialised.
    pub fn compute_post<N>(graph: &DiGraph<N>) -> Self {
        let mut succs_of = vec![SuccList::new(); graph.node_count()];
        for (k, _) in graph.iter() {
            succs_of[k] = SuccList::from_slice(graph.successors(k));
        }
        // Walk the reversed graph in (approximately) its reverse post order.
        let mut order: Vec<usize> = (0..graph.node_count()).collect();
        order.reverse();
        Self::solve(graph.node_count(), &succs_of, &graph.exits(), &order)
    }

    fn solve(count: usize, preds: &[SuccList], roots: &NodeSet, order: &[usize]) -> Self {
        let full: NodeSet = (0..count).collect();
        let mut sets = vec![full; count];
        for &root in roots {
            sets[root] = NodeSet::from([root]);
        }
        let mut changed = true;
        while changed {
            changed = false;
            for &k in order {
                // Nodes with no incoming edges keep the full set, as do
                // roots their singleton.
                if roots.contains(&k) || preds[k].is_empty() { continue; }
                let mut new: Option<NodeSet> = None;
                for &p in &preds[k] {
                    new = Some(match new {
                        None => sets[p].clone(),
                        Some(acc) => acc.intersection(&sets[p]).copied().collect(),
                    });
                }
                let mut new = new.unwrap_or_default();
                new.insert(k);
                if new != sets[k] {
                    sets[k] = new;
                    changed = true;
                }
            }
        }
        Dominators { sets }
    }

    /// Returns `true` if `x` dominates `y` (reflexively).
    pub fn dominates(&self, x: usize, y: usize) -> bool {
        self.sets[y].contains(&x)
    }

    /// Returns `true` if `x` dominates `y` and `x != y`.
    pub fn strictly_dominates(&self, x: usize, y: usize) -> bool {
        x != y && self.dominates(x, y)
    }

    /// Dominators of `k`, i.e. `x` dominates `k` for every `x` returned.
    pub fn dominators(&self, k: usize) -> &NodeSet {
        &self.sets[k]
    }

    /// Nodes dominated by `k`, i.e. `k` dominates `x` for every `x` returned.
    pub fn dominated_by(&self, k: usize) -> NodeSet {
        (0..self.sets.len()).filter(|&x| self.dominates(k, x)).collect()
    }

    /// Immediate dominator of every node: the strict dominator closest to
    /// the node, i.e. the one with the most dominators of its own.
    pub fn immediate(&self) -> Vec<Option<usize>> {
        (0..self.sets.len())
            .map(|k| {
                self.sets[k].iter().copied()
                    .filter(|&x| x != k)
                    .max_by_key(|&x| self.sets[x].len())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::DiGraph;
    use super::Dominators;

    /// Build the graph `0 -> 1 -> {2, 3}; 3 -> {4, 5}; {4, 5} -> 6 -> 3; {2, 6} -> 7`
    /// from the classic dominance running example.
    fn sample() -> DiGraph<()> {
        let mut g = DiGraph::new();
        for _ in 0..8 { g.add_node(()); }
        for (from, to) in [(0, 1), (1, 2), (1, 3), (3, 4), (3, 5), (4, 6), (5, 6), (6, 3), (2, 7), (6, 7)] {
            g.add_edge(from, to);
        }
        g
    }

    #[test]
    fn test_dominators() {
        let doms = Dominators::compute(&sample(), 0);
        assert_eq!(
            (0..8).map(|k| doms.dominators(k).iter().copied().collect::<Vec<_>>()).collect::<Vec<_>>(),
            [
                vec![0], vec![0, 1], vec![0, 1, 2], vec![0, 1, 3],
                vec![0, 1, 3, 4], vec![0, 1, 3, 5], vec![0, 1, 3, 6], vec![0, 1, 7],
            ],
        );
        assert!(doms.dominates(1, 6));
        assert!(!doms.strictly_dominates(4, 6));
    }

    #[test]
    fn test_idom() {
        let doms = Dominators::compute(&sample(), 0);
        assert_eq!(doms.immediate(), [
            None, Some(0), Some(1), Some(1),
            Some(3), Some(3), Some(3), Some(1),
        ]);
    }

    #[test]
    fn test_post_dominators() {
        let mut g = DiGraph::new();
        for _ in 0..4 { g.add_node(()); }
        // diamond 0 -> {1, 2} -> 3
        for (from, to) in [(0, 1), (0, 2), (1, 3), (2, 3)] { g.add_edge(from, to); }
        let pdoms = Dominators::compute_post(&g);
        assert!(pdoms.dominates(3, 0));
        assert!(pdoms.dominates(3, 1));
        assert!(!pdoms.dominates(1, 0));
        assert_eq!(pdoms.immediate()[0], Some(3));
    }

    #[test]
    fn test_dominated_by() {
        let doms = Dominators::compute(&sample(), 0);
        assert_eq!(doms.dominated_by(3).into_iter().collect::<Vec<_>>(), [3, 4, 5, 6]);
    }
}
