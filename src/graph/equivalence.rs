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

//! Topological equivalence of rooted graphs.
//!
//! Two rooted graphs are topologically equivalent when a bijection between
//! their reachable nodes maps root to root and preserves ordered successor
//! lists. The decision procedure is a synchronised BFS materialising the
//! candidate bijection; the first fan-out or payload mismatch settles the
//! question negatively.

use std::collections::{BTreeMap, VecDeque};

use super::DiGraph;

/// Decide topological equivalence of `(lhs, lhs_root)` and `(rhs, rhs_root)`,
/// comparing node payloads with `node_eq`.
pub fn is_topologically_equivalent<N>(
    lhs: &DiGraph<N>, lhs_root: usize,
    rhs: &DiGraph<N>, rhs_root: usize,
    node_eq: impl Fn(&N, &N) -> bool,
) -> bool {
    let mut forward: BTreeMap<usize, usize> = BTreeMap::new();
    let mut backward: BTreeMap<usize, usize> = BTreeMap::new();
    let mut queue = VecDeque::new();

    forward.insert(lhs_root, rhs_root);
    backward.insert(rhs_root, lhs_root);
    queue.push_back((lhs_root, rhs_root));

    while let Some((x, y)) = queue.pop_front() {
        if !node_eq(lhs.node(x), rhs.node(y)) {
            return false;
        }
        let xs = lhs.successors(x);
        let ys = rhs.successors(y);
        if xs.len() != ys.len() {
            return false;
        }
        for (&sx, &sy) in xs.iter().zip(ys) {
            match (forward.get(&sx), backward.get(&sy)) {
                // Both fresh: extend the bijection.
                (None, None) => {
                    forward.insert(sx, sy);
                    backward.insert(sy, sx);
                    queue.push_back((sx, sy));
                }
                // Already paired with each other: nothing to do.
                (Some(&mapped), Some(&unmapped)) if mapped == sy && unmapped == sx => {}
                // Any other combination breaks the bijection.
                _ => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use crate::graph::DiGraph;
    use super::is_topologically_equivalent;

    fn diamond(labels: [u32; 4]) -> DiGraph<u32> {
        let mut g = DiGraph::new();
        for label in labels { g.add_node(label); }
        for (from, to) in [(0, 1), (0, 2), (1, 3), (2, 3)] { g.add_edge(from, to); }
        g
    }

    #[test]
    fn test_reflexive() {
        let g = diamond([0, 1, 2, 3]);
        assert!(is_topologically_equivalent(&g, 0, &g, 0, u32::eq));
    }

    #[test]
    fn test_symmetric() {
        let g = diamond([0, 1, 2, 3]);
        // Same shape, nodes inserted in a different order.
        let mut h = DiGraph::new();
        for label in [3, 2, 1, 0] { h.add_node(label as u32); }
        for (from, to) in [(3, 2), (3, 1), (2, 0), (1, 0)] { h.add_edge(from, to); }
        assert!(is_topologically_equivalent(&g, 0, &h, 3, u32::eq));
        assert!(is_topologically_equivalent(&h, 3, &g, 0, u32::eq));
    }

    #[test]
    fn test_successor_order_is_semantic() {
        let g = diamond([0, 1, 2, 3]);
        // Swapped branch order: same unordered shape, different semantics.
        let mut h = DiGraph::new();
        for label in [0, 1, 2, 3] { h.add_node(label as u32); }
        for (from, to) in [(0, 2), (0, 1), (1, 3), (2, 3)] { h.add_edge(from, to); }
        assert!(!is_topologically_equivalent(&g, 0, &h, 0, u32::eq));
    }

    #[test]
    fn test_fan_out_mismatch() {
        let g = diamond([0, 1, 2, 3]);
        let mut h = DiGraph::new();
        for label in [0u32, 1, 3] { h.add_node(label); }
        for (from, to) in [(0, 1), (1, 2)] { h.add_edge(from, to); }
        assert!(!is_topologically_equivalent(&g, 0, &h, 0, u32::eq));
    }

    #[test]
    fn test_payload_mismatch() {
        let g = diamond([0, 1, 2, 3]);
        let h = diamond([0, 1, 2, 9]);
        assert!(!is_topologically_equivalent(&g, 0, &h, 0, u32::eq));
    }
}
