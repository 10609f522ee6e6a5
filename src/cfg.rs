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

//! The region control flow graph the structuring engine works on.
//!
//! A [`RegionCfg`] owns its [`BbNode`]s exclusively. Structuring collapses
//! loops and conditional regions into single nodes carrying their inner
//! sub-graph, so a fully structured region degenerates into a linear chain;
//! [`emit`] then turns that chain into an AST.

pub mod comb;
pub mod emit;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use displaydoc::Display as DisplayDoc;
use thiserror::Error;

use crate::graph::{DiGraph, NodeSet, SuccList};
use crate::ir::{BranchKind, Function, Terminator};

pub use comb::{comb, Config};

/// Category of a [`BbNode`]. Never mutated after creation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BlockKind {
    /// Plain code, carrying a pointer to the originating block.
    Code,
    /// Assignment to an entry dispatcher's state variable.
    EntrySet,
    /// Assignment to an exit dispatcher's state variable.
    ExitSet,
    /// Switch over the state variable selecting a region entry.
    EntryDispatcher,
    /// Switch over the state variable routing a region exit.
    ExitDispatcher,
    /// Synthetic placeholder without code (region exit and loopback markers).
    Empty,
    /// Code duplicated during inflation; shares the original's block.
    Weaved,
    /// A collapsed loop, carrying the loop body as a sub-graph.
    Tile,
    /// A collapsed conditional (or dispatcher) region.
    Collapsed,
}

/// Role of the synthetic [`BlockKind::Empty`] markers inside a sub-region.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Markers {
    /// Stands for the region's single exit (the conditional's merge point).
    pub exit: Option<usize>,
    /// Stands for a loopback edge to the enclosing loop header.
    pub cont: Option<usize>,
    /// Stands for an edge leaving the enclosing loop.
    pub brk: Option<usize>,
}

impl Markers {
    /// Whether `node` is one of the markers.
    pub fn is_marker(&self, node: usize) -> bool {
        [self.exit, self.cont, self.brk].contains(&Some(node))
    }
}

/// Loop flavour recovered for a [`Tile`](BlockKind::Tile).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LoopShape {
    /// No single exit test was recovered.
    WhileTrue,
    /// The loop header tests the condition; its code block was removed
    /// from the body and is re-emitted around the loop.
    While(LoopTest),
    /// The latch tests the condition; its code block was removed from the
    /// body and is re-emitted at the body tail.
    DoWhile(LoopTest),
}

/// The conditional supplying a loop test.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoopTest {
    /// Originating block of the removed conditional node.
    pub source: Option<usize>,
    /// Whether the loop continues on the *negated* condition.
    pub negated: bool,
}

/// A sub-graph carried by a collapsed node.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SubRegion {
    /// The inner region; its entry is the collapsed region's entry.
    pub cfg: RegionCfg,
    /// Synthetic markers standing for edges that used to leave the region.
    pub markers: Markers,
}

/// Payload of a collapsed node.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RegionPayload {
    /// A loop body, with its recovered shape.
    Loop(SubRegion, LoopShape),
    /// A conditional (or dispatcher) region rooted at its branching node.
    Cond(SubRegion),
}

/// Basic block node.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BbNode {
    /// Category; fixed at creation.
    pub kind: BlockKind,
    /// The originating IR block, when there is one. Duplicates share it.
    pub source: Option<usize>,
    /// Dispatcher state value, for [`BlockKind::EntrySet`]/[`BlockKind::ExitSet`].
    pub state_value: Option<u64>,
    /// Whether the originating conditional branch tested the negated
    /// condition. Meaningful only for two-way branching nodes.
    pub branch_negated: bool,
    /// Inner sub-graph, for [`BlockKind::Tile`]/[`BlockKind::Collapsed`].
    pub region: Option<Box<RegionPayload>>,
}

impl BbNode {
    /// A plain node of the given category.
    pub fn new(kind: BlockKind, source: Option<usize>) -> Self {
        BbNode { kind, source, state_value: None, branch_negated: false, region: None }
    }

    /// Whether this node is a dispatcher switch.
    pub fn is_dispatcher(&self) -> bool {
        matches!(self.kind, BlockKind::EntryDispatcher | BlockKind::ExitDispatcher)
    }

    /// Whether this node is a state variable assignment.
    pub fn is_set(&self) -> bool {
        matches!(self.kind, BlockKind::EntrySet | BlockKind::ExitSet)
    }
}

/// Structuring errors. Fatal per function: no partial AST is emitted.
#[derive(Debug, DisplayDoc, Error)]
pub enum Error {
    /// irreducible control flow: cannot structure the region entered at block {0}
    IrreducibleRegion(usize),
    /// node {0} is an entry/exit set without a matching dispatcher
    DispatcherInconsistency(usize),
}

/// The region control flow graph.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct RegionCfg {
    graph: DiGraph<BbNode>,
    entry: usize,
}

impl RegionCfg {
    /// An empty region.
    pub fn new() -> Self { Self::default() }

    /// Build the region graph of `function`: one `Code` node per block,
    /// edges in terminator order.
    pub fn from_function(function: &Function) -> Self {
        let mut cfg = RegionCfg::new();
        for (k, block) in function.blocks.iter().enumerate() {
            let mut node = BbNode::new(BlockKind::Code, Some(k));
            if let Terminator::Branch { kind: BranchKind::Unless, .. } = block.terminator {
                node.branch_negated = true;
            }
            cfg.add_node(node);
        }
        for (k, block) in function.blocks.iter().enumerate() {
            for target in block.successors() {
                cfg.add_edge(k, target);
            }
        }
        cfg.entry = function.entry;
        cfg
    }

    /// Number of nodes.
    pub fn len(&self) -> usize { self.graph.node_count() }

    /// Whether the region holds no nodes.
    pub fn is_empty(&self) -> bool { self.graph.node_count() == 0 }

    /// The entry node.
    pub fn entry(&self) -> usize { self.entry }

    /// Pick a (new) entry node.
    pub fn set_entry(&mut self, entry: usize) { self.entry = entry; }

    /// Append a node.
    pub fn add_node(&mut self, node: BbNode) -> usize {
        self.graph.add_node(node)
    }

    /// Append an edge, after all existing successors of `from`.
    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.graph.add_edge(from, to);
    }

    /// The node behind `k`.
    pub fn node(&self, k: usize) -> &BbNode { self.graph.node(k) }

    /// Mutable access to the node behind `k`.
    pub fn node_mut(&mut self, k: usize) -> &mut BbNode { self.graph.node_mut(k) }

    /// Ordered successors of `k`.
    pub fn successors(&self, k: usize) -> &[usize] { self.graph.successors(k) }

    /// Replace the successor list of `k`.
    pub fn set_successors(&mut self, k: usize, succs: SuccList) {
        self.graph.set_successors(k, succs);
    }

    /// Redirect every `from -> old` edge to `from -> new`, in place.
    pub fn redirect_edge(&mut self, from: usize, old: usize, new: usize) {
        self.graph.redirect_edge(from, old, new);
    }

    /// Predecessor lists, recomputed.
    pub fn predecessors(&self) -> Vec<SuccList> { self.graph.predecessors() }

    /// The underlying graph, for the generic algorithms.
    pub fn graph(&self) -> &DiGraph<BbNode> { &self.graph }

    /// Dominator sets from the entry. Recomputed on every call; combing
    /// mutates in coarse phases, so no cache is kept.
    pub fn dominators(&self) -> crate::graph::dominator::Dominators {
        crate::graph::dominator::Dominators::compute(&self.graph, self.entry)
    }

    /// Post-dominator sets towards the exits.
    pub fn post_dominators(&self) -> crate::graph::dominator::Dominators {
        crate::graph::dominator::Dominators::compute_post(&self.graph)
    }

    /// Drop nodes unreachable from the entry and compact indices,
    /// preserving relative order. Returns the old-to-new index mapping.
    pub fn canonicalise(&mut self) -> BTreeMap<usize, usize> {
        let reachable: NodeSet = self.graph.collect_reachable(self.entry);
        let mut remap = BTreeMap::new();
        let mut graph = DiGraph::new();
        for (k, node) in self.graph.iter() {
            if reachable.contains(&k) {
                remap.insert(k, graph.add_node(node.clone()));
            }
        }
        for &old in reachable.iter() {
            for &target in self.graph.successors(old) {
                graph.add_edge(remap[&old], remap[&target]);
            }
        }
        self.entry = remap[&self.entry];
        self.graph = graph;
        remap
    }

    /// Check the node-local invariants: dispatchers branch at least two
    /// ways, and every set node has exactly one successor leading to its
    /// dispatcher (possibly through a loopback marker).
    pub fn check_dispatchers(&self, markers: &Markers) -> Result<(), Error> {
        for (k, node) in self.graph.iter() {
            if node.is_dispatcher() && self.successors(k).len() < 2 {
                return Err(Error::DispatcherInconsistency(k));
            }
            if node.is_set() {
                let succs = self.successors(k);
                if succs.len() != 1 {
                    return Err(Error::DispatcherInconsistency(k));
                }
                let target = succs[0];
                // A set may feed its dispatcher directly, through a marker
                // (the dispatcher is then the enclosing loop's header), or
                // through a collapsed region entered at the dispatcher.
                let collapsed_dispatcher = match &self.node(target).region {
                    Some(payload) => {
                        let sub = match payload.as_ref() {
                            RegionPayload::Loop(sub, _) => sub,
                            RegionPayload::Cond(sub) => sub,
                        };
                        sub.cfg.node(sub.cfg.entry()).is_dispatcher()
                    }
                    None => false,
                };
                let ok = self.node(target).is_dispatcher()
                    || collapsed_dispatcher
                    || markers.is_marker(target);
                if !ok {
                    return Err(Error::DispatcherInconsistency(k));
                }
            }
        }
        Ok(())
    }

    /// Render the region in dot syntax: node id, label, ordered successors.
    pub fn dot(&self) -> String {
        let mut out = String::from("digraph region {\n");
        for (k, node) in self.graph.iter() {
            let label = match (node.kind, node.source) {
                (BlockKind::Code, Some(bb)) | (BlockKind::Weaved, Some(bb)) =>
                    format!("bb{}", bb),
                (kind, _) => format!("{:?}", kind).to_lowercase(),
            };
            let _ = writeln!(out, "  n{} [label=\"{}\"];", k, label);
            for &target in self.graph.successors(k) {
                let _ = writeln!(out, "  n{} -> n{};", k, target);
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::equivalence::is_topologically_equivalent;
    use crate::ir::function::read_function;
    use crate::samples;
    use super::{BbNode, BlockKind, Markers, RegionCfg};

    #[test]
    fn test_from_function() {
        let function = read_function(samples::DIAMOND).unwrap();
        let cfg = RegionCfg::from_function(&function);
        assert_eq!(cfg.len(), 4);
        assert_eq!(cfg.successors(0), [1, 2]);
        assert_eq!(cfg.successors(1), [3]);
        assert_eq!(cfg.node(0).source, Some(0));
    }

    #[test]
    fn test_canonicalise_drops_unreachable() {
        let mut cfg = RegionCfg::new();
        let a = cfg.add_node(BbNode::new(BlockKind::Code, Some(0)));
        let _orphan = cfg.add_node(BbNode::new(BlockKind::Code, Some(1)));
        let b = cfg.add_node(BbNode::new(BlockKind::Code, Some(2)));
        cfg.add_edge(a, b);
        cfg.set_entry(a);
        let remap = cfg.canonicalise();
        assert_eq!(cfg.len(), 2);
        assert_eq!(remap[&2], 1);
        assert_eq!(cfg.successors(0), [1]);
    }

    #[test]
    fn test_trivial_cfg_topologically_equivalent_to_itself() {
        let function = read_function(samples::TRIVIAL).unwrap();
        let lhs = RegionCfg::from_function(&function);
        let rhs = RegionCfg::from_function(&function);
        assert_eq!(lhs.dot(), rhs.dot());
        assert!(is_topologically_equivalent(
            lhs.graph(), lhs.entry(),
            rhs.graph(), rhs.entry(),
            |a, b| a.kind == b.kind && a.state_value == b.state_value,
        ));
    }

    #[test]
    fn test_check_dispatchers() {
        let mut cfg = RegionCfg::new();
        let set = cfg.add_node(BbNode {
            kind: BlockKind::EntrySet,
            source: None,
            state_value: Some(0),
            branch_negated: false,
            region: None,
        });
        let code = cfg.add_node(BbNode::new(BlockKind::Code, Some(0)));
        cfg.add_edge(set, code);
        cfg.set_entry(set);
        assert!(cfg.check_dispatchers(&Markers::default()).is_err());
    }
}
