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

//! The data flow graph and the generic worklist fixpoint driver.
//!
//! The graph has one node per instruction (terminators included) and one
//! edge per def-use pair whose defined value is integer-typed: use→def
//! edges are reversed at construction, so walking *backwards* along the
//! analysis direction means walking predecessor lists here.

use std::collections::{BTreeMap, VecDeque};

use crate::graph::{DiGraph, NodeSet};
use crate::ir::{Function, Instr, Operand, Terminator};
use super::lattice::JoinSemiLattice;

/// Payload of a data flow node.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DfNode<'a> {
    /// A straight-line instruction.
    Instr(&'a Instr),
    /// A block terminator.
    Terminator(&'a Terminator),
}

/// Data flow graph over one [`Function`].
#[derive(Debug)]
pub struct DataFlowGraph<'a> {
    /// The def→use graph itself.
    pub graph: DiGraph<DfNode<'a>>,
    /// For each register, the node defining it.
    pub def_node: BTreeMap<usize, usize>,
}

impl<'a> DataFlowGraph<'a> {
    /// Build the data flow graph of `function`.
    pub fn build(function: &'a Function) -> Self {
        let mut graph = DiGraph::new();
        let mut def_node = BTreeMap::new();
        for block in &function.blocks {
            for instr in &block.instructions {
                let node = graph.add_node(DfNode::Instr(instr));
                if let Some(reg) = instr.result() {
                    def_node.insert(reg, node);
                }
            }
            graph.add_node(DfNode::Terminator(&block.terminator));
        }
        // Def-use edges, restricted to integer-valued definitions.
        let mut dfg = DataFlowGraph { graph, def_node };
        for user in 0..dfg.graph.node_count() {
            let operands = match *dfg.graph.node(user) {
                DfNode::Instr(instr) => instr.operands(),
                DfNode::Terminator(terminator) => terminator.operands(),
            };
            for operand in operands {
                if let Operand::Reg(reg) = operand {
                    let integer = function.def_ty(reg)
                        .and_then(|ty| ty.integer_bit_width())
                        .is_some();
                    if !integer { continue; }
                    if let Some(&def) = dfg.def_node.get(&reg) {
                        dfg.graph.add_edge(def, user);
                    }
                }
            }
        }
        dfg
    }
}

/// Transfer function of a backward analysis over the data flow graph.
pub trait BackwardTransfer<N> {
    /// Lattice of per-node values.
    type Value: JoinSemiLattice;
    /// Boundary value for sink nodes.
    fn v_sink(&self, node: &N) -> Self::Value;
    /// `transfer(node, element)`: assuming `element` describes what is
    /// observed of the node's result, the value imposed on the definitions
    /// of the node's operands.
    fn transfer(&self, node: &N, element: &Self::Value) -> Self::Value;
}

/// Run a backward worklist fixpoint: sinks start at their boundary value,
/// everything else at `⊥`; a node re-enters the worklist whenever its value
/// grows. Monotone transfers terminate in `O(nodes × lattice height)` steps.
pub fn run_backward<N, T: BackwardTransfer<N>>(
    graph: &DiGraph<N>,
    sinks: &NodeSet,
    analysis: &T,
) -> Vec<T::Value> {
    let preds = graph.predecessors();
    let mut values: Vec<T::Value> = (0..graph.node_count())
        .map(|_| T::Value::bottom())
        .collect();
    let mut worklist: VecDeque<usize> = VecDeque::new();
    for &sink in sinks {
        values[sink] = analysis.v_sink(graph.node(sink));
        worklist.push_back(sink);
    }
    while let Some(user) = worklist.pop_front() {
        let imposed = analysis.transfer(graph.node(user), &values[user]);
        for &def in &preds[user] {
            if values[def].join_assign(&imposed) {
                worklist.push_back(def);
            }
        }
    }
    values
}
