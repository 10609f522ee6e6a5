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

//! Bit liveness: for every value, how many low-order bits may still be
//! observed by some side effect.
//!
//! The transfer functions read as `R = transfer(ins, E)`: if the first `E`
//! bits of the instruction's result are alive, then the first `R` bits of
//! its operands are alive. The analysis runs backwards from the data flow
//! sinks; the result feeds type shrinking downstream.

use std::collections::BTreeMap;

use crate::graph::NodeSet;
use crate::ir::{BinOp, Function, Instr, Operand, TagMap, Terminator};
use super::data_flow::{run_backward, BackwardTransfer, DataFlowGraph, DfNode};
use super::lattice::JoinSemiLattice;

/// `⊤`: every bit may be alive (also used where no finite width is known).
pub const TOP: u32 = u32::MAX;

/// Number of alive low-order bits, under meet = `max`.
#[derive(Debug, Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct LiveBits(pub u32);

impl JoinSemiLattice for LiveBits {
    fn bottom() -> Self { LiveBits(0) }
    fn join_assign(&mut self, other: &Self) -> bool {
        if other.0 > self.0 {
            self.0 = other.0;
            true
        } else {
            false
        }
    }
}

/// Whether this node is a data flow sink: an observable effect, or a
/// control flow transfer. Calls to functions known to never touch memory
/// are the one exception.
pub fn is_data_flow_sink(node: &DfNode, tags: &TagMap) -> bool {
    match node {
        DfNode::Instr(Instr::Store { .. }) => true,
        DfNode::Instr(Instr::Call { callee, .. }) => tags.has_side_effects(callee),
        DfNode::Instr(_) => false,
        DfNode::Terminator(_) => true,
    }
}

/// The bit liveness analysis over one function.
pub struct BitLiveness<'a> {
    function: &'a Function,
}

impl<'a> BitLiveness<'a> {
    /// Number of significant bits in `value` once masked to `width` bits.
    fn significant_bits(value: i64, width: u32) -> u32 {
        let masked = if width >= 64 {
            value as u64
        } else {
            (value as u64) & ((1u64 << width) - 1)
        };
        64 - masked.leading_zeros()
    }

    /// Largest operand width, or [`TOP`] when a non-integer operand is
    /// present.
    fn max_operand_width(&self, operands: &[Operand], context: u32) -> u32 {
        let mut max = 0;
        for &operand in operands {
            match self.function.operand_ty(operand, context).integer_bit_width() {
                Some(width) => max = max.max(width),
                None => return TOP,
            }
        }
        max
    }

    fn transfer_instr(&self, instr: &Instr, element: u32) -> u32 {
        match *instr {
            Instr::Binary { op: BinOp::And, width, lhs, rhs, .. } => {
                // A constant mask caps liveness at its most significant bit.
                let mut result = element.min(self.max_operand_width(&[lhs, rhs], width));
                for mask in [lhs, rhs].iter().filter_map(|op| op.as_const()) {
                    result = result.min(Self::significant_bits(mask, width));
                }
                result
            }
            Instr::Binary { op: BinOp::Shl, width, lhs, rhs, .. } => {
                match rhs.as_const() {
                    Some(shift) => {
                        let shift = shift as u32;
                        if element < shift { 0 } else { element - shift }
                    }
                    None => self.max_operand_width(&[lhs, rhs], width),
                }
            }
            Instr::Binary { op: BinOp::LShr | BinOp::AShr, width, lhs, rhs, .. } => {
                let operand_width = self.max_operand_width(&[lhs, rhs], width);
                match rhs.as_const() {
                    Some(shift) => {
                        let shift = shift as u32;
                        if TOP - shift < element {
                            TOP
                        } else {
                            operand_width.min(element + shift)
                        }
                    }
                    None => operand_width,
                }
            }
            Instr::Binary { width, lhs, rhs, .. } =>
                element.min(self.max_operand_width(&[lhs, rhs], width)),
            Instr::Trunc { width, .. } => element.min(width),
            Instr::ZExt { width, operand, .. } =>
                element.min(self.max_operand_width(&[operand], width)),
            // By default all the bits of the operands can be alive.
            _ => {
                let operands = instr.operands();
                let context = instr.result_ty()
                    .and_then(|ty| ty.integer_bit_width())
                    .unwrap_or(64);
                self.max_operand_width(&operands, context)
            }
        }
    }
}

impl<'a> BackwardTransfer<DfNode<'a>> for BitLiveness<'a> {
    type Value = LiveBits;

    fn v_sink(&self, _: &DfNode<'a>) -> LiveBits { LiveBits(TOP) }

    fn transfer(&self, node: &DfNode<'a>, element: &LiveBits) -> LiveBits {
        LiveBits(match node {
            DfNode::Instr(instr) => self.transfer_instr(instr, element.0),
            DfNode::Terminator(Terminator::RetValue(operand)) =>
                self.max_operand_width(&[*operand], 64),
            DfNode::Terminator(Terminator::Branch { condition, .. }) =>
                self.max_operand_width(&[*condition], 64),
            DfNode::Terminator(_) => 0,
        })
    }
}

/// Run bit liveness over `function`, returning the live prefix of every
/// register, clamped to the register's native width.
pub fn bit_liveness(function: &Function, tags: &TagMap) -> BTreeMap<usize, u32> {
    let dfg = DataFlowGraph::build(function);
    let sinks: NodeSet = dfg.graph.iter()
        .filter(|(_, node)| is_data_flow_sink(node, tags))
        .map(|(k, _)| k)
        .collect();
    log::debug!(target: "bit-liveness", "{} nodes, {} sinks", dfg.graph.node_count(), sinks.len());
    let analysis = BitLiveness { function };
    let values = run_backward(&dfg.graph, &sinks, &analysis);
    dfg.def_node.iter()
        .map(|(&reg, &node)| {
            let native = function.def_ty(reg)
                .and_then(|ty| ty.integer_bit_width())
                .unwrap_or(TOP);
            (reg, values[node].0.min(native))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::ir::function::read_function;
    use crate::ir::{FunctionTag, TagMap};
    use crate::samples;
    use super::{bit_liveness, BitLiveness, LiveBits};
    use super::super::lattice::JoinSemiLattice;

    #[test]
    fn test_join_is_max() {
        let mut e = LiveBits(4);
        assert!(!e.join_assign(&LiveBits(3)));
        assert!(e.join_assign(&LiveBits(9)));
        assert_eq!(e, LiveBits(9));
    }

    #[test]
    fn test_significant_bits() {
        assert_eq!(BitLiveness::significant_bits(0xff, 32), 8);
        assert_eq!(BitLiveness::significant_bits(0x100, 32), 9);
        assert_eq!(BitLiveness::significant_bits(0, 32), 0);
        // Masked to the operand width first.
        assert_eq!(BitLiveness::significant_bits(-1, 16), 16);
    }

    #[test]
    fn test_mask_and() {
        // %1 = %0 & 0xff, and only the bottom 4 bits of %1 reach the store.
        let function = read_function(samples::MASK_AND).unwrap();
        let live = bit_liveness(&function, &TagMap::default());
        assert_eq!(live[&1], 4);
        assert_eq!(live[&0], 4);
    }

    #[test]
    fn test_shifts() {
        let function = read_function(samples::SHIFTS).unwrap();
        let live = bit_liveness(&function, &TagMap::default());
        // 32 bits of %2 = shl.32 %1 8 are returned, so 24 bits of %1 flow
        // out; %1 = lshr.32 %0 16 pushes liveness up by the shift amount,
        // capped at the operand width.
        assert_eq!(live[&1], 24);
        assert_eq!(live[&0], 32);
    }

    #[test]
    fn test_non_integer_operand_is_top() {
        let function = read_function(samples::BLOB_SINK).unwrap();
        let live = bit_liveness(&function, &TagMap::default());
        // The call consumes a blob: its argument register is fully alive.
        assert_eq!(live[&1], 64);
    }

    #[test]
    fn test_readnone_call_is_not_a_sink() {
        let mut tags = TagMap::default();
        tags.insert("observe", FunctionTag::ReadNone);
        let function = read_function(samples::READNONE_CALL).unwrap();
        let live = bit_liveness(&function, &tags);
        // The only potential sink ignores memory, and the call result is
        // otherwise unused: nothing keeps %0 alive.
        assert_eq!(live[&0], 0);
        let live = bit_liveness(&function, &TagMap::default());
        assert_eq!(live[&0], 32);
    }

    #[test]
    fn test_monotone_below_native_width() {
        for sample in samples::ALL_SAMPLES {
            let function = read_function(sample).unwrap();
            for (reg, live) in bit_liveness(&function, &TagMap::default()) {
                if let Some(width) = function.def_ty(reg).and_then(|t| t.integer_bit_width()) {
                    assert!(live <= width, "%{} live {} over width {}", reg, live, width);
                }
            }
        }
    }

    #[test]
    fn test_shift_saturates_at_top() {
        // The store's blob operand pushes `⊤` into the shift; adding the
        // shift amount must saturate rather than wrap to a dead value.
        let function = read_function(samples::SATURATE).unwrap();
        let live = bit_liveness(&function, &TagMap::default());
        assert_eq!(live[&1], 32);
        assert_eq!(live[&0], 32);
    }
}
