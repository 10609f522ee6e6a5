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

//! Boolean condition expressions over atomic block conditions.
//!
//! Expressions form a small persistent DAG: leaves (one per condition
//! block) are interned and shared, inner nodes are append-only. Both the
//! `if` emission and the dispatcher simplification build on this pool.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Index of an expression in its [`ExprPool`].
pub type ExprId = usize;

/// One node of a boolean condition expression.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub enum ExprNode {
    /// The condition computed by basic block `bb`.
    Atom {
        /// Index of the condition block.
        bb: usize,
    },
    /// Logical negation.
    Not(ExprId),
    /// Logical conjunction.
    And(ExprId, ExprId),
    /// Logical disjunction.
    Or(ExprId, ExprId),
}

/// Append-only arena of [`ExprNode`]s with interned leaves.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ExprPool {
    nodes: Vec<ExprNode>,
    atoms: BTreeMap<usize, ExprId>,
}

impl ExprPool {
    /// An empty pool.
    pub fn new() -> Self { Self::default() }

    /// The atomic condition of block `bb`; shared across all its users.
    pub fn atom(&mut self, bb: usize) -> ExprId {
        if let Some(&id) = self.atoms.get(&bb) { return id; }
        self.nodes.push(ExprNode::Atom { bb });
        let id = self.nodes.len() - 1;
        self.atoms.insert(bb, id);
        id
    }

    /// Negation; double negations collapse to the operand.
    pub fn not(&mut self, operand: ExprId) -> ExprId {
        if let ExprNode::Not(inner) = self.nodes[operand] { return inner; }
        self.push(ExprNode::Not(operand))
    }

    /// Conjunction of `lhs` and `rhs`.
    pub fn and(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::And(lhs, rhs))
    }

    /// Disjunction of `lhs` and `rhs`.
    pub fn or(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Or(lhs, rhs))
    }

    fn push(&mut self, node: ExprNode) -> ExprId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// The node behind `id`.
    pub fn node(&self, id: ExprId) -> ExprNode { self.nodes[id] }

    /// Structural equality of two expressions, possibly from different ids.
    pub fn structural_eq(&self, lhs: ExprId, rhs: ExprId) -> bool {
        if lhs == rhs { return true; }
        self.eq_across(lhs, self, rhs)
    }

    /// Structural equality of expressions living in different pools.
    pub fn eq_across(&self, lhs: ExprId, other: &ExprPool, rhs: ExprId) -> bool {
        match (self.node(lhs), other.node(rhs)) {
            (ExprNode::Atom { bb: x }, ExprNode::Atom { bb: y }) => x == y,
            (ExprNode::Not(x), ExprNode::Not(y)) => self.eq_across(x, other, y),
            (ExprNode::And(xl, xr), ExprNode::And(yl, yr))
            | (ExprNode::Or(xl, xr), ExprNode::Or(yl, yr)) =>
                self.eq_across(xl, other, yl) && self.eq_across(xr, other, yr),
            _ => false,
        }
    }

    /// Render `id` for dumps.
    pub fn display(&self, id: ExprId) -> ExprDisplay<'_> {
        ExprDisplay { pool: self, id }
    }
}

/// [`Display`] adapter for an expression in a pool.
pub struct ExprDisplay<'a> {
    pool: &'a ExprPool,
    id: ExprId,
}

impl Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.pool.node(self.id) {
            ExprNode::Atom { bb } => write!(f, "c{}", bb),
            ExprNode::Not(x) => write!(f, "not {}", self.pool.display(x)),
            ExprNode::And(x, y) =>
                write!(f, "({} and {})", self.pool.display(x), self.pool.display(y)),
            ExprNode::Or(x, y) =>
                write!(f, "({} or {})", self.pool.display(x), self.pool.display(y)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExprNode, ExprPool};

    #[test]
    fn test_shared_leaves() {
        let mut pool = ExprPool::new();
        let a = pool.atom(3);
        let b = pool.atom(3);
        assert_eq!(a, b);
        assert_ne!(pool.atom(4), a);
    }

    #[test]
    fn test_double_negation() {
        let mut pool = ExprPool::new();
        let a = pool.atom(0);
        let na = pool.not(a);
        assert_eq!(pool.not(na), a);
        assert_eq!(pool.node(na), ExprNode::Not(a));
    }

    #[test]
    fn test_structural_eq() {
        let mut pool = ExprPool::new();
        let a = pool.atom(0);
        let b = pool.atom(1);
        let lhs = pool.and(a, b);
        let rhs = pool.and(a, b);
        assert_ne!(lhs, rhs);
        assert!(pool.structural_eq(lhs, rhs));
        let or = pool.or(a, b);
        assert!(!pool.structural_eq(lhs, or));
    }

    #[test]
    fn test_display() {
        let mut pool = ExprPool::new();
        let a = pool.atom(0);
        let b = pool.atom(5);
        let nb = pool.not(b);
        let both = pool.and(a, nb);
        assert_eq!(pool.display(both).to_string(), "(c0 and not c5)");
    }
}
