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

//! The structured AST produced by the restructuring engine.
//!
//! Nodes live in an arena owned by the [`AstTree`] and refer to each other
//! by stable integer id. During construction every node may carry one
//! pending `successor` link; [`beautify`] turns that hybrid form into a
//! pure tree by absorbing successor chains into [`AstKind::Sequence`]
//! nodes. Construction is performed exclusively by [`cfg::comb`].
//!
//! [`cfg::comb`]: crate::cfg::comb

pub mod expr;
pub mod beautify;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use smallvec::SmallVec;

pub use expr::{ExprId, ExprNode, ExprPool};

/// Index of a node in its [`AstTree`].
pub type AstId = usize;

/// Labels selecting a `switch` case; the empty set denotes `default`.
pub type LabelSet = BTreeSet<u64>;

/// Loop flavours for [`AstKind::Scs`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoopKind {
    /// `while (true) { ... }`: no single exit test was recovered.
    WhileTrue,
    /// `while (c) { ... }`: the loop header supplies the test.
    While,
    /// `do { ... } while (c)`: the latch supplies the test.
    DoWhile,
}

/// Which flavour of state-variable dispatching a `Set` or `Switch` node
/// belongs to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DispatcherKind {
    /// Selects among the entries of a multi-entry region.
    Entry,
    /// Routes the shared exits of a region.
    Exit,
}

/// The closed sum of structured statements.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AstKind {
    /// Straight-line code taken verbatim from a basic block.
    Code {
        /// Whether the trailing return may stay implicit when printed.
        implicit_return: bool,
    },
    /// Two-way conditional.
    If {
        /// Condition expression over atomic block conditions.
        condition: ExprId,
        /// Whether the branch tested the negated condition.
        condition_negated: bool,
        /// Taken branch.
        then_branch: Option<AstId>,
        /// Fallthrough branch.
        else_branch: Option<AstId>,
    },
    /// A loop.
    Scs {
        /// Loop flavour.
        kind: LoopKind,
        /// Loop body.
        body: Option<AstId>,
        /// For [`LoopKind::While`]/[`LoopKind::DoWhile`]: the `If` whose
        /// condition block supplies the loop test. A back-reference, not a
        /// child.
        related_condition: Option<AstId>,
    },
    /// Consecutive statements.
    Sequence {
        /// The statements, in execution order.
        nodes: Vec<AstId>,
    },
    /// Multi-way dispatch.
    Switch {
        /// `(labels, body)` pairs in source order; an empty label set is
        /// the `default` case.
        cases: Vec<(LabelSet, AstId)>,
        /// Set when this switch was synthesised over a dispatcher state
        /// variable.
        dispatcher: Option<DispatcherKind>,
        /// The switch needs a dedicated state variable to break out of an
        /// enclosing loop.
        needs_state_variable: bool,
        /// The switch needs a trailing dispatcher to route loop breaks.
        needs_loop_break_dispatcher: bool,
    },
    /// `break` out of the innermost enclosing `switch`.
    SwitchBreak {
        /// The switch broken out of. A back-reference, not a child.
        parent: AstId,
    },
    /// `break` out of the innermost enclosing loop.
    Break {
        /// Set when the break statement sits inside a `switch` and must
        /// therefore go through a state variable.
        from_within_switch: bool,
    },
    /// `continue` the innermost enclosing loop.
    Continue {
        /// The `If` whose condition block instructions must re-execute
        /// before each loopback. A back-reference, not a child.
        computation: Option<AstId>,
        /// Whether the continue is implicit at the end of the body.
        implicit: bool,
    },
    /// Assignment to a dispatcher state variable.
    Set {
        /// The value assigned.
        state_value: u64,
        /// The dispatcher this assignment feeds.
        dispatcher: DispatcherKind,
    },
}

/// One AST node: payload plus the bookkeeping shared by all variants.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AstNode {
    /// Stable id, equal to the node's index in the owning tree.
    pub id: AstId,
    /// The originating basic block, if any. Duplicated nodes share it.
    pub bb: Option<usize>,
    /// Structural successor; consumed during beautification.
    pub successor: Option<AstId>,
    /// The statement itself.
    pub kind: AstKind,
}

/// Arena-owned structured AST.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct AstTree {
    nodes: Vec<AstNode>,
    /// Condition expressions referenced by `If` nodes.
    pub exprs: ExprPool,
    root: Option<AstId>,
}

impl AstTree {
    /// An empty tree.
    pub fn new() -> Self { Self::default() }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize { self.nodes.len() }

    /// Whether the arena holds no nodes at all.
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// The root statement, once construction has set one.
    pub fn root(&self) -> Option<AstId> { self.root }

    /// Set the root statement.
    pub fn set_root(&mut self, root: AstId) { self.root = Some(root); }

    /// The node behind `id`.
    pub fn node(&self, id: AstId) -> &AstNode { &self.nodes[id] }

    /// Mutable access to the node behind `id`.
    pub fn node_mut(&mut self, id: AstId) -> &mut AstNode { &mut self.nodes[id] }

    /// Append a node, returning its stable id.
    pub fn add(&mut self, bb: Option<usize>, kind: AstKind) -> AstId {
        let id = self.nodes.len();
        self.nodes.push(AstNode { id, bb, successor: None, kind });
        id
    }

    /// Append an empty [`AstKind::Sequence`].
    pub fn add_sequence(&mut self) -> AstId {
        self.add(None, AstKind::Sequence { nodes: Vec::new() })
    }

    /// Detach and return the successor of `id`.
    pub fn consume_successor(&mut self, id: AstId) -> Option<AstId> {
        self.nodes[id].successor.take()
    }

    /// Append `node` to the sequence `seq`, then recursively append the
    /// consumed successor chain of `node`. This is the sole mechanism that
    /// turns the hybrid successor form into a pure tree.
    pub fn sequence_push(&mut self, seq: AstId, node: AstId) {
        match &mut self.nodes[seq].kind {
            AstKind::Sequence { nodes } => nodes.push(node),
            _ => unreachable!("sequence_push target must be a Sequence"),
        }
        if let Some(next) = self.consume_successor(node) {
            self.sequence_push(seq, next);
        }
    }

    /// Child ids of `id`, in traversal order. Back-references
    /// (`related_condition`, `computation`, `SwitchBreak::parent`) are not
    /// children.
    pub fn children(&self, id: AstId) -> SmallVec<[AstId; 4]> {
        let mut out = SmallVec::new();
        match &self.nodes[id].kind {
            AstKind::If { then_branch, else_branch, .. } => {
                out.extend(then_branch.iter().copied());
                out.extend(else_branch.iter().copied());
            }
            AstKind::Scs { body, .. } => out.extend(body.iter().copied()),
            AstKind::Sequence { nodes } => out.extend(nodes.iter().copied()),
            AstKind::Switch { cases, .. } => out.extend(cases.iter().map(|(_, body)| *body)),
            AstKind::Code { .. } | AstKind::SwitchBreak { .. } | AstKind::Break { .. }
            | AstKind::Continue { .. } | AstKind::Set { .. } => {}
        }
        out
    }

    /// Replace the direct child `old` of `parent` with `new`, wherever it
    /// appears (branches, body, sequence elements, case bodies).
    pub fn replace_child(&mut self, parent: AstId, old: AstId, new: AstId) {
        match &mut self.nodes[parent].kind {
            AstKind::If { then_branch, else_branch, .. } => {
                for slot in [then_branch, else_branch] {
                    if *slot == Some(old) { *slot = Some(new); }
                }
            }
            AstKind::Scs { body, .. } => {
                if *body == Some(old) { *body = Some(new); }
            }
            AstKind::Sequence { nodes } => {
                for slot in nodes {
                    if *slot == old { *slot = new; }
                }
            }
            AstKind::Switch { cases, .. } => {
                for (_, body) in cases {
                    if *body == old { *body = new; }
                }
            }
            AstKind::Code { .. } | AstKind::SwitchBreak { .. } | AstKind::Break { .. }
            | AstKind::Continue { .. } | AstKind::Set { .. } => {}
        }
    }

    /// Post-order traversal from `id`: children first, then the node,
    /// then its structural successor (when still unconsumed).
    pub fn post_order(&self, id: AstId) -> Vec<AstId> {
        let mut order = Vec::new();
        self.post_order_into(id, &mut order);
        order
    }

    fn post_order_into(&self, id: AstId, order: &mut Vec<AstId>) {
        for child in self.children(id) {
            self.post_order_into(child, order);
        }
        order.push(id);
        if let Some(next) = self.nodes[id].successor {
            self.post_order_into(next, order);
        }
    }

    /// Substitute node references according to `map`: successors, child
    /// links and back-references alike. Ids missing from the map are left
    /// alone.
    pub fn update_pointers(&mut self, map: &BTreeMap<AstId, AstId>) {
        let subst = |id: &mut AstId| {
            if let Some(&new) = map.get(id) { *id = new; }
        };
        for node in &mut self.nodes {
            if let Some(successor) = &mut node.successor { subst(successor); }
            match &mut node.kind {
                AstKind::If { then_branch, else_branch, .. } => {
                    then_branch.iter_mut().for_each(&subst);
                    else_branch.iter_mut().for_each(&subst);
                }
                AstKind::Scs { body, related_condition, .. } => {
                    body.iter_mut().for_each(&subst);
                    related_condition.iter_mut().for_each(&subst);
                }
                AstKind::Sequence { nodes } => nodes.iter_mut().for_each(&subst),
                AstKind::Switch { cases, .. } =>
                    cases.iter_mut().for_each(|(_, body)| subst(body)),
                AstKind::SwitchBreak { parent } => subst(parent),
                AstKind::Continue { computation, .. } =>
                    computation.iter_mut().for_each(&subst),
                AstKind::Code { .. } | AstKind::Break { .. } | AstKind::Set { .. } => {}
            }
        }
        if let Some(root) = &mut self.root { subst(root); }
    }

    /// Deep-clone the subtree rooted at `id` (successor chains included),
    /// returning the clone's root. Clones share basic block back-pointers
    /// and condition expressions with their originals; back-references into
    /// the cloned region are remapped, those pointing outside are kept.
    pub fn clone_subtree(&mut self, id: AstId) -> AstId {
        let mut map = BTreeMap::new();
        let root = self.clone_rec(id, &mut map);
        // Fix back-references that point into the cloned region.
        let cloned: Vec<AstId> = map.values().copied().collect();
        for k in cloned {
            let remap = |target: &mut AstId| {
                if let Some(&new) = map.get(target) { *target = new; }
            };
            match &mut self.nodes[k].kind {
                AstKind::Scs { related_condition, .. } =>
                    related_condition.iter_mut().for_each(remap),
                AstKind::Continue { computation, .. } =>
                    computation.iter_mut().for_each(remap),
                AstKind::SwitchBreak { parent } => remap(parent),
                _ => {}
            }
        }
        root
    }

    fn clone_rec(&mut self, id: AstId, map: &mut BTreeMap<AstId, AstId>) -> AstId {
        let bb = self.nodes[id].bb;
        let kind = self.nodes[id].kind.clone();
        let kind = match kind {
            AstKind::If { condition, condition_negated, then_branch, else_branch } => AstKind::If {
                condition,
                condition_negated,
                then_branch: then_branch.map(|t| self.clone_rec(t, map)),
                else_branch: else_branch.map(|e| self.clone_rec(e, map)),
            },
            AstKind::Scs { kind, body, related_condition } => AstKind::Scs {
                kind,
                body: body.map(|b| self.clone_rec(b, map)),
                related_condition,
            },
            AstKind::Sequence { nodes } => AstKind::Sequence {
                nodes: nodes.into_iter().map(|n| self.clone_rec(n, map)).collect(),
            },
            AstKind::Switch { cases, dispatcher, needs_state_variable, needs_loop_break_dispatcher } =>
                AstKind::Switch {
                    cases: cases.into_iter()
                        .map(|(labels, body)| (labels, self.clone_rec(body, map)))
                        .collect(),
                    dispatcher,
                    needs_state_variable,
                    needs_loop_break_dispatcher,
                },
            leaf => leaf,
        };
        let new = self.add(bb, kind);
        map.insert(id, new);
        if let Some(successor) = self.nodes[id].successor {
            let cloned = self.clone_rec(successor, map);
            self.nodes[new].successor = Some(cloned);
        }
        new
    }

    /// Structural equality of the subtrees at `lhs` (in `self`) and `rhs`
    /// (in `other`). Ids and successors are ignored; `Code` nodes compare
    /// their basic block back-pointers.
    pub fn eq_nodes(&self, lhs: AstId, other: &AstTree, rhs: AstId) -> bool {
        let (l, r) = (&self.nodes[lhs], &other.nodes[rhs]);
        match (&l.kind, &r.kind) {
            (
                AstKind::Code { implicit_return: li },
                AstKind::Code { implicit_return: ri },
            ) => li == ri && l.bb == r.bb,
            (
                AstKind::If { condition: lc, condition_negated: ln, then_branch: lt, else_branch: le },
                AstKind::If { condition: rc, condition_negated: rn, then_branch: rt, else_branch: re },
            ) => ln == rn
                && self.exprs.eq_across(*lc, &other.exprs, *rc)
                && self.eq_opt(*lt, other, *rt)
                && self.eq_opt(*le, other, *re),
            (
                AstKind::Scs { kind: lk, body: lb, .. },
                AstKind::Scs { kind: rk, body: rb, .. },
            ) => lk == rk && self.eq_opt(*lb, other, *rb),
            (
                AstKind::Sequence { nodes: ls },
                AstKind::Sequence { nodes: rs },
            ) => ls.len() == rs.len()
                && ls.iter().zip(rs).all(|(&x, &y)| self.eq_nodes(x, other, y)),
            (
                AstKind::Switch { cases: lc, dispatcher: ld, .. },
                AstKind::Switch { cases: rc, dispatcher: rd, .. },
            ) => ld == rd && lc.len() == rc.len()
                && lc.iter().zip(rc).all(|((xl, xb), (yl, yb))|
                    xl == yl && self.eq_nodes(*xb, other, *yb)),
            (AstKind::SwitchBreak { .. }, AstKind::SwitchBreak { .. }) => true,
            (AstKind::Break { .. }, AstKind::Break { .. }) => true,
            (AstKind::Continue { .. }, AstKind::Continue { .. }) => true,
            (
                AstKind::Set { state_value: lv, dispatcher: ld },
                AstKind::Set { state_value: rv, dispatcher: rd },
            ) => lv == rv && ld == rd,
            _ => false,
        }
    }

    fn eq_opt(&self, lhs: Option<AstId>, other: &AstTree, rhs: Option<AstId>) -> bool {
        match (lhs, rhs) {
            (None, None) => true,
            (Some(x), Some(y)) => self.eq_nodes(x, other, y),
            _ => false,
        }
    }

    /// Structural equality of two whole trees (their roots).
    pub fn tree_eq(&self, other: &AstTree) -> bool {
        match (self.root, other.root) {
            (None, None) => true,
            (Some(lhs), Some(rhs)) => self.eq_nodes(lhs, other, rhs),
            _ => false,
        }
    }

    /// The `default` case of a switch, if present. At most one case may
    /// carry an empty label set.
    pub fn switch_default(&self, id: AstId) -> Option<AstId> {
        match &self.nodes[id].kind {
            AstKind::Switch { cases, .. } => {
                let mut default = None;
                for (labels, body) in cases {
                    if labels.is_empty() {
                        debug_assert!(default.is_none(), "two default cases in one switch");
                        default = Some(*body);
                    }
                }
                default
            }
            _ => None,
        }
    }

    /// Render the tree in dot syntax: node id, label, ordered successors.
    pub fn dot(&self) -> String {
        let mut out = String::from("digraph ast {\n");
        if let Some(root) = self.root {
            for id in self.post_order(root) {
                let node = self.node(id);
                let _ = writeln!(out, "  n{} [label=\"{}\"];", id, self.dot_label(node));
                for child in self.children(id) {
                    let _ = writeln!(out, "  n{} -> n{};", id, child);
                }
                if let Some(next) = node.successor {
                    let _ = writeln!(out, "  n{} -> n{} [style=dashed];", id, next);
                }
            }
        }
        out.push_str("}\n");
        out
    }

    fn dot_label(&self, node: &AstNode) -> String {
        match &node.kind {
            AstKind::Code { .. } => match node.bb {
                Some(bb) => format!("code bb{}", bb),
                None => "code".to_string(),
            },
            AstKind::If { condition, condition_negated, .. } => {
                let neg = if *condition_negated { "not " } else { "" };
                format!("if {}{}", neg, self.exprs.display(*condition))
            }
            AstKind::Scs { kind: LoopKind::WhileTrue, .. } => "loop".to_string(),
            AstKind::Scs { kind: LoopKind::While, .. } => "while".to_string(),
            AstKind::Scs { kind: LoopKind::DoWhile, .. } => "do-while".to_string(),
            AstKind::Sequence { .. } => "seq".to_string(),
            AstKind::Switch { dispatcher: Some(_), .. } => "dispatch".to_string(),
            AstKind::Switch { .. } => "switch".to_string(),
            AstKind::SwitchBreak { .. } => "switch break".to_string(),
            AstKind::Break { .. } => "break".to_string(),
            AstKind::Continue { .. } => "continue".to_string(),
            AstKind::Set { state_value, .. } => format!("set {}", state_value),
        }
    }
}
