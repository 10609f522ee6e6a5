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

//! Cleanup passes over a freshly emitted AST.
//!
//! The passes must run in the order [`beautify`] applies them: promotion of
//! two-case switches to `if`s reads the dispatcher-kind attribute, which
//! only exists on `Switch` nodes, so the inline-dispatcher simplification
//! (which consumes `Set`/`Switch` pairs) has to see the tree first.

use std::collections::BTreeMap;

use super::{AstId, AstKind, AstTree};

/// Run all the cleanup passes in their required order.
pub fn beautify(tree: &mut AstTree) {
    flatten(tree);
    simplify_inline_dispatcher(tree);
    promote_dual_switches(tree);
}

/// Absorb successor chains into `Sequence` nodes. Afterwards no reachable
/// node carries a structural successor.
pub fn flatten(tree: &mut AstTree) {
    if let Some(root) = tree.root() {
        let new_root = flatten_node(tree, root);
        tree.set_root(new_root);
    }
}

fn flatten_node(tree: &mut AstTree, id: AstId) -> AstId {
    if tree.node(id).successor.is_some() {
        let seq = tree.add_sequence();
        tree.sequence_push(seq, id);
        for element in tree.children(seq).to_vec() {
            flatten_children(tree, element);
        }
        seq
    } else {
        flatten_children(tree, id);
        id
    }
}

fn flatten_children(tree: &mut AstTree, id: AstId) {
    for child in tree.children(id).to_vec() {
        let new = flatten_node(tree, child);
        if new != child {
            tree.replace_child(id, child, new);
        }
    }
}

/// Inline dispatcher switches whose state variable was just assigned: a
/// `Set(v)` directly followed by a dispatcher `Switch` of the same kind
/// collapses to the case selected by `v`.
pub fn simplify_inline_dispatcher(tree: &mut AstTree) {
    for id in 0..tree.len() {
        loop {
            let found = find_set_switch_pair(tree, id);
            let (at, selected) = match found {
                Some(pair) => pair,
                None => break,
            };
            log::debug!(target: "beautify", "inlining dispatcher switch in sequence {}", id);
            match &mut tree.node_mut(id).kind {
                AstKind::Sequence { nodes } => {
                    // Drop the Set and the Switch, splice the selected case.
                    match selected {
                        Some(body) => {
                            nodes[at] = body;
                            nodes.remove(at + 1);
                        }
                        None => {
                            nodes.remove(at + 1);
                            nodes.remove(at);
                        }
                    }
                }
                _ => unreachable!("pair found outside a sequence"),
            }
        }
    }
}

/// Find `(index, selected_case)` of a `Set`/`Switch` pair inside the
/// sequence `id`, if any.
fn find_set_switch_pair(tree: &AstTree, id: AstId) -> Option<(usize, Option<AstId>)> {
    let nodes = match &tree.node(id).kind {
        AstKind::Sequence { nodes } => nodes,
        _ => return None,
    };
    for (at, pair) in nodes.windows(2).enumerate() {
        let (value, set_kind) = match tree.node(pair[0]).kind {
            AstKind::Set { state_value, dispatcher } => (state_value, dispatcher),
            _ => continue,
        };
        let (cases, switch_kind) = match &tree.node(pair[1]).kind {
            AstKind::Switch { cases, dispatcher: Some(kind), .. } => (cases, *kind),
            _ => continue,
        };
        if set_kind != switch_kind { continue; }
        let selected = cases.iter()
            .find(|(labels, _)| labels.contains(&value))
            .or_else(|| cases.iter().find(|(labels, _)| labels.is_empty()))
            .map(|(_, body)| *body);
        return Some((at, selected));
    }
    None
}

/// Promote dispatcher switches with one or two cases: a single case becomes
/// its body, two cases become an `If` testing the first label set against
/// the state variable.
pub fn promote_dual_switches(tree: &mut AstTree) {
    let mut substitution = BTreeMap::new();
    for id in 0..tree.len() {
        let (bb, cases) = match &tree.node(id).kind {
            AstKind::Switch { cases, dispatcher: Some(_), .. } => (tree.node(id).bb, cases.clone()),
            _ => continue,
        };
        match cases.as_slice() {
            [(_, only)] => {
                log::debug!(target: "beautify", "collapsing single-case dispatcher {}", id);
                substitution.insert(id, *only);
            }
            [(then_labels, then_branch), (_, else_branch)] => {
                log::debug!(target: "beautify", "promoting dual dispatcher {} to if", id);
                // The `If` tests the state variable against the first label
                // set; the dispatcher block stands in as the condition atom.
                debug_assert!(!then_labels.is_empty(), "default case ordered first");
                let condition = tree.exprs.atom(bb.unwrap_or(id));
                let promoted = tree.add(bb, AstKind::If {
                    condition,
                    condition_negated: false,
                    then_branch: Some(*then_branch),
                    else_branch: Some(*else_branch),
                });
                substitution.insert(id, promoted);
            }
            _ => {}
        }
    }
    if !substitution.is_empty() {
        tree.update_pointers(&substitution);
    }
}
