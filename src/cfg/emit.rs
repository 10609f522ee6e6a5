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

//! AST emission: a post-order walk over the collapsed region tree.
//!
//! Condition blocks are materialised exactly as often as the condition is
//! evaluated at runtime: once before a `while` plus once at the tail of
//! each iteration, once per `do-while` iteration at the tail, and once
//! before a plain `if`. The copies are distinct AST nodes sharing the same
//! block back-pointer.

use crate::ast::{beautify::beautify, AstId, AstKind, AstTree, DispatcherKind, LabelSet, LoopKind};
use crate::ir::{Function, Terminator};
use super::comb::Config;
use super::{BlockKind, LoopShape, LoopTest, Markers, RegionCfg, RegionPayload, SubRegion};

struct EmitCtx<'a> {
    function: &'a Function,
    config: &'a Config,
}

/// A successor-linked run of freshly emitted statements.
#[derive(Copy, Clone)]
struct Chain {
    head: AstId,
    tail: AstId,
}

impl Chain {
    fn append(tree: &mut AstTree, chain: &mut Option<Chain>, head: AstId, tail: AstId) {
        match chain {
            None => *chain = Some(Chain { head, tail }),
            Some(chain) => {
                tree.node_mut(chain.tail).successor = Some(head);
                chain.tail = tail;
            }
        }
    }
}

/// Emit the AST of a fully structured region chain.
pub fn emit(cfg: &RegionCfg, markers: &Markers, function: &Function, config: &Config) -> AstTree {
    let mut tree = AstTree::new();
    let ctx = EmitCtx { function, config };
    let (chain, _) = emit_chain(&mut tree, &ctx, cfg, markers, cfg.entry(), None, false, true);
    let root = match chain {
        Some(chain) => chain.head,
        None => tree.add_sequence(),
    };
    tree.set_root(root);
    beautify(&mut tree);
    tree
}

/// Walk the chain starting at `start`, linking the emitted statements via
/// their structural successor. Returns the chain (if anything was emitted)
/// and whether the walk ended at the enclosing loop's continue marker.
///
/// Markers terminate a chain, so a continue materialised here is always
/// the chain's last statement; the top-level chain of a loop body passes
/// `materialize_continue = false` and lets the loop emission decide what
/// the loopback becomes.
#[allow(clippy::too_many_arguments)]
fn emit_chain(
    tree: &mut AstTree,
    ctx: &EmitCtx,
    cfg: &RegionCfg,
    markers: &Markers,
    start: usize,
    loop_cond: Option<AstId>,
    in_switch: bool,
    materialize_continue: bool,
) -> (Option<Chain>, bool) {
    let mut chain: Option<Chain> = None;
    let mut cur = Some(start);
    while let Some(k) = cur {
        if markers.exit == Some(k) {
            break;
        }
        if markers.cont == Some(k) {
            if materialize_continue {
                let node = tree.add(None, AstKind::Continue {
                    computation: loop_cond,
                    implicit: false,
                });
                Chain::append(tree, &mut chain, node, node);
            }
            return (chain, true);
        }
        if markers.brk == Some(k) {
            let node = tree.add(None, AstKind::Break { from_within_switch: in_switch });
            Chain::append(tree, &mut chain, node, node);
            return (chain, false);
        }
        let piece = match cfg.node(k).kind {
            BlockKind::Code | BlockKind::Weaved => code_piece(tree, ctx, cfg.node(k).source),
            BlockKind::EntrySet | BlockKind::ExitSet => {
                let dispatcher = match cfg.node(k).kind {
                    BlockKind::EntrySet => DispatcherKind::Entry,
                    _ => DispatcherKind::Exit,
                };
                let state_value = cfg.node(k).state_value
                    .unwrap_or_else(|| unreachable!("set node without a state value"));
                let node = tree.add(None, AstKind::Set { state_value, dispatcher });
                Some(Chain { head: node, tail: node })
            }
            BlockKind::Empty => None,
            BlockKind::Tile => {
                let payload = cfg.node(k).region.as_deref()
                    .unwrap_or_else(|| unreachable!("tile without a region"));
                match payload {
                    RegionPayload::Loop(sub, shape) =>
                        Some(loop_piece(tree, ctx, sub, shape)),
                    RegionPayload::Cond(_) => unreachable!("conditional region in a tile"),
                }
            }
            BlockKind::Collapsed => {
                let payload = cfg.node(k).region.as_deref()
                    .unwrap_or_else(|| unreachable!("collapsed node without a region"));
                match payload {
                    RegionPayload::Cond(sub) =>
                        cond_piece(tree, ctx, sub, loop_cond, in_switch),
                    RegionPayload::Loop(..) => unreachable!("loop region outside a tile"),
                }
            }
            BlockKind::EntryDispatcher | BlockKind::ExitDispatcher =>
                unreachable!("dispatcher not collapsed before emission"),
        };
        if let Some(piece) = piece {
            Chain::append(tree, &mut chain, piece.head, piece.tail);
        }
        cur = cfg.successors(k).first().copied();
    }
    (chain, false)
}

/// A `Code` statement for `source`, unless the block contributes nothing
/// (no instructions and a plain jump).
fn code_piece(tree: &mut AstTree, ctx: &EmitCtx, source: Option<usize>) -> Option<Chain> {
    let source = source?;
    let block = &ctx.function.blocks[source];
    let is_return = matches!(block.terminator, Terminator::Ret | Terminator::RetValue(_));
    if block.instructions.is_empty() && !is_return {
        return None;
    }
    let implicit_return = matches!(block.terminator, Terminator::Ret);
    let node = tree.add(Some(source), AstKind::Code { implicit_return });
    Some(Chain { head: node, tail: node })
}

/// The detached `If` holding a loop's test; referenced by the loop node
/// and by explicit continues, never a child of either.
fn related_condition(tree: &mut AstTree, test: &LoopTest) -> AstId {
    let bb = test.source.unwrap_or_else(|| unreachable!("loop test without a source block"));
    let condition = tree.exprs.atom(bb);
    tree.add(Some(bb), AstKind::If {
        condition,
        condition_negated: test.negated,
        then_branch: None,
        else_branch: None,
    })
}

fn loop_piece(
    tree: &mut AstTree,
    ctx: &EmitCtx,
    sub: &SubRegion,
    shape: &LoopShape,
) -> Chain {
    match shape {
        LoopShape::WhileTrue => {
            let (mut body, looped) = emit_chain(
                tree, ctx, &sub.cfg, &sub.markers, sub.cfg.entry(), None, false, false,
            );
            if looped {
                let node = tree.add(None, AstKind::Continue { computation: None, implicit: true });
                Chain::append(tree, &mut body, node, node);
            }
            let scs = tree.add(None, AstKind::Scs {
                kind: LoopKind::WhileTrue,
                body: body.map(|chain| chain.head),
                related_condition: None,
            });
            Chain { head: scs, tail: scs }
        }
        LoopShape::While(test) => {
            let cond = related_condition(tree, test);
            let mut body = None;
            if ctx.config.while_condition_in_body {
                if let Some(piece) = code_piece(tree, ctx, test.source) {
                    Chain::append(tree, &mut body, piece.head, piece.tail);
                }
            }
            let (chain, looped) = emit_chain(
                tree, ctx, &sub.cfg, &sub.markers, sub.cfg.entry(), Some(cond), false, false,
            );
            if let Some(chain) = chain {
                Chain::append(tree, &mut body, chain.head, chain.tail);
            }
            if looped {
                // The condition block re-executes before every loopback.
                if let Some(piece) = code_piece(tree, ctx, test.source) {
                    Chain::append(tree, &mut body, piece.head, piece.tail);
                }
            }
            let scs = tree.add(None, AstKind::Scs {
                kind: LoopKind::While,
                body: body.map(|chain| chain.head),
                related_condition: Some(cond),
            });
            match code_piece(tree, ctx, test.source) {
                Some(before) => {
                    tree.node_mut(before.tail).successor = Some(scs);
                    Chain { head: before.head, tail: scs }
                }
                None => Chain { head: scs, tail: scs },
            }
        }
        LoopShape::DoWhile(test) => {
            let cond = related_condition(tree, test);
            let (mut body, looped) = emit_chain(
                tree, ctx, &sub.cfg, &sub.markers, sub.cfg.entry(), Some(cond), false, false,
            );
            if looped {
                if let Some(piece) = code_piece(tree, ctx, test.source) {
                    Chain::append(tree, &mut body, piece.head, piece.tail);
                }
            }
            let scs = tree.add(None, AstKind::Scs {
                kind: LoopKind::DoWhile,
                body: body.map(|chain| chain.head),
                related_condition: Some(cond),
            });
            Chain { head: scs, tail: scs }
        }
    }
}

fn cond_piece(
    tree: &mut AstTree,
    ctx: &EmitCtx,
    sub: &SubRegion,
    loop_cond: Option<AstId>,
    in_switch: bool,
) -> Option<Chain> {
    let inner = &sub.cfg;
    let c = inner.entry();
    let heads: Vec<usize> = inner.successors(c).to_vec();
    match inner.node(c).kind {
        BlockKind::EntryDispatcher | BlockKind::ExitDispatcher => {
            let kind = match inner.node(c).kind {
                BlockKind::EntryDispatcher => DispatcherKind::Entry,
                _ => DispatcherKind::Exit,
            };
            let mut cases = Vec::with_capacity(heads.len());
            for (i, &head) in heads.iter().enumerate() {
                let (chain, _) = emit_chain(
                    tree, ctx, inner, &sub.markers, head, loop_cond, true, true,
                );
                let body = match chain {
                    Some(chain) => chain.head,
                    None => tree.add_sequence(),
                };
                cases.push((LabelSet::from([i as u64]), body));
            }
            let switch = tree.add(None, AstKind::Switch {
                cases,
                dispatcher: Some(kind),
                needs_state_variable: true,
                needs_loop_break_dispatcher: kind == DispatcherKind::Exit,
            });
            Some(Chain { head: switch, tail: switch })
        }
        _ => {
            let bb = inner.node(c).source
                .unwrap_or_else(|| unreachable!("conditional without a source block"));
            let condition = tree.exprs.atom(bb);
            let emit_branch = |tree: &mut AstTree, head: usize| {
                emit_chain(tree, ctx, inner, &sub.markers, head, loop_cond, in_switch, true)
                    .0
                    .map(|chain| chain.head)
            };
            let mut then_branch = emit_branch(tree, heads[0]);
            let mut else_branch = heads.get(1)
                .and_then(|&head| emit_branch(tree, head));
            let mut condition_negated = inner.node(c).branch_negated;
            // An if with only an else branch reads better negated.
            if then_branch.is_none() && else_branch.is_some() {
                condition_negated = !condition_negated;
                std::mem::swap(&mut then_branch, &mut else_branch);
            }
            let if_node = tree.add(Some(bb), AstKind::If {
                condition,
                condition_negated,
                then_branch,
                else_branch,
            });
            match code_piece(tree, ctx, Some(bb)) {
                Some(before) => {
                    tree.node_mut(before.tail).successor = Some(if_node);
                    Some(Chain { head: before.head, tail: if_node })
                }
                None => Some(Chain { head: if_node, tail: if_node }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{AstKind, AstTree, LoopKind};
    use crate::cfg::comb::{comb, Config};
    use crate::ir::function::read_function;
    use crate::samples;

    fn comb_default(source: &str) -> AstTree {
        comb(&read_function(source).unwrap(), &Config::default()).unwrap()
    }

    fn sequence_of(tree: &AstTree, id: usize) -> Vec<usize> {
        match &tree.node(id).kind {
            AstKind::Sequence { nodes } => nodes.clone(),
            _ => panic!("expected a sequence at {}", id),
        }
    }

    fn code_bb(tree: &AstTree, id: usize) -> usize {
        match tree.node(id).kind {
            AstKind::Code { .. } => tree.node(id).bb.unwrap(),
            ref kind => panic!("expected code, got {:?}", kind),
        }
    }

    #[test]
    fn test_trivial_sequence() {
        let tree = comb_default(samples::TRIVIAL);
        let root = tree.root().unwrap();
        let nodes = sequence_of(&tree, root);
        assert_eq!(nodes.len(), 2);
        assert_eq!(code_bb(&tree, nodes[0]), 0);
        assert_eq!(code_bb(&tree, nodes[1]), 1);
        // The bare `ret` block may keep its return implicit.
        assert!(matches!(
            tree.node(nodes[1]).kind,
            AstKind::Code { implicit_return: true },
        ));
    }

    #[test]
    fn test_diamond_if() {
        let tree = comb_default(samples::DIAMOND);
        let root = tree.root().unwrap();
        let nodes = sequence_of(&tree, root);
        // Condition block, the if itself, then the merge block.
        assert_eq!(nodes.len(), 3);
        assert_eq!(code_bb(&tree, nodes[0]), 0);
        match tree.node(nodes[1]).kind {
            AstKind::If { condition_negated, then_branch, else_branch, .. } => {
                assert!(!condition_negated);
                assert_eq!(code_bb(&tree, then_branch.unwrap()), 1);
                assert_eq!(code_bb(&tree, else_branch.unwrap()), 2);
            }
            ref kind => panic!("expected if, got {:?}", kind),
        }
        assert_eq!(code_bb(&tree, nodes[2]), 3);
    }

    #[test]
    fn test_negated_diamond() {
        let tree = comb_default(samples::DIAMOND_NEGATED);
        let root = tree.root().unwrap();
        let nodes = sequence_of(&tree, root);
        match tree.node(nodes[1]).kind {
            AstKind::If { condition_negated, .. } => assert!(condition_negated),
            ref kind => panic!("expected if, got {:?}", kind),
        }
    }

    #[test]
    fn test_while_loop_condition_placement() {
        let tree = comb_default(samples::WHILE_LOOP);
        let root = tree.root().unwrap();
        let nodes = sequence_of(&tree, root);
        assert_eq!(nodes.len(), 3);
        // Condition block before the loop.
        assert_eq!(code_bb(&tree, nodes[0]), 0);
        let (body, related) = match tree.node(nodes[1]).kind {
            AstKind::Scs { kind: LoopKind::While, body, related_condition } =>
                (body.unwrap(), related_condition.unwrap()),
            ref kind => panic!("expected while, got {:?}", kind),
        };
        // Related condition references the header block.
        assert_eq!(tree.node(related).bb, Some(0));
        // Body: the loop body block, then the condition block re-emitted at
        // the tail.
        let body = sequence_of(&tree, body);
        assert_eq!(body.iter().map(|&n| code_bb(&tree, n)).collect::<Vec<_>>(), [1, 0]);
        // Exit block follows the loop.
        assert_eq!(code_bb(&tree, nodes[2]), 2);
    }

    #[test]
    fn test_while_condition_in_body_config() {
        let function = read_function(samples::WHILE_LOOP).unwrap();
        let config = Config { while_condition_in_body: true, ..Config::default() };
        let tree = comb(&function, &config).unwrap();
        let root = tree.root().unwrap();
        let nodes = sequence_of(&tree, root);
        let body = match tree.node(nodes[1]).kind {
            AstKind::Scs { body, .. } => body.unwrap(),
            ref kind => panic!("expected loop, got {:?}", kind),
        };
        let body = sequence_of(&tree, body);
        assert_eq!(body.iter().map(|&n| code_bb(&tree, n)).collect::<Vec<_>>(), [0, 1, 0]);
    }

    #[test]
    fn test_do_while_tail_only() {
        let tree = comb_default(samples::DO_WHILE_LOOP);
        let root = tree.root().unwrap();
        let nodes = sequence_of(&tree, root);
        // No condition code before the loop.
        let body = match tree.node(nodes[0]).kind {
            AstKind::Scs { kind: LoopKind::DoWhile, body, related_condition } => {
                assert!(related_condition.is_some());
                body.unwrap()
            }
            ref kind => panic!("expected do-while, got {:?}", kind),
        };
        let body = sequence_of(&tree, body);
        assert_eq!(body.iter().map(|&n| code_bb(&tree, n)).collect::<Vec<_>>(), [0, 1]);
    }

    #[test]
    fn test_endless_loop_keeps_implicit_continue() {
        let tree = comb_default(samples::ENDLESS_LOOP);
        let root = tree.root().unwrap();
        let body = match tree.node(root).kind {
            AstKind::Scs { kind: LoopKind::WhileTrue, body, .. } => body.unwrap(),
            ref kind => panic!("expected endless loop, got {:?}", kind),
        };
        let body = sequence_of(&tree, body);
        assert!(matches!(
            tree.node(*body.last().unwrap()).kind,
            AstKind::Continue { implicit: true, .. },
        ));
    }

    #[test]
    fn test_loop_break_dispatcher() {
        let tree = comb_default(samples::EXIT_DISPATCHER_LOOP);
        let root = tree.root().unwrap();
        let ids = tree.post_order(root);
        // The two exits are routed through an exit dispatcher after the
        // loop; the exiting branches set the state variable and break.
        let switch = ids.iter().find(|&&id| matches!(
            tree.node(id).kind,
            AstKind::Switch { needs_loop_break_dispatcher: true, .. },
        ));
        assert!(switch.is_some());
        assert!(ids.iter().any(|&id| matches!(tree.node(id).kind, AstKind::Break { .. })));
        assert!(ids.iter().any(|&id| matches!(
            tree.node(id).kind,
            AstKind::Set { state_value: 1, .. },
        )));
    }

    #[test]
    fn test_equivalent_inputs_equal_asts() {
        // The same function with renamed registers yields an equal AST.
        let lhs = comb_default(samples::DIAMOND);
        let rhs = comb_default(samples::DIAMOND_RENAMED);
        assert!(lhs.tree_eq(&rhs));
    }

    #[test]
    fn test_all_samples_structure() {
        for sample in samples::ALL_SAMPLES {
            let function = read_function(sample).unwrap();
            let tree = comb(&function, &Config::default()).unwrap();
            assert!(tree.root().is_some());
            // After beautification no reachable node keeps a successor.
            for id in tree.post_order(tree.root().unwrap()) {
                assert_eq!(tree.node(id).successor, None);
            }
        }
    }
}
