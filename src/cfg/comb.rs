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

//! The combing engine: structural recovery with controlled duplication.
//!
//! Per region the phases run in a fixed order:
//! 1. loop collapse: every natural loop becomes a [`BlockKind::Tile`]
//!    (irreducible cycles are first tamed with an entry dispatcher, or
//!    rejected);
//! 2. inflation: nodes reachable along structurally incomparable paths are
//!    duplicated until every branch region has a single entry;
//! 3. weaving: each conditional together with its branch regions (a
//!    single-entry/single-exit region by the post-dominator test) collapses
//!    into a [`BlockKind::Collapsed`] node, innermost first.
//!
//! What remains is a linear chain that [`emit`](super::emit) turns into an
//! AST.

use std::collections::BTreeMap;
use smallvec::SmallVec;

use crate::ast::AstTree;
use crate::graph::NodeSet;
use crate::ir::Function;
use super::{
    BbNode, BlockKind, Error, LoopShape, LoopTest, Markers, RegionCfg, RegionPayload, SubRegion,
};

/// Knobs for the structuring engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Config {
    /// Recover multi-entry cycles with entry dispatchers instead of
    /// reporting them as irreducible.
    pub allow_dispatchers: bool,
    /// Also emit the `while` condition block at the head of the loop body,
    /// in addition to the mandatory copy at the body tail.
    pub while_condition_in_body: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config { allow_dispatchers: true, while_condition_in_body: false }
    }
}

/// Structure `function` into an AST.
pub fn comb(function: &Function, config: &Config) -> Result<AstTree, Error> {
    let mut cfg = RegionCfg::from_function(function);
    let mut markers = Markers::default();
    restructure(&mut cfg, &mut markers, config)?;
    Ok(super::emit::emit(&cfg, &markers, function, config))
}

/// Run all structuring phases over one region, recursing into collapsed
/// sub-regions.
pub(crate) fn restructure(
    cfg: &mut RegionCfg,
    markers: &mut Markers,
    config: &Config,
) -> Result<(), Error> {
    collapse_loops(cfg, markers, config)?;
    inflate(cfg, markers);
    cfg.check_dispatchers(markers)?;
    weave(cfg, markers);
    Ok(())
}

fn canonicalise_with(cfg: &mut RegionCfg, markers: &mut Markers) {
    let remap = cfg.canonicalise();
    for slot in [&mut markers.exit, &mut markers.cont, &mut markers.brk] {
        *slot = slot.and_then(|m| remap.get(&m).copied());
    }
}

/// Role a redirected edge target plays inside an extracted sub-region.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum MarkerRole {
    Exit,
    Cont,
    Brk,
}

/// Move `members` out of `cfg` into a fresh sub-region entered at `entry`.
/// Edges to a key of `redirect` point at a synthetic marker of that role;
/// edges to any other outside node must not exist.
fn extract(
    cfg: &RegionCfg,
    members: &NodeSet,
    entry: usize,
    redirect: &BTreeMap<usize, MarkerRole>,
) -> SubRegion {
    let mut inner = RegionCfg::new();
    let mut markers = Markers::default();
    let mut remap = BTreeMap::new();
    for &k in members {
        remap.insert(k, inner.add_node(cfg.node(k).clone()));
    }
    let mut marker_of = |inner: &mut RegionCfg, role: MarkerRole| {
        let slot = match role {
            MarkerRole::Exit => &mut markers.exit,
            MarkerRole::Cont => &mut markers.cont,
            MarkerRole::Brk => &mut markers.brk,
        };
        match *slot {
            Some(m) => m,
            None => {
                let m = inner.add_node(BbNode::new(BlockKind::Empty, None));
                *slot = Some(m);
                m
            }
        }
    };
    for &k in members {
        for &target in cfg.successors(k) {
            // Redirected targets win over membership: the loop header is a
            // member, but edges to it from inside are loopbacks.
            let to = match redirect.get(&target) {
                Some(&role) => marker_of(&mut inner, role),
                None => *remap.get(&target)
                    .unwrap_or_else(|| unreachable!("edge escapes the extracted region")),
            };
            inner.add_edge(remap[&k], to);
        }
    }
    inner.set_entry(remap[&entry]);
    SubRegion { cfg: inner, markers }
}

/// Natural loop of `header` for the given latches: the header plus every
/// node that reaches a latch without passing through the header.
fn natural_loop(cfg: &RegionCfg, header: usize, latches: &[usize]) -> NodeSet {
    let preds = cfg.predecessors();
    let mut body = NodeSet::from([header]);
    let mut stack: Vec<usize> = latches.to_vec();
    while let Some(n) = stack.pop() {
        if body.insert(n) {
            stack.extend(preds[n].iter().copied());
        }
    }
    body
}

fn collapse_loops(
    cfg: &mut RegionCfg,
    markers: &mut Markers,
    config: &Config,
) -> Result<(), Error> {
    loop {
        canonicalise_with(cfg, markers);
        let doms = cfg.dominators();
        let mut back_edges: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (u, _) in cfg.graph().iter() {
            for &h in cfg.successors(u) {
                if doms.dominates(h, u) {
                    back_edges.entry(h).or_default().push(u);
                }
            }
        }
        if back_edges.is_empty() {
            match find_irreducible_cycle(cfg) {
                None => return Ok(()),
                Some(entries) => {
                    let region_entry = entries[0];
                    if !config.allow_dispatchers {
                        return Err(Error::IrreducibleRegion(region_entry));
                    }
                    log::debug!(target: "comb", "dispatching {}-entry cycle at {}", entries.len(), region_entry);
                    insert_entry_dispatcher(cfg, &entries);
                    continue;
                }
            }
        }
        // Collapse the loop with the smallest body first; nested loops are
        // handled by the recursion on the extracted body either way.
        let (&header, latches) = back_edges.iter()
            .min_by_key(|(&h, latches)| natural_loop(cfg, h, latches).len())
            .unwrap_or_else(|| unreachable!());
        let latches = latches.clone();
        collapse_one_loop(cfg, markers, config, header, &latches)?;
    }
}

fn collapse_one_loop(
    cfg: &mut RegionCfg,
    markers: &mut Markers,
    config: &Config,
    header: usize,
    latches: &[usize],
) -> Result<(), Error> {
    let mut body = natural_loop(cfg, header, latches);
    log::debug!(target: "comb", "collapsing loop at {} ({} nodes)", header, body.len());

    // Exit edges, in first-occurrence order of their targets.
    let mut exit_targets: Vec<usize> = Vec::new();
    for &n in body.iter() {
        for &target in cfg.successors(n) {
            if !body.contains(&target) && !exit_targets.contains(&target) {
                exit_targets.push(target);
            }
        }
    }

    // More than one exit target needs an exit dispatcher: every exiting
    // edge detours through an ExitSet, and the loop then exits to the
    // dispatcher alone.
    let single_exit = match exit_targets.as_slice() {
        [] => None,
        [only] => Some(*only),
        targets => {
            let targets = targets.to_vec();
            let dispatcher = cfg.add_node(BbNode::new(BlockKind::ExitDispatcher, None));
            for &target in &targets {
                cfg.add_edge(dispatcher, target);
            }
            for &n in body.clone().iter() {
                for position in 0..cfg.successors(n).len() {
                    let target = cfg.successors(n)[position];
                    if body.contains(&target) || target == dispatcher { continue; }
                    let value = targets.iter().position(|&t| t == target)
                        .unwrap_or_else(|| unreachable!()) as u64;
                    let set = cfg.add_node(BbNode {
                        kind: BlockKind::ExitSet,
                        source: None,
                        state_value: Some(value),
                        branch_negated: false,
                        region: None,
                    });
                    cfg.add_edge(set, dispatcher);
                    let mut succs = SmallVec::from_slice(cfg.successors(n));
                    succs[position] = set;
                    cfg.set_successors(n, succs);
                    body.insert(set);
                }
            }
            Some(dispatcher)
        }
    };

    let mut redirect = BTreeMap::from([(header, MarkerRole::Cont)]);
    if let Some(exit) = single_exit {
        redirect.insert(exit, MarkerRole::Brk);
    }
    let mut sub = extract(cfg, &body, header, &redirect);
    let shape = classify_loop(&mut sub);
    restructure(&mut sub.cfg, &mut sub.markers, config)?;

    // Replace the body with a single tile.
    let tile = cfg.add_node(BbNode {
        kind: BlockKind::Tile,
        source: None,
        state_value: None,
        branch_negated: false,
        region: Some(Box::new(RegionPayload::Loop(sub, shape))),
    });
    let preds = cfg.predecessors();
    for &p in &preds[header] {
        if !body.contains(&p) {
            cfg.redirect_edge(p, header, tile);
        }
    }
    if let Some(exit) = single_exit {
        cfg.add_edge(tile, exit);
    }
    if cfg.entry() == header {
        cfg.set_entry(tile);
    }
    Ok(())
}

/// Recover the loop flavour, removing the test conditional from the body
/// when there is one.
fn classify_loop(sub: &mut SubRegion) -> LoopShape {
    let cfg = &mut sub.cfg;
    let markers = sub.markers;
    let entry = cfg.entry();

    let is_plain_conditional = |cfg: &RegionCfg, n: usize| {
        matches!(cfg.node(n).kind, BlockKind::Code | BlockKind::Weaved)
            && cfg.successors(n).len() == 2
    };

    // `while`: the header is a conditional with one edge straight out.
    if let Some(brk) = markers.brk {
        if is_plain_conditional(cfg, entry) && cfg.successors(entry).contains(&brk) {
            let succs: Vec<usize> = cfg.successors(entry).to_vec();
            let continues_on_true = succs[0] != brk;
            let test = LoopTest {
                source: cfg.node(entry).source,
                negated: cfg.node(entry).branch_negated ^ !continues_on_true,
            };
            let body_entry = if continues_on_true { succs[0] } else { succs[1] };
            cfg.set_successors(entry, SmallVec::new());
            cfg.set_entry(body_entry);
            return LoopShape::While(test);
        }
    }

    // `do-while`: a single latch conditional choosing between loopback and
    // exit.
    if let (Some(cont), Some(brk)) = (markers.cont, markers.brk) {
        let preds = cfg.predecessors();
        if let [latch] = preds[cont].as_slice() {
            let latch = *latch;
            let succs: Vec<usize> = cfg.successors(latch).to_vec();
            if is_plain_conditional(cfg, latch) && succs.contains(&cont) && succs.contains(&brk) {
                let continues_on_true = succs[0] == cont;
                let test = LoopTest {
                    source: cfg.node(latch).source,
                    negated: cfg.node(latch).branch_negated ^ !continues_on_true,
                };
                for p in cfg.predecessors()[latch].to_vec() {
                    cfg.redirect_edge(p, latch, cont);
                }
                cfg.set_successors(latch, SmallVec::new());
                if cfg.entry() == latch {
                    cfg.set_entry(cont);
                }
                return LoopShape::DoWhile(test);
            }
        }
    }

    LoopShape::WhileTrue
}

/// Find a cycle that survived loop collapse and return its entry nodes.
/// By construction such a cycle has no dominating header, hence at least
/// two entries.
fn find_irreducible_cycle(cfg: &RegionCfg) -> Option<Vec<usize>> {
    let in_cycle = (0..cfg.len()).find(|&n| {
        // n is on a cycle iff n reaches itself through a successor.
        cfg.successors(n).iter()
            .any(|&s| cfg.graph().collect_reachable(s).contains(&n))
    })?;
    let forward = cfg.graph().collect_reachable(in_cycle);
    let preds = cfg.predecessors();
    let mut backward = NodeSet::new();
    let mut stack = vec![in_cycle];
    while let Some(n) = stack.pop() {
        if backward.insert(n) {
            stack.extend(preds[n].iter().copied());
        }
    }
    let scc: NodeSet = forward.intersection(&backward).copied().collect();
    let entries: Vec<usize> = scc.iter().copied()
        .filter(|&n| preds[n].iter().any(|p| !scc.contains(p)))
        .collect();
    debug_assert!(entries.len() >= 2, "single-entry cycle should be a natural loop");
    Some(entries)
}

/// Tame a multi-entry cycle: a fresh entry dispatcher selects among the
/// entries, and every edge into an entry detours through an EntrySet
/// assigning the entry's index.
fn insert_entry_dispatcher(cfg: &mut RegionCfg, entries: &[usize]) {
    let preds = cfg.predecessors();
    let dispatcher = cfg.add_node(BbNode::new(BlockKind::EntryDispatcher, None));
    for &e in entries {
        cfg.add_edge(dispatcher, e);
    }
    for (i, &e) in entries.iter().enumerate() {
        for &p in &preds[e] {
            let set = cfg.add_node(BbNode {
                kind: BlockKind::EntrySet,
                source: None,
                state_value: Some(i as u64),
                branch_negated: false,
                region: None,
            });
            cfg.add_edge(set, dispatcher);
            cfg.redirect_edge(p, e, set);
        }
    }
}

/// Nodes reachable from `head` without passing through `stop`, markers
/// excluded.
fn branch_region(
    cfg: &RegionCfg,
    head: usize,
    stop: Option<usize>,
    markers: &Markers,
) -> NodeSet {
    let mut region = NodeSet::new();
    if Some(head) == stop || markers.is_marker(head) {
        return region;
    }
    let mut stack = vec![head];
    while let Some(n) = stack.pop() {
        if Some(n) == stop || markers.is_marker(n) { continue; }
        if region.insert(n) {
            stack.extend(cfg.successors(n).iter().copied());
        }
    }
    region
}

/// Duplicate nodes reachable along structurally incomparable paths until
/// the branch regions of every conditional are disjoint. Termination:
/// every duplication strictly shrinks one overlap, and duplicates never
/// overlap regions they were not created for.
fn inflate(cfg: &mut RegionCfg, markers: &mut Markers) {
    loop {
        canonicalise_with(cfg, markers);
        let pdoms = cfg.post_dominators();
        let ipdoms = pdoms.immediate();
        let preds = cfg.predecessors();
        let mut offending = None;
        'search: for (c, _) in cfg.graph().iter() {
            if cfg.successors(c).len() < 2 { continue; }
            let stop = ipdoms[c];
            let heads: Vec<usize> = cfg.successors(c).to_vec();
            let regions: Vec<NodeSet> = heads.iter()
                .map(|&s| branch_region(cfg, s, stop, markers))
                .collect();
            for i in 0..regions.len() {
                for j in (i + 1)..regions.len() {
                    let overlap: NodeSet =
                        regions[i].intersection(&regions[j]).copied().collect();
                    if overlap.is_empty() { continue; }
                    // Duplicate the overlap node closest to the
                    // conditional: one with no predecessor in the overlap.
                    let &v = overlap.iter()
                        .find(|&&v| !preds[v].iter().any(|p| overlap.contains(p)))
                        .unwrap_or_else(|| unreachable!("cyclic overlap in acyclic region"));
                    offending = Some((c, j, v, regions[j].clone()));
                    break 'search;
                }
            }
        }
        let (c, branch, v, region) = match offending {
            Some(found) => found,
            None => return,
        };
        duplicate(cfg, c, branch, v, &region);
    }
}

/// Clone `v` for the `branch`-th successor region of `c`, preserving
/// successor order, and re-wire exactly the incoming edges from that
/// region (and the branch edge itself) to the clone.
fn duplicate(cfg: &mut RegionCfg, c: usize, branch: usize, v: usize, region: &NodeSet) {
    let mut clone = cfg.node(v).clone();
    if clone.kind == BlockKind::Code {
        clone.kind = BlockKind::Weaved;
    }
    let succs = SmallVec::from_slice(cfg.successors(v));
    let dup = cfg.add_node(clone);
    cfg.set_successors(dup, succs);
    log::trace!(target: "comb", "inflated {} into {} for branch {} of {}", v, dup, branch, c);

    if cfg.successors(c)[branch] == v {
        let mut succs = SmallVec::from_slice(cfg.successors(c));
        succs[branch] = dup;
        cfg.set_successors(c, succs);
    }
    for p in region.iter().copied().filter(|&p| p != v) {
        cfg.redirect_edge(p, v, dup);
    }
}

/// Weave: innermost first, fold every conditional and its branch regions
/// (single entry by inflation, single exit by the post-dominator test)
/// into a collapsed node.
fn weave(cfg: &mut RegionCfg, markers: &mut Markers) {
    loop {
        canonicalise_with(cfg, markers);
        let doms = cfg.dominators();
        let ipdoms = cfg.post_dominators().immediate();
        // The conditional dominating the fewest nodes has no conditional
        // inside its region: regions collapse bottom-up.
        let conditional = cfg.graph().iter()
            .filter(|&(c, _)| cfg.successors(c).len() >= 2 && !markers.is_marker(c))
            .map(|(c, _)| c)
            .min_by_key(|&c| doms.dominated_by(c).len());
        let c = match conditional {
            Some(c) => c,
            None => return,
        };
        let stop = ipdoms[c];
        let mut members = NodeSet::from([c]);
        for &head in cfg.successors(c) {
            members.extend(branch_region(cfg, head, stop, markers));
        }
        log::debug!(target: "comb", "weaving region at {} ({} nodes)", c, members.len());

        let mut redirect = BTreeMap::new();
        if let Some(stop) = stop {
            redirect.insert(stop, MarkerRole::Exit);
        }
        if let Some(exit) = markers.exit { redirect.insert(exit, MarkerRole::Exit); }
        if let Some(cont) = markers.cont { redirect.insert(cont, MarkerRole::Cont); }
        if let Some(brk) = markers.brk { redirect.insert(brk, MarkerRole::Brk); }
        let sub = extract(cfg, &members, c, &redirect);

        let collapsed = cfg.add_node(BbNode {
            kind: BlockKind::Collapsed,
            source: cfg.node(c).source,
            state_value: None,
            branch_negated: false,
            region: Some(Box::new(RegionPayload::Cond(sub))),
        });
        let preds = cfg.predecessors();
        for &p in &preds[c] {
            if !members.contains(&p) {
                cfg.redirect_edge(p, c, collapsed);
            }
        }
        if let Some(stop) = stop {
            cfg.add_edge(collapsed, stop);
        }
        if cfg.entry() == c {
            cfg.set_entry(collapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::AstKind;
    use crate::cfg::{BlockKind, Error, Markers, RegionCfg, RegionPayload};
    use crate::ir::function::read_function;
    use crate::samples;
    use super::{comb, restructure, Config};

    fn restructured(source: &str) -> RegionCfg {
        let function = read_function(source).unwrap();
        let mut cfg = RegionCfg::from_function(&function);
        let mut markers = Markers::default();
        restructure(&mut cfg, &mut markers, &Config::default()).unwrap();
        cfg
    }

    fn chain_kinds(cfg: &RegionCfg) -> Vec<BlockKind> {
        let mut kinds = Vec::new();
        let mut cur = Some(cfg.entry());
        while let Some(k) = cur {
            kinds.push(cfg.node(k).kind);
            assert!(cfg.successors(k).len() <= 1, "node {} is not on a chain", k);
            cur = cfg.successors(k).first().copied();
        }
        kinds
    }

    #[test]
    fn test_trivial_chain() {
        let cfg = restructured(samples::TRIVIAL);
        assert_eq!(chain_kinds(&cfg), [BlockKind::Code, BlockKind::Code]);
    }

    #[test]
    fn test_diamond_collapses() {
        let cfg = restructured(samples::DIAMOND);
        assert_eq!(chain_kinds(&cfg), [BlockKind::Collapsed, BlockKind::Code]);
    }

    #[test]
    fn test_while_becomes_tile() {
        let cfg = restructured(samples::WHILE_LOOP);
        assert_eq!(chain_kinds(&cfg), [BlockKind::Tile, BlockKind::Code]);
        let payload = cfg.node(cfg.entry()).region.as_deref().unwrap();
        assert!(matches!(payload, RegionPayload::Loop(_, crate::cfg::LoopShape::While(_))));
    }

    #[test]
    fn test_do_while_shape() {
        let cfg = restructured(samples::DO_WHILE_LOOP);
        let payload = cfg.node(cfg.entry()).region.as_deref().unwrap();
        assert!(matches!(payload, RegionPayload::Loop(_, crate::cfg::LoopShape::DoWhile(_))));
    }

    #[test]
    fn test_endless_loop_shape() {
        let cfg = restructured(samples::ENDLESS_LOOP);
        let payload = cfg.node(cfg.entry()).region.as_deref().unwrap();
        assert!(matches!(payload, RegionPayload::Loop(_, crate::cfg::LoopShape::WhileTrue)));
    }

    #[test]
    fn test_acyclic_inflation_is_bounded() {
        // The ladder shares one block between both branches: inflation
        // duplicates it exactly once.
        let function = read_function(samples::LADDER).unwrap();
        let tree = comb(&function, &Config::default()).unwrap();
        let root = tree.root().unwrap();
        let copies = tree.post_order(root).into_iter()
            .filter(|&id| {
                matches!(tree.node(id).kind, AstKind::Code { .. }) && tree.node(id).bb == Some(3)
            })
            .count();
        assert_eq!(copies, 2);
    }

    #[test]
    fn test_diamond_needs_no_inflation() {
        let function = read_function(samples::DIAMOND).unwrap();
        let tree = comb(&function, &Config::default()).unwrap();
        let root = tree.root().unwrap();
        for bb in 0..4 {
            let copies = tree.post_order(root).into_iter()
                .filter(|&id| {
                    matches!(tree.node(id).kind, AstKind::Code { .. })
                        && tree.node(id).bb == Some(bb)
                })
                .count();
            assert!(copies <= 1, "block {} was duplicated", bb);
        }
    }

    #[test]
    fn test_irreducible_rejected_without_dispatchers() {
        let function = read_function(samples::IRREDUCIBLE).unwrap();
        let config = Config { allow_dispatchers: false, ..Config::default() };
        match comb(&function, &config) {
            Err(Error::IrreducibleRegion(entry)) => assert_eq!(entry, 1),
            other => panic!("expected irreducible error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_irreducible_recovered_with_dispatchers() {
        let function = read_function(samples::IRREDUCIBLE).unwrap();
        let tree = comb(&function, &Config::default()).unwrap();
        let root = tree.root().unwrap();
        // The recovered AST must contain dispatcher sets and a loop.
        let ids = tree.post_order(root);
        assert!(ids.iter().any(|&id| matches!(tree.node(id).kind, AstKind::Set { .. })));
        assert!(ids.iter().any(|&id| matches!(tree.node(id).kind, AstKind::Scs { .. })));
    }
}
