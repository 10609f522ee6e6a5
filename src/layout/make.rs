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

//! Materialise layout terms from the constraint graph.
//!
//! Each node is dispatched on its interference classification:
//! non-interfering children line up into a struct (sorted,
//! disjointness-checked, padded), interfering children overlay into a
//! union. Work proceeds in post order so every child layout exists before
//! its parents ask for it, and results are shared per equivalence class.

use std::collections::{BTreeMap, BTreeSet};
use displaydoc::Display as DisplayDoc;
use itertools::Itertools;
use thiserror::Error;

use crate::graph::NodeSet;
use super::type_system::{EdgeTag, InterferingInfo, LayoutTypeSystem, LtsnId, OffsetExpression};
use super::{LayoutId, LayoutVector};

/// Value identity (node id) to its shared layout.
pub type ValueLayoutMap = BTreeMap<LtsnId, LayoutId>;

/// Per-equivalence-class layout slots, indexed by compacted class id.
pub type OrderedLayouts = Vec<Option<LayoutId>>;

/// Materialisation errors. Fatal per type system.
#[derive(Debug, DisplayDoc, Error)]
pub enum Error {
    /// node {0} reached materialisation with an unknown interference class
    UnclassifiedNode(LtsnId),
    /// node {node}: field at offset {offset} overlaps its predecessor
    OverlappingFields {
        /// The struct-classified node.
        node: LtsnId,
        /// Byte offset of the second of the overlapping fields.
        offset: i64,
    },
}

/// A child of a struct node, ordered by `(offset, size, child)`.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
struct OrderedChild {
    offset: i64,
    size: u64,
    child: LtsnId,
}

/// The byte span a child instance covers: trip counts are folded from the
/// innermost dimension out, counting each array as one element short plus
/// one child. A non-positive stride voids the whole span.
fn instance_span(expr: &OffsetExpression, child_size: u64) -> u64 {
    debug_assert_eq!(expr.strides.len(), expr.trip_counts.len());
    let mut size = child_size;
    for (&stride, &trip_count) in expr.strides.iter().zip(&expr.trip_counts).rev() {
        if stride <= 0 {
            return 0;
        }
        debug_assert!(trip_count.map_or(true, |n| n > 0));
        // Unknown-length arrays count as a single element.
        let elems = trip_count.unwrap_or(1) as u64;
        size = (elems - 1) * (stride as u64) + size;
    }
    size
}

/// Shape a child layout for an instance edge of a union member:
/// outermost-first, each dimension pads the element up to its stride and
/// wraps it into an array. An element larger than its stride abandons the
/// edge.
pub fn make_instance_child(
    layouts: &mut LayoutVector,
    child: LayoutId,
    expr: &OffsetExpression,
) -> Option<LayoutId> {
    debug_assert!(expr.offset >= 0);
    debug_assert_eq!(expr.strides.len(), expr.trip_counts.len());
    let mut inner = child;
    for (&stride, &trip_count) in expr.strides.iter().zip(&expr.trip_counts) {
        if stride <= 0 || (stride as u64) < layouts.size(inner) {
            return None;
        }
        let stride = stride as u64;
        let inner_size = layouts.size(inner);
        if stride > inner_size {
            let padding = layouts.padding(stride - inner_size);
            inner = layouts.struct_of(vec![inner, padding]);
        }
        inner = layouts.array(inner, stride, trip_count.map(|n| n as u64));
    }
    if expr.offset > 0 {
        let padding = layouts.padding(expr.offset as u64);
        inner = layouts.struct_of(vec![padding, inner]);
    }
    Some(inner)
}

fn class_layout(
    ts: &LayoutTypeSystem,
    ordered: &OrderedLayouts,
    node: LtsnId,
) -> Option<LayoutId> {
    let class = ts.eq_classes().eq_class_id(node)?;
    ordered[class]
}

fn make_layout(
    ts: &LayoutTypeSystem,
    node: LtsnId,
    layouts: &mut LayoutVector,
    ordered: &OrderedLayouts,
) -> Result<Option<LayoutId>, Error> {
    let n = ts.node(node);
    match n.interfering {
        InterferingInfo::AllChildrenAreNonInterfering => {
            debug_assert!(n.access_sizes.len() <= 1);
            let access_size = n.access_sizes.iter().next().copied().unwrap_or(0);

            let mut inherits = false;
            let mut children: Vec<OrderedChild> = Vec::new();
            for (child, tag) in ts.edges(node) {
                let ordered_child = match tag {
                    EdgeTag::Instance(expr) => {
                        // Negative offsets carry no layout information.
                        if expr.offset < 0 { continue; }
                        OrderedChild {
                            offset: expr.offset,
                            size: instance_span(expr, ts.node(*child).size),
                            child: *child,
                        }
                    }
                    EdgeTag::Inheritance => {
                        debug_assert!(!inherits, "multiple inheritance edges");
                        // Accesses next to inheritance would interfere with
                        // the inherited layout; that input is a union.
                        debug_assert_eq!(access_size, 0);
                        inherits = true;
                        OrderedChild { offset: 0, size: ts.node(*child).size, child: *child }
                    }
                };
                if ordered_child.size > 0 {
                    children.push(ordered_child);
                }
            }
            children.sort();

            for (prev, next) in children.iter().tuple_windows() {
                if prev.offset + prev.size as i64 > next.offset {
                    return Err(Error::OverlappingFields { node, offset: next.offset });
                }
            }

            let mut fields = Vec::new();
            if access_size > 0 {
                fields.push(layouts.base(access_size));
            }
            let mut cursor = access_size;
            for ordered_child in &children {
                let start = ordered_child.offset as u64;
                if start < cursor {
                    return Err(Error::OverlappingFields { node, offset: ordered_child.offset });
                }
                let child = match class_layout(ts, ordered, ordered_child.child) {
                    Some(child) => child,
                    // The child produced no layout; its span stays unnamed.
                    None => continue,
                };
                if start > cursor {
                    fields.push(layouts.padding(start - cursor));
                }
                cursor = start + ordered_child.size;
                fields.push(child);
            }

            Ok(match fields.as_slice() {
                [] => None,
                [only] => Some(*only),
                _ => Some(layouts.struct_of(fields)),
            })
        }

        InterferingInfo::AllChildrenAreInterfering => {
            let mut alternatives = BTreeSet::new();
            for &access_size in &n.access_sizes {
                log::trace!(target: "make-layouts", "access: {}", access_size);
                alternatives.insert(layouts.base(access_size));
            }
            let mut inherits = false;
            for (child, tag) in ts.edges(node) {
                debug_assert!(ts.node(*child).size > 0);
                let child_layout = match class_layout(ts, ordered, *child) {
                    Some(child_layout) => child_layout,
                    None => continue,
                };
                let shaped = match tag {
                    EdgeTag::Instance(expr) =>
                        make_instance_child(layouts, child_layout, expr),
                    EdgeTag::Inheritance => {
                        // Treated as an instance at offset zero, at most one.
                        debug_assert!(!inherits, "multiple inheritance edges");
                        inherits = true;
                        Some(child_layout)
                    }
                };
                if let Some(shaped) = shaped {
                    alternatives.insert(shaped);
                }
            }
            Ok(match alternatives.len() {
                0 => None,
                // A union of one alternative is that alternative.
                1 => alternatives.into_iter().next(),
                _ => Some(layouts.union_of(alternatives)),
            })
        }

        InterferingInfo::Unknown => Err(Error::UnclassifiedNode(node)),
    }
}

/// Materialise layouts for every reachable node, sharing per equivalence
/// class: a node whose class already has a layout reuses it.
pub fn make_layouts(
    ts: &LayoutTypeSystem,
    layouts: &mut LayoutVector,
) -> Result<OrderedLayouts, Error> {
    let mut ordered: OrderedLayouts = vec![None; ts.eq_classes().num_classes()];
    let mut visited = NodeSet::new();
    for root in ts.roots() {
        for node in ts.post_order_ext(root, &mut visited) {
            let class = match ts.eq_classes().eq_class_id(node) {
                Some(class) => class,
                None => continue,
            };
            if ordered[class].is_some() {
                continue;
            }
            match make_layout(ts, node, layouts, &ordered)? {
                Some(layout) => {
                    log::debug!(
                        target: "make-layouts",
                        "node {}: {}", node, layouts.display(layout),
                    );
                    ordered[class] = Some(layout);
                }
                None => log::debug!(target: "make-layouts", "node {}: empty", node),
            }
        }
    }
    Ok(ordered)
}

/// Map every node id to its class's layout; nodes of pruned or empty
/// classes are absent.
pub fn make_layout_map(ts: &LayoutTypeSystem, ordered: &OrderedLayouts) -> ValueLayoutMap {
    let mut map = ValueLayoutMap::new();
    for node in 0..ts.len() {
        if let Some(layout) = class_layout(ts, ordered, node) {
            map.insert(node, layout);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use crate::layout::type_system::{InterferingInfo, LayoutTypeSystem, OffsetExpression};
    use crate::layout::{Layout, LayoutVector};
    use super::{make_instance_child, make_layout_map, make_layouts, Error};

    use InterferingInfo::{AllChildrenAreInterfering, AllChildrenAreNonInterfering, Unknown};

    fn leaf(ts: &mut LayoutTypeSystem, size: u64) -> usize {
        ts.add_node(size, [size], AllChildrenAreNonInterfering)
    }

    #[test]
    fn test_leaf_is_base() {
        let mut ts = LayoutTypeSystem::new();
        let node = leaf(&mut ts, 4);
        let mut layouts = LayoutVector::new();
        let ordered = make_layouts(&ts, &mut layouts).unwrap();
        let id = ordered[ts.eq_classes().eq_class_id(node).unwrap()].unwrap();
        assert_eq!(layouts.get(id), &Layout::Base { size: 4 });
    }

    #[test]
    fn test_struct_with_padding() {
        // Accessed as a 4-byte scalar, with two fields at offsets 8 and 16.
        let mut ts = LayoutTypeSystem::new();
        let field = leaf(&mut ts, 4);
        let node = ts.add_node(20, [4], AllChildrenAreNonInterfering);
        ts.add_instance_edge(node, field, OffsetExpression::fixed(8));
        ts.add_instance_edge(node, field, OffsetExpression::fixed(16));
        let mut layouts = LayoutVector::new();
        let ordered = make_layouts(&ts, &mut layouts).unwrap();
        let id = ordered[ts.eq_classes().eq_class_id(node).unwrap()].unwrap();
        let base = layouts.base(4);
        let pad = layouts.padding(4);
        assert_eq!(
            layouts.get(id),
            &Layout::Struct { fields: vec![base, pad, base, pad, base] },
        );
        assert_eq!(layouts.size(id), 20);
    }

    #[test]
    fn test_struct_overlap_is_fatal() {
        let mut ts = LayoutTypeSystem::new();
        let wide = leaf(&mut ts, 8);
        let node = ts.add_node(12, [], AllChildrenAreNonInterfering);
        ts.add_instance_edge(node, wide, OffsetExpression::fixed(0));
        ts.add_instance_edge(node, wide, OffsetExpression::fixed(4));
        let mut layouts = LayoutVector::new();
        match make_layouts(&ts, &mut layouts) {
            Err(Error::OverlappingFields { offset: 4, .. }) => {}
            other => panic!("expected overlap error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_is_fatal() {
        let mut ts = LayoutTypeSystem::new();
        let node = ts.add_node(4, [4], Unknown);
        let mut layouts = LayoutVector::new();
        match make_layouts(&ts, &mut layouts) {
            Err(Error::UnclassifiedNode(n)) => assert_eq!(n, node),
            other => panic!("expected unclassified error, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_offset_and_bad_stride_dropped() {
        let mut ts = LayoutTypeSystem::new();
        let field = leaf(&mut ts, 4);
        let node = ts.add_node(8, [], AllChildrenAreNonInterfering);
        ts.add_instance_edge(node, field, OffsetExpression::fixed(-8));
        ts.add_instance_edge(node, field, OffsetExpression::array(0, -4, Some(2)));
        ts.add_instance_edge(node, field, OffsetExpression::fixed(4));
        let mut layouts = LayoutVector::new();
        let ordered = make_layouts(&ts, &mut layouts).unwrap();
        let id = ordered[ts.eq_classes().eq_class_id(node).unwrap()].unwrap();
        // Only the well-formed field survives, padded to its offset.
        let base = layouts.base(4);
        let pad = layouts.padding(4);
        assert_eq!(layouts.get(id), &Layout::Struct { fields: vec![pad, base] });
    }

    #[test]
    fn test_stride_padding_array() {
        // Access size 4 under stride 8: each element is padded to the
        // stride before the array is built.
        let mut ts = LayoutTypeSystem::new();
        let element = leaf(&mut ts, 4);
        let node = ts.add_node(24, [], AllChildrenAreInterfering);
        ts.add_instance_edge(node, element, OffsetExpression::array(0, 8, Some(3)));
        let mut layouts = LayoutVector::new();
        let ordered = make_layouts(&ts, &mut layouts).unwrap();
        let id = ordered[ts.eq_classes().eq_class_id(node).unwrap()].unwrap();
        let base = layouts.base(4);
        let pad = layouts.padding(4);
        let padded = layouts.struct_of(vec![base, pad]);
        assert_eq!(
            layouts.get(id),
            &Layout::Array { element: padded, stride: 8, trip_count: Some(3) },
        );
    }

    #[test]
    fn test_union_collapse() {
        // All alternatives structurally equal Base(4): no union is built.
        let mut ts = LayoutTypeSystem::new();
        let a = leaf(&mut ts, 4);
        let b = leaf(&mut ts, 4);
        let node = ts.add_node(4, [4], AllChildrenAreInterfering);
        ts.add_instance_edge(node, a, OffsetExpression::fixed(0));
        ts.add_instance_edge(node, b, OffsetExpression::fixed(0));
        let mut layouts = LayoutVector::new();
        let ordered = make_layouts(&ts, &mut layouts).unwrap();
        let id = ordered[ts.eq_classes().eq_class_id(node).unwrap()].unwrap();
        assert_eq!(layouts.get(id), &Layout::Base { size: 4 });
    }

    #[test]
    fn test_union_of_distinct_alternatives() {
        let mut ts = LayoutTypeSystem::new();
        let narrow = leaf(&mut ts, 4);
        let node = ts.add_node(8, [8], AllChildrenAreInterfering);
        ts.add_instance_edge(node, narrow, OffsetExpression::fixed(0));
        let mut layouts = LayoutVector::new();
        let ordered = make_layouts(&ts, &mut layouts).unwrap();
        let id = ordered[ts.eq_classes().eq_class_id(node).unwrap()].unwrap();
        match layouts.get(id) {
            Layout::Union { alternatives } => assert_eq!(alternatives.len(), 2),
            other => panic!("expected union, got {:?}", other),
        }
    }

    #[test]
    fn test_instance_child_round_trip() {
        // With a single trip count, the shaped instance spans exactly
        // offset + stride * trip_count bytes.
        let mut layouts = LayoutVector::new();
        let child = layouts.base(4);
        let expr = OffsetExpression::array(16, 8, Some(3));
        let shaped = make_instance_child(&mut layouts, child, &expr).unwrap();
        assert_eq!(layouts.size(shaped), 16 + 8 * 3);
    }

    #[test]
    fn test_stride_smaller_than_child_abandons_edge() {
        let mut layouts = LayoutVector::new();
        let child = layouts.base(8);
        let expr = OffsetExpression::array(0, 4, Some(2));
        assert_eq!(make_instance_child(&mut layouts, child, &expr), None);
    }

    #[test]
    fn test_eq_class_sharing() {
        // Two structurally equivalent nodes in one class materialise once.
        let mut ts = LayoutTypeSystem::new();
        let a = leaf(&mut ts, 4);
        let b = leaf(&mut ts, 4);
        ts.unify(a, b);
        let mut layouts = LayoutVector::new();
        let ordered = make_layouts(&ts, &mut layouts).unwrap();
        assert_eq!(ts.eq_classes().num_classes(), 1);
        assert_eq!(ordered.len(), 1);
        let map = make_layout_map(&ts, &ordered);
        assert_eq!(map[&a], map[&b]);
    }

    #[test]
    fn test_pruned_nodes_absent_from_map() {
        let mut ts = LayoutTypeSystem::new();
        let kept = leaf(&mut ts, 4);
        let pruned = leaf(&mut ts, 8);
        ts.prune(pruned);
        let mut layouts = LayoutVector::new();
        let ordered = make_layouts(&ts, &mut layouts).unwrap();
        let map = make_layout_map(&ts, &ordered);
        assert!(map.contains_key(&kept));
        assert!(!map.contains_key(&pruned));
    }
}
