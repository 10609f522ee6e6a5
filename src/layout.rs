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

//! Reconstructed data layouts.
//!
//! Layout terms are content-addressed: [`LayoutVector`] interns every term,
//! so structural equality coincides with id equality and sharing across
//! equivalent types costs nothing.

pub mod type_system;
pub mod make;

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};

pub use make::{make_layout_map, make_layouts, Error, ValueLayoutMap};

/// Index of a layout term in its [`LayoutVector`].
pub type LayoutId = usize;

/// A reconstructed layout term.
#[derive(Debug, Clone, Hash, Ord, PartialOrd, Eq, PartialEq)]
pub enum Layout {
    /// A scalar of the given byte size.
    Base {
        /// Size in bytes.
        size: u64,
    },
    /// Unaccessed space of the given byte size.
    Padding {
        /// Size in bytes.
        size: u64,
    },
    /// A (possibly unknown-length) array.
    Array {
        /// Element layout; always exactly `stride` bytes wide.
        element: LayoutId,
        /// Distance between consecutive elements, in bytes.
        stride: u64,
        /// Number of elements; `None` means unknown, sized as one element.
        trip_count: Option<u64>,
    },
    /// Consecutive fields (padding included).
    Struct {
        /// Fields in offset order.
        fields: Vec<LayoutId>,
    },
    /// Overlapping alternatives.
    Union {
        /// The distinct alternatives.
        alternatives: BTreeSet<LayoutId>,
    },
}

/// Content-addressed arena of [`Layout`] terms. The arena outlives every
/// id handed out, including those stored in a
/// [`ValueLayoutMap`](make::ValueLayoutMap).
#[derive(Debug, Default, Clone)]
pub struct LayoutVector {
    layouts: Vec<Layout>,
    interned: HashMap<Layout, LayoutId>,
}

impl LayoutVector {
    /// An empty arena.
    pub fn new() -> Self { Self::default() }

    /// Number of distinct terms.
    pub fn len(&self) -> usize { self.layouts.len() }

    /// Whether the arena holds no terms.
    pub fn is_empty(&self) -> bool { self.layouts.is_empty() }

    /// Intern `layout`, returning the id of the canonical copy.
    pub fn intern(&mut self, layout: Layout) -> LayoutId {
        if let Some(&id) = self.interned.get(&layout) { return id; }
        let id = self.layouts.len();
        self.layouts.push(layout.clone());
        self.interned.insert(layout, id);
        id
    }

    /// The term behind `id`.
    pub fn get(&self, id: LayoutId) -> &Layout { &self.layouts[id] }

    /// A [`Layout::Base`] of `size` bytes.
    pub fn base(&mut self, size: u64) -> LayoutId {
        self.intern(Layout::Base { size })
    }

    /// A [`Layout::Padding`] of `size` bytes.
    pub fn padding(&mut self, size: u64) -> LayoutId {
        self.intern(Layout::Padding { size })
    }

    /// A [`Layout::Array`] of `element` at the given stride.
    pub fn array(&mut self, element: LayoutId, stride: u64, trip_count: Option<u64>) -> LayoutId {
        self.intern(Layout::Array { element, stride, trip_count })
    }

    /// A [`Layout::Struct`] of the given fields.
    pub fn struct_of(&mut self, fields: Vec<LayoutId>) -> LayoutId {
        self.intern(Layout::Struct { fields })
    }

    /// A [`Layout::Union`] of the given alternatives.
    pub fn union_of(&mut self, alternatives: BTreeSet<LayoutId>) -> LayoutId {
        self.intern(Layout::Union { alternatives })
    }

    /// Size in bytes; a pure function of the term.
    pub fn size(&self, id: LayoutId) -> u64 {
        match self.get(id) {
            Layout::Base { size } | Layout::Padding { size } => *size,
            Layout::Array { element, stride, trip_count } => match trip_count {
                Some(n) => stride * n,
                None => self.size(*element),
            },
            Layout::Struct { fields } => fields.iter().map(|&f| self.size(f)).sum(),
            Layout::Union { alternatives } =>
                alternatives.iter().map(|&a| self.size(a)).max().unwrap_or(0),
        }
    }

    /// Render `id` for dumps and error messages.
    pub fn display(&self, id: LayoutId) -> LayoutDisplay<'_> {
        LayoutDisplay { layouts: self, id }
    }
}

/// [`Display`] adapter for a term in an arena.
pub struct LayoutDisplay<'a> {
    layouts: &'a LayoutVector,
    id: LayoutId,
}

impl Display for LayoutDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.layouts.get(self.id) {
            Layout::Base { size } => write!(f, "base{}", size),
            Layout::Padding { size } => write!(f, "pad{}", size),
            Layout::Array { element, stride, trip_count } => {
                write!(f, "array[")?;
                match trip_count {
                    Some(n) => write!(f, "{}", n)?,
                    None => write!(f, "?")?,
                }
                write!(f, " x {}@{}]", self.layouts.display(*element), stride)
            }
            Layout::Struct { fields } => {
                write!(f, "struct{{")?;
                for (k, &field) in fields.iter().enumerate() {
                    if k > 0 { write!(f, ", ")?; }
                    write!(f, "{}", self.layouts.display(field))?;
                }
                write!(f, "}}")
            }
            Layout::Union { alternatives } => {
                write!(f, "union{{")?;
                for (k, &alt) in alternatives.iter().enumerate() {
                    if k > 0 { write!(f, " | ")?; }
                    write!(f, "{}", self.layouts.display(alt))?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use super::LayoutVector;

    #[test]
    fn test_interning_shares() {
        let mut layouts = LayoutVector::new();
        let a = layouts.base(4);
        let b = layouts.base(4);
        assert_eq!(a, b);
        assert_ne!(layouts.base(8), a);
        assert_eq!(layouts.len(), 2);
    }

    #[test]
    fn test_sizes() {
        let mut layouts = LayoutVector::new();
        let base = layouts.base(4);
        let pad = layouts.padding(4);
        let element = layouts.struct_of(vec![base, pad]);
        assert_eq!(layouts.size(element), 8);
        let array = layouts.array(element, 8, Some(3));
        assert_eq!(layouts.size(array), 24);
        let open = layouts.array(element, 8, None);
        assert_eq!(layouts.size(open), 8);
        let union = layouts.union_of(BTreeSet::from([base, array]));
        assert_eq!(layouts.size(union), 24);
    }

    #[test]
    fn test_display() {
        let mut layouts = LayoutVector::new();
        let base = layouts.base(4);
        let pad = layouts.padding(4);
        let element = layouts.struct_of(vec![base, pad]);
        let array = layouts.array(element, 8, Some(3));
        assert_eq!(layouts.display(array).to_string(), "array[3 x struct{base4, pad4}@8]");
    }
}
