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

//! (Semi-)Lattice for data flow analysis.

/// Semi-lattice with a `⊓` operation.
///
/// # Note
/// This trait does not require a [`PartialOrd`], because the partial order
/// implied by the semi-lattice structure is usually different from the
/// `#[derive(PartialOrd)]` order: the former is based on information content,
/// the latter is whatever best-effort total order the representation admits.
/// The analyses only ever need `⊓`, so the mismatch never surfaces.
pub trait JoinSemiLattice: Clone + Eq {
    /// The `⊥` element for this semi-lattice: `⊥ ⊓ x = x`.
    fn bottom() -> Self;
    /// Update `self` to `self ⊓ other`, returning whether the value changed.
    fn join_assign(&mut self, other: &Self) -> bool;
    /// Join all of `others` into `self`, returning whether the value changed.
    fn join_assign_many<'a>(&mut self, others: impl Iterator<Item = &'a Self>) -> bool
        where Self: 'a {
        let mut changed = false;
        for other in others {
            changed |= self.join_assign(other);
        }
        changed
    }
}
