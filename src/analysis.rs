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

//! Data flow analyses over the instruction graph.

pub mod lattice;
pub mod data_flow;
pub mod bit_liveness;

pub use lattice::JoinSemiLattice;
pub use data_flow::{run_backward, BackwardTransfer, DataFlowGraph, DfNode};
pub use bit_liveness::{bit_liveness, BitLiveness, LiveBits, TOP};
