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

//! The input intermediate representation.
//!
//! The lifter proper treats its input as opaque: the passes in [`cfg`],
//! [`analysis`] and [`layout`] only ever ask for blocks, terminators,
//! operand types and function tags. The concrete carrier defined here
//! exists so that the pipeline can be driven from text in tests and from
//! the command line.
//!
//! [`cfg`]: crate::cfg
//! [`analysis`]: crate::analysis
//! [`layout`]: crate::layout

pub mod instr;
pub mod function;
pub mod model;

pub use instr::{BinOp, BranchKind, Instr, Operand, Terminator, Ty};
pub use function::{Block, Function, ParseError};
pub use model::{Architecture, FunctionTag, QualifiedType, TagMap};
