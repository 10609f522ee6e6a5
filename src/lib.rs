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

//! Lift compiled code back to structured source.
//!
//! The crate is organised as a pipeline over a small SSA-flavoured [`ir`]:
//! - [`cfg`] rebuilds structured control flow ("combing") and emits an [`ast`];
//! - [`analysis`] hosts the data flow machinery, notably bit liveness;
//! - [`layout`] reconstructs aggregate data layouts from access constraints.

#![warn(missing_docs)]

pub mod ir;
pub mod graph;
pub mod analysis;
pub mod ast;
pub mod cfg;
pub mod layout;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "cli")]
pub use cli::Cli;

#[cfg(test)]
mod samples;

pub use ir::{Function, Instr};
pub use cfg::RegionCfg;
pub use ast::AstTree;
pub use layout::{Layout, LayoutVector};
