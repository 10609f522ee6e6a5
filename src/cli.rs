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

//! Command line interface support.

use std::path::PathBuf;
use clap::{ArgEnum, Parser};
use displaydoc::Display as DisplayDoc;
use parse_display::{Display, FromStr};
use thiserror::Error;

use crate::analysis::bit_liveness;
use crate::cfg::{self, comb, Config, RegionCfg};
use crate::ir::{function, TagMap};

/// Entry to the command line interface.
#[derive(Parser)]
#[clap(author, version, about)]
pub struct Cli {
    /// The input source file, one textual function.
    #[clap(parse(from_os_str))]
    input: PathBuf,
    /// Output format.
    #[clap(short, long, arg_enum, default_value_t = Format::Ast)]
    target: Format,
    /// Also emit the `while` condition block at the head of the loop body.
    #[clap(long)]
    while_condition_in_body: bool,
    /// Reject irreducible regions instead of recovering them with
    /// dispatchers.
    #[clap(long)]
    no_dispatchers: bool,
}

/// Supported target formats.
#[derive(Debug, Display, FromStr, ArgEnum, Copy, Clone, Eq, PartialEq)]
#[display(style = "snake_case")]
pub enum Format {
    /// Print the input file unchanged (disregarding whitespace).
    Raw,
    /// Dump the region control flow graph in dot syntax.
    Cfg,
    /// Structure the function and dump the AST in dot syntax.
    Ast,
    /// Print the live bit prefix of every register.
    Liveness,
}

/// All kinds of errors that might happen during command line execution.
#[derive(Debug, DisplayDoc, Error)]
pub enum Error {
    /// "errors" from [`clap`], including requests such as `--version` or `--help`.
    #[displaydoc("{0}")]
    InvalidArguments(#[from] clap::Error),
    /// parse error: {0}
    InvalidInput(#[from] function::ParseError),
    /// cannot structure the control flow: {0}
    CannotStructure(#[from] cfg::Error),
    /// failed to read file: {0}
    Io(#[from] std::io::Error),
}

/// Result type for the command line interface.
pub type Result = std::result::Result<(), Error>;

impl Cli {
    /// Run the command line interface.
    pub fn run() -> Result {
        env_logger::Builder::from_default_env()
            .target(env_logger::Target::Stderr)
            .init();
        let options: Cli = Cli::try_parse()?;
        let contents = std::fs::read_to_string(&options.input)?;
        let function = function::read_function(&contents)?;
        let config = Config {
            allow_dispatchers: !options.no_dispatchers,
            while_condition_in_body: options.while_condition_in_body,
        };
        match options.target {
            Format::Raw => {
                print!("{}", function);
            }
            Format::Cfg => {
                print!("{}", RegionCfg::from_function(&function).dot());
            }
            Format::Ast => {
                let tree = comb(&function, &config)?;
                print!("{}", tree.dot());
            }
            Format::Liveness => {
                let live = bit_liveness::bit_liveness(&function, &TagMap::default());
                for (reg, bits) in live {
                    println!("%{}: {}", reg, bits);
                }
            }
        }
        Ok(())
    }
}
