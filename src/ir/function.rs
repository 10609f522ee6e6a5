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

//! Basic blocks and functions, plus a line-oriented reader for both.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use displaydoc::Display as DisplayDoc;
use parse_display::{Display as ParseDisplay, FromStr};
use smallvec::SmallVec;
use thiserror::Error;

use super::instr::{Instr, Operand, Terminator, Ty};

/// Basic block: straight-line instructions closed by a [`Terminator`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Block {
    /// All the instructions in this basic block, in execution order.
    pub instructions: Vec<Instr>,
    /// The closing control transfer.
    pub terminator: Terminator,
}

impl Block {
    /// Successor blocks, in semantic order.
    pub fn successors(&self) -> SmallVec<[usize; 2]> {
        self.terminator.successors()
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for instr in &self.instructions {
            writeln!(f, "  {}", instr)?;
        }
        writeln!(f, "  {}", self.terminator)
    }
}

/// A function: a series of [`Block`]s indexed `0..blocks.len()`, with a
/// distinguished entry block.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Function {
    /// All basic blocks in this function.
    pub blocks: Vec<Block>,
    /// Index of the entry block.
    pub entry: usize,
}

impl Function {
    /// Type of the value held by `operand`, given the width `context` of the
    /// instruction consuming it (literals are typed by their consumer).
    pub fn operand_ty(&self, operand: Operand, context: u32) -> Ty {
        match operand {
            Operand::Const(_) => Ty::Int(context),
            Operand::Reg(r) => self.def_ty(r).unwrap_or(Ty::Opaque),
        }
    }

    /// Type of the register `reg`, if it is defined anywhere in the function.
    pub fn def_ty(&self, reg: usize) -> Option<Ty> {
        self.blocks.iter()
            .flat_map(|block| block.instructions.iter())
            .find(|instr| instr.result() == Some(reg))
            .and_then(Instr::result_ty)
    }

    /// Total number of instructions across all blocks (terminators excluded).
    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|block| block.instructions.len()).sum()
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "function entry [{}]", self.entry)?;
        for (k, block) in self.blocks.iter().enumerate() {
            writeln!(f, "block {}:", k)?;
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}

#[derive(ParseDisplay, FromStr)]
#[display("function entry [{entry}]")]
struct FunctionHeader {
    entry: usize,
}

#[derive(ParseDisplay, FromStr)]
#[display("block {index}:")]
struct BlockHeader {
    index: usize,
}

/// Validation and parse errors for textual [`Function`]s.
#[derive(Debug, DisplayDoc, Error)]
pub enum ParseError {
    /// line {line}: expected an instruction or a terminator, got `{text}`
    InvalidLine {
        /// 1-based line number in the input text.
        line: usize,
        /// The offending text.
        text: String,
    },
    /// line {line}: `{text}` appears outside of any block
    StrayInstruction {
        /// 1-based line number in the input text.
        line: usize,
        /// The offending text.
        text: String,
    },
    /// missing `function entry [k]` header
    MissingHeader,
    /// block {0} is declared out of order
    BlockOutOfOrder(usize),
    /// block {0} has no terminator
    MissingTerminator(usize),
    /// register %{0} is defined more than once
    RedefinedRegister(usize),
    /// register %{reg} is read in block {block} but never defined
    UndefinedRegister {
        /// The undefined register.
        reg: usize,
        /// Block reading it.
        block: usize,
    },
    /// block {block} branches to nonexistent block {target}
    UnknownBlock {
        /// The branching block.
        block: usize,
        /// The missing branch target.
        target: usize,
    },
    /// entry block {0} does not exist
    BadEntry(usize),
}

/// Read a [`Function`] from its textual form.
///
/// The format is the mirror image of the [`Display`] output: a
/// `function entry [k]` header, then `block k:` headers each followed by the
/// block's instructions and exactly one terminator.
pub fn read_function(text: &str) -> Result<Function, ParseError> {
    let mut lines = text.lines()
        .map(str::trim)
        .zip(1..)
        .filter(|(line, _)| !line.is_empty() && !line.starts_with('#'));

    let entry = match lines.next() {
        Some((line, _)) => line.parse::<FunctionHeader>()
            .map_err(|_| ParseError::MissingHeader)?.entry,
        None => return Err(ParseError::MissingHeader),
    };

    let mut blocks: Vec<(Vec<Instr>, Option<Terminator>)> = Vec::new();
    for (line, k) in lines {
        if let Ok(header) = line.parse::<BlockHeader>() {
            if header.index != blocks.len() {
                return Err(ParseError::BlockOutOfOrder(header.index));
            }
            blocks.push((Vec::new(), None));
        } else {
            let current = match blocks.last_mut() {
                Some(block) => block,
                None => return Err(ParseError::StrayInstruction { line: k, text: line.to_string() }),
            };
            if current.1.is_some() {
                return Err(ParseError::StrayInstruction { line: k, text: line.to_string() });
            }
            if let Ok(terminator) = line.parse::<Terminator>() {
                current.1 = Some(terminator);
            } else if let Ok(instr) = line.parse::<Instr>() {
                current.0.push(instr);
            } else {
                return Err(ParseError::InvalidLine { line: k, text: line.to_string() });
            }
        }
    }

    let blocks = blocks.into_iter()
        .zip(0..)
        .map(|((instructions, terminator), k)| match terminator {
            Some(terminator) => Ok(Block { instructions, terminator }),
            None => Err(ParseError::MissingTerminator(k)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let function = Function { blocks, entry };
    validate(&function)?;
    Ok(function)
}

fn validate(function: &Function) -> Result<(), ParseError> {
    if function.entry >= function.blocks.len() {
        return Err(ParseError::BadEntry(function.entry));
    }
    let mut defs = BTreeSet::new();
    for block in &function.blocks {
        for reg in block.instructions.iter().filter_map(Instr::result) {
            if !defs.insert(reg) {
                return Err(ParseError::RedefinedRegister(reg));
            }
        }
    }
    for (k, block) in function.blocks.iter().enumerate() {
        let reads = block.instructions.iter()
            .flat_map(Instr::operands)
            .chain(block.terminator.operands());
        for operand in reads {
            if let Operand::Reg(reg) = operand {
                if !defs.contains(&reg) {
                    return Err(ParseError::UndefinedRegister { reg, block: k });
                }
            }
        }
        for target in block.successors() {
            if target >= function.blocks.len() {
                return Err(ParseError::UnknownBlock { block: k, target });
            }
        }
    }
    Ok(())
}
