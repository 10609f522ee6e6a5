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

//! Instructions for the SSA-flavoured input code.
//!
//! Every value-producing instruction names its result register explicitly
//! (`%k = ...`), and registers are numbered per function. Branching lives in
//! [`Terminator`]s only, so a block body is always straight-line code.

use parse_display::{Display, FromStr};
use smallvec::{SmallVec, smallvec};

/// Value types, as far as the analyses care: integers of a known width,
/// pointers, and everything else.
#[derive(Debug, Display, FromStr, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum Ty {
    #[display("i{0}")]
    Int(u32),
    #[display("ptr")]
    Ptr,
    #[display("void")]
    Void,
    #[display("opaque")]
    Opaque,
}

impl Ty {
    /// Bit width for integer types, [`None`] otherwise.
    pub fn integer_bit_width(self) -> Option<u32> {
        match self {
            Ty::Int(w) => Some(w),
            _ => None,
        }
    }
}

/// Integer binary operators.
#[derive(Debug, Display, FromStr, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
#[display(style = "lowercase")]
#[allow(missing_docs)]
pub enum BinOp {
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mul,
    Shl,
    LShr,
    AShr,
}

/// Operands to [`Instr`]uctions and [`Terminator`]s.
#[derive(Debug, Display, FromStr, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub enum Operand {
    /// Virtual register, defined by exactly one instruction in the function.
    #[display("%{0}")]
    Reg(usize),
    /// Integer literal, typed by the consuming instruction.
    #[display("{0}")]
    Const(i64),
}

impl Operand {
    /// The constant payload, if this operand is a literal.
    pub fn as_const(self) -> Option<i64> {
        match self {
            Operand::Const(k) => Some(k),
            Operand::Reg(_) => None,
        }
    }
}

/// Straight-line instructions.
#[derive(Debug, Display, FromStr, Clone, Ord, PartialOrd, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum Instr {
    /// Integer binary operation on two operands of width `width`.
    #[display("%{result} = {op}.{width} {lhs} {rhs}")]
    Binary {
        result: usize,
        op: BinOp,
        width: u32,
        lhs: Operand,
        rhs: Operand,
    },
    /// Truncate `operand` to `width` bits.
    #[display("%{result} = trunc.{width} {operand}")]
    Trunc {
        result: usize,
        width: u32,
        operand: Operand,
    },
    /// Zero-extend `operand` to `width` bits.
    #[display("%{result} = zext.{width} {operand}")]
    ZExt {
        result: usize,
        width: u32,
        operand: Operand,
    },
    /// Read `width` bits from memory.
    #[display("%{result} = load.{width} {address}")]
    Load {
        result: usize,
        width: u32,
        address: Operand,
    },
    /// Write `data` to memory.
    #[display("store {data} {address}")]
    Store {
        data: Operand,
        address: Operand,
    },
    /// Call a named function with a single argument.
    #[display("%{result} = call.{width} @{callee} {arg}")]
    Call {
        result: usize,
        width: u32,
        callee: String,
        arg: Operand,
    },
    /// An integer of unknown provenance (an argument, an unmodelled source).
    #[display("%{result} = opaque.{width}")]
    Opaque {
        result: usize,
        width: u32,
    },
    /// A non-integer value; analyses treat it as fully live.
    #[display("%{result} = blob")]
    Blob {
        result: usize,
    },
}

impl Instr {
    /// The register defined by this instruction, if any.
    pub fn result(&self) -> Option<usize> {
        match *self {
            Instr::Binary { result, .. }
            | Instr::Trunc { result, .. }
            | Instr::ZExt { result, .. }
            | Instr::Load { result, .. }
            | Instr::Call { result, .. }
            | Instr::Opaque { result, .. }
            | Instr::Blob { result } => Some(result),
            Instr::Store { .. } => None,
        }
    }

    /// Type of the defined register, if any.
    pub fn result_ty(&self) -> Option<Ty> {
        match *self {
            Instr::Binary { width, .. }
            | Instr::Trunc { width, .. }
            | Instr::ZExt { width, .. }
            | Instr::Load { width, .. }
            | Instr::Call { width, .. }
            | Instr::Opaque { width, .. } => Some(Ty::Int(width)),
            Instr::Blob { .. } => Some(Ty::Opaque),
            Instr::Store { .. } => None,
        }
    }

    /// An instruction has no more than two operands as input.
    pub fn operands(&self) -> SmallVec<[Operand; 2]> {
        match *self {
            Instr::Binary { lhs, rhs, .. } => smallvec![lhs, rhs],
            Instr::Trunc { operand, .. } | Instr::ZExt { operand, .. } => smallvec![operand],
            Instr::Load { address, .. } => smallvec![address],
            Instr::Store { data, address } => smallvec![data, address],
            Instr::Call { arg, .. } => smallvec![arg],
            Instr::Opaque { .. } | Instr::Blob { .. } => SmallVec::new(),
        }
    }
}

/// Branching methods for two-way [`Terminator::Branch`]es.
///
/// [`Unless`](BranchKind::Unless) takes the `on_true` edge when the condition
/// is *clear*; the structuring phase records this as a negated `if`.
#[derive(Debug, Display, FromStr, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum BranchKind {
    #[display("br.if")]
    If,
    #[display("br.not")]
    Unless,
}

/// Block terminators. Successor order is semantic: the structuring phase
/// keeps the `on_true` edge first.
#[derive(Debug, Display, FromStr, Clone, Ord, PartialOrd, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum Terminator {
    /// Return without a value.
    #[display("ret")]
    Ret,
    /// Return a value.
    #[display("ret {0}")]
    RetValue(Operand),
    /// Unconditional jump to a block.
    #[display("jump [{0}]")]
    Jump(usize),
    /// Two-way conditional branch.
    #[display("{kind} {condition} [{on_true}] [{on_false}]")]
    Branch {
        kind: BranchKind,
        condition: Operand,
        on_true: usize,
        on_false: usize,
    },
}

impl Terminator {
    /// Successor blocks, in semantic order.
    pub fn successors(&self) -> SmallVec<[usize; 2]> {
        match *self {
            Terminator::Ret | Terminator::RetValue(_) => SmallVec::new(),
            Terminator::Jump(target) => smallvec![target],
            Terminator::Branch { on_true, on_false, .. } => smallvec![on_true, on_false],
        }
    }

    /// The branch condition, if this is a conditional branch.
    pub fn condition(&self) -> Option<(Operand, bool)> {
        match *self {
            Terminator::Branch { kind, condition, .. } =>
                Some((condition, matches!(kind, BranchKind::Unless))),
            _ => None,
        }
    }

    /// Operands read by this terminator.
    pub fn operands(&self) -> SmallVec<[Operand; 2]> {
        match *self {
            Terminator::RetValue(operand) => smallvec![operand],
            Terminator::Branch { condition, .. } => smallvec![condition],
            Terminator::Ret | Terminator::Jump(_) => SmallVec::new(),
        }
    }

    /// Apply a transformation to all successor block indices.
    pub fn map_dest(self, mut f: impl FnMut(usize) -> usize) -> Self {
        match self {
            Terminator::Jump(target) => Terminator::Jump(f(target)),
            Terminator::Branch { kind, condition, on_true, on_false } => Terminator::Branch {
                kind,
                condition,
                on_true: f(on_true),
                on_false: f(on_false),
            },
            terminator => terminator,
        }
    }
}
