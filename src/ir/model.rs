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

//! The slice of the type model and function classification the analyses
//! consume. Anything richer stays with the surrounding toolchain.

use std::collections::{BTreeMap, BTreeSet};
use parse_display::{Display, FromStr};

use super::instr::Ty;

/// Target architecture facts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Architecture {
    /// Pointer size in bytes.
    pub pointer_size: u64,
}

impl Default for Architecture {
    fn default() -> Self { Architecture { pointer_size: 8 } }
}

/// A model type as seen from the analyses: scalar-ness, void-ness, and size.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct QualifiedType(pub Ty);

impl QualifiedType {
    /// Whether this type is a scalar (loads and stores of it are single
    /// memory operations).
    pub fn is_scalar(self) -> bool {
        matches!(self.0, Ty::Int(_) | Ty::Ptr)
    }

    /// Whether this type is `void`.
    pub fn is_void(self) -> bool { matches!(self.0, Ty::Void) }

    /// Whether this type is a pointer.
    pub fn is_pointer(self) -> bool { matches!(self.0, Ty::Ptr) }

    /// Size in bytes, when known.
    pub fn size(self, arch: &Architecture) -> Option<u64> {
        match self.0 {
            Ty::Int(bits) => Some(u64::from(bits.max(8)) / 8),
            Ty::Ptr => Some(arch.pointer_size),
            Ty::Void | Ty::Opaque => None,
        }
    }
}

/// Check whether a model type can carry the value of an IR type in a single
/// memory operation (load, store and the like).
pub fn are_mem_op_compatible(model: QualifiedType, ir: Ty, arch: &Architecture) -> bool {
    // Entire aggregates are never moved by a single memory operation, and
    // void pointees cannot be loaded or stored at all.
    if !model.is_scalar() || model.is_void() {
        return false;
    }
    let model_size = match model.size(arch) {
        Some(size) => size,
        None => return false,
    };
    match ir {
        Ty::Ptr => model_size == arch.pointer_size,
        // i1 and other sub-byte widths round up to a single byte.
        Ty::Int(bits) if bits < 8 => model_size == 1,
        Ty::Int(bits) => model_size * 8 == u64::from(bits),
        Ty::Void | Ty::Opaque => false,
    }
}

/// Classification tags attached to known functions.
#[derive(Debug, Display, FromStr, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
#[display(style = "snake_case")]
#[allow(missing_docs)]
pub enum FunctionTag {
    /// Variable assignment helper emitted by earlier pipeline stages.
    Assign,
    /// Local variable declaration helper.
    LocalVariable,
    /// Runtime helper originating from the emulator.
    Qemu,
    /// Generic runtime helper.
    Helper,
    /// Exception-related runtime machinery.
    Exceptional,
    /// The callee never touches memory.
    ReadNone,
}

/// Tags for all the functions known by name.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct TagMap {
    tags: BTreeMap<String, BTreeSet<FunctionTag>>,
}

impl TagMap {
    /// Attach `tag` to the function named `callee`.
    pub fn insert(&mut self, callee: impl Into<String>, tag: FunctionTag) {
        self.tags.entry(callee.into()).or_default().insert(tag);
    }

    /// Whether `callee` carries `tag`.
    pub fn is_tagged(&self, callee: &str, tag: FunctionTag) -> bool {
        self.tags.get(callee).map_or(false, |tags| tags.contains(&tag))
    }

    /// Whether a call to `callee` targets runtime machinery rather than a
    /// lifted (isolated) function.
    pub fn is_call_to_non_isolated(&self, callee: &str) -> bool {
        [FunctionTag::Qemu, FunctionTag::Helper, FunctionTag::Exceptional].iter()
            .any(|&tag| self.is_tagged(callee, tag))
    }

    /// Whether a call to `callee` targets a lifted (isolated) function.
    pub fn is_call_to_isolated_function(&self, callee: &str) -> bool {
        !self.is_call_to_non_isolated(callee)
    }

    /// Whether a call to `callee` may write memory or otherwise produce an
    /// observable effect.
    pub fn has_side_effects(&self, callee: &str) -> bool {
        !self.is_tagged(callee, FunctionTag::ReadNone)
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::Ty;
    use super::{are_mem_op_compatible, Architecture, FunctionTag, QualifiedType, TagMap};

    #[test]
    fn test_mem_op_compat() {
        let arch = Architecture::default();
        assert!(are_mem_op_compatible(QualifiedType(Ty::Int(32)), Ty::Int(32), &arch));
        assert!(are_mem_op_compatible(QualifiedType(Ty::Ptr), Ty::Ptr, &arch));
        assert!(are_mem_op_compatible(QualifiedType(Ty::Int(8)), Ty::Int(1), &arch));
        assert!(!are_mem_op_compatible(QualifiedType(Ty::Int(16)), Ty::Int(32), &arch));
        assert!(!are_mem_op_compatible(QualifiedType(Ty::Void), Ty::Int(32), &arch));
        assert!(!are_mem_op_compatible(QualifiedType(Ty::Opaque), Ty::Int(32), &arch));
    }

    #[test]
    fn test_tags() {
        let mut tags = TagMap::default();
        tags.insert("memcpy_helper", FunctionTag::Helper);
        tags.insert("bswap", FunctionTag::ReadNone);
        assert!(tags.is_call_to_non_isolated("memcpy_helper"));
        assert!(tags.is_call_to_isolated_function("user_main"));
        assert!(tags.has_side_effects("memcpy_helper"));
        assert!(!tags.has_side_effects("bswap"));
    }
}
