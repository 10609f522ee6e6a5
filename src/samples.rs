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

//! Textual sample functions shared by the test modules.

/// `entry -> A -> exit`, no branching at all.
pub const TRIVIAL: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  jump [1]
block 1:
  ret
";

/// A plain diamond: the entry chooses between two blocks that re-join.
pub const DIAMOND: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  br.if %0 [1] [2]
block 1:
  %1 = opaque.32
  jump [3]
block 2:
  %2 = opaque.32
  jump [3]
block 3:
  ret
";

/// The diamond again, branching on the negated condition.
pub const DIAMOND_NEGATED: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  br.not %0 [1] [2]
block 1:
  %1 = opaque.32
  jump [3]
block 2:
  %2 = opaque.32
  jump [3]
block 3:
  ret
";

/// The diamond with renamed registers; structurally the same function.
pub const DIAMOND_RENAMED: &str = "\
function entry [0]
block 0:
  %5 = opaque.32
  br.if %5 [1] [2]
block 1:
  %6 = opaque.32
  jump [3]
block 2:
  %7 = opaque.32
  jump [3]
block 3:
  ret
";

/// A `while` loop: the header tests, the body loops back.
pub const WHILE_LOOP: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  br.if %0 [1] [2]
block 1:
  %1 = opaque.32
  jump [0]
block 2:
  ret
";

/// A `do-while` loop: the latch tests.
pub const DO_WHILE_LOOP: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  jump [1]
block 1:
  %1 = opaque.32
  br.if %1 [0] [2]
block 2:
  ret
";

/// A loop with no exit at all.
pub const ENDLESS_LOOP: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  jump [0]
";

/// Acyclic ladder: block 3 is reachable from both branches of block 0
/// along structurally incomparable paths, so inflation duplicates it once.
pub const LADDER: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  br.if %0 [1] [2]
block 1:
  %1 = opaque.32
  jump [3]
block 2:
  %2 = opaque.32
  br.if %2 [3] [4]
block 3:
  %3 = opaque.32
  jump [4]
block 4:
  ret
";

/// A two-entry cycle: blocks 1 and 2 form a loop entered at both.
pub const IRREDUCIBLE: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  br.if %0 [1] [2]
block 1:
  %1 = opaque.32
  jump [2]
block 2:
  %2 = opaque.32
  jump [1]
";

/// A loop leaving towards three different blocks, forcing an exit
/// dispatcher.
pub const EXIT_DISPATCHER_LOOP: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  br.if %0 [1] [2]
block 1:
  %1 = opaque.32
  br.if %1 [3] [4]
block 2:
  %2 = opaque.32
  ret
block 3:
  %3 = opaque.32
  br.if %3 [0] [5]
block 4:
  ret
block 5:
  ret
";

/// `%1 = %0 & 0xff` with only the bottom four bits observed.
pub const MASK_AND: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  %1 = and.32 %0 255
  %2 = trunc.4 %1
  %3 = opaque.64
  store %2 %3
  ret
";

/// Constant shifts in both directions feeding a return.
pub const SHIFTS: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  %1 = lshr.32 %0 16
  %2 = shl.32 %1 8
  ret %2
";

/// A non-integer value flowing into a store.
pub const BLOB_SINK: &str = "\
function entry [0]
block 0:
  %0 = blob
  %1 = opaque.64
  store %1 %0
  ret
";

/// A call whose side effects depend on the callee's tags.
pub const READNONE_CALL: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  %1 = call.32 @observe %0
  ret
";

/// A shift whose liveness is pushed to `⊤` by a non-integer store operand.
pub const SATURATE: &str = "\
function entry [0]
block 0:
  %0 = opaque.32
  %1 = lshr.32 %0 1
  %2 = blob
  store %1 %2
  ret
";

/// All samples, for the round-trip and smoke tests.
pub const ALL_SAMPLES: &[&str] = &[
    TRIVIAL,
    DIAMOND,
    DIAMOND_NEGATED,
    DIAMOND_RENAMED,
    WHILE_LOOP,
    DO_WHILE_LOOP,
    ENDLESS_LOOP,
    LADDER,
    IRREDUCIBLE,
    EXIT_DISPATCHER_LOOP,
    MASK_AND,
    SHIFTS,
    BLOB_SINK,
    READNONE_CALL,
    SATURATE,
];
