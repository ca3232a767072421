//! Basic blocks of IR operations.

use std::fmt;

use crate::ir::PcodeOp;

/// Why a block has fewer successors than its terminator suggests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unresolved {
    /// An indirect jump without a jump table.
    Indirect,
    /// A branch, call return or fall-through that leaves the translated window.
    OutOfWindow {
        /// The address control would continue at
        target: u64,
    },
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::Indirect => write!(f, "indirect"),
            Unresolved::OutOfWindow { target } => write!(f, "out of window 0x{target:x}"),
        }
    }
}

/// A maximal straight-line run of operations.
///
/// Control only leaves through the last operation. Every operation carries the
/// id of this block in [`PcodeOp::block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Address of the first operation
    pub start: u64,
    /// Address of the last operation
    pub last: u64,
    /// Operations in execution order
    pub ops: Vec<PcodeOp>,
    /// Set when some successor could not be determined
    pub unresolved: Option<Unresolved>,
}

impl BasicBlock {
    /// The last operation.
    #[must_use]
    pub fn terminator(&self) -> Option<&PcodeOp> {
        self.ops.last()
    }

    /// Returns `true` if an operation of this block originates at `address`.
    #[must_use]
    pub fn contains_address(&self, address: u64) -> bool {
        (self.start..=self.last).contains(&address)
    }

    /// Returns `true` if the block ends in an indirect jump with no known targets.
    #[must_use]
    pub fn has_unknown_successor(&self) -> bool {
        matches!(self.unresolved, Some(Unresolved::Indirect))
    }
}
