//! Translation of decoded machine instructions into IR.
//!
//! The front end is architecture-specific only through its [`RegisterModel`]:
//! register names, sub-register views, the stack and frame pointers and an
//! optional flag layout. Mnemonic lowering is shared, so the same [`Translator`]
//! handles x86-64 style two-operand code and flag-less three-operand code with
//! compare-and-branch instructions.
//!
//! # Key Components
//!
//! - [`Instruction`] / [`Operand`] / [`MemoryOperand`] - decoded input, with a textual
//!   parser for assembly listings
//! - [`RegisterModel`] with [`X86_64`] and [`Generic`]
//! - [`Condition`] - condition codes of `jcc`, `setcc`, `cmovcc` and `bxx`
//! - [`Translator`] - the mnemonic-keyed lowering
//! - [`UnsupportedPolicy`] - what callers do with unknown mnemonics
//!
//! # Flags
//!
//! With a flag layout, arithmetic writes `CF`, `OF`, `ZF` and `SF` explicitly as
//! 1-byte register varnodes. A conditional branch immediately following a `cmp`,
//! `test` or `ucomis*` compares the original operands directly (`jl` after
//! `cmp a, b` becomes `INT_SLESS a, b`); elsewhere the condition is rebuilt from
//! the flags.

mod conditions;
mod instruction;
mod registers;
mod translator;

pub use conditions::Condition;
pub use instruction::{Instruction, MemoryOperand, Operand};
pub use registers::{FlagLayout, Generic, RegisterModel, ReturnLinkage, X86_64};
pub use translator::{Translator, PLACEHOLDER_PREFIX, UNIQUE_BASE};

use strum::Display;

/// What to do with an instruction the front end cannot lower.
///
/// Every policy except [`UnsupportedPolicy::Abort`] records an
/// `UnsupportedInstruction` diagnostic and keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum UnsupportedPolicy {
    /// Fail the function
    Abort,
    /// Drop the instruction
    Skip,
    /// Emit a `CALLOTHER` naming the mnemonic
    #[default]
    Placeholder,
}
