//! Architecture-neutral intermediate representation.
//!
//! Machine instructions are lowered into P-code style operations: each
//! [`PcodeOp`] applies one [`OpCode`] to sized [`Varnode`] inputs and writes at most
//! one output. Varnodes name registers, memory, constants, temporaries and stack
//! slots uniformly, so later stages never look at machine specifics.
//!
//! # Key Components
//!
//! - [`Varnode`] / [`AddressSpace`] - value references
//! - [`OpCode`] - the operator catalog with [`Arity`], [`OutputRule`], [`SizeRule`]
//!   and [`OpFlags`] per operator
//! - [`PcodeOp`] - one operation, with [`PcodeOp::validate`]
//! - [`IrProgram`] - the address-ordered operations of a function

mod op;
mod opcode;
mod program;
mod varnode;

pub use op::PcodeOp;
pub use opcode::{Arity, OpCode, OpFlags, OutputRule, SizeRule};
pub use program::IrProgram;
pub use varnode::{mask, AddressSpace, Varnode};
