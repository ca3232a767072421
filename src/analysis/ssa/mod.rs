//! Static Single Assignment (SSA) form over IR varnodes.
//!
//! Every register, temporary and stack-slot varnode is renamed so that each
//! [`SsaValue`] (a varnode plus a generation) is assigned exactly once. Values
//! reaching a join through different edges are merged by [`PhiNode`]s at the head
//! of the join block. Constants and `ram` varnodes are never renamed.
//!
//! # Architecture
//!
//! - [`variable`] - SSA values, definition and use sites
//! - [`phi`] - Phi nodes for control flow merges
//! - [`instruction`] - Renamed operations
//! - [`block`] - SSA blocks holding phis and operations
//! - [`function`] - Complete SSA function with def/use indexes
//! - [`builder`] - SSA construction (Cytron et al.)
//! - [`verify`] - Re-checking the SSA invariants
//!
//! ## Generations
//!
//! Generation 0 is the live-in value of a varnode, defined implicitly at the entry.
//! Explicit definitions count up from 1 per varnode.
//!
//! ## Aliasing
//!
//! Renaming keys on exact varnodes, so `eax` and `rax` have separate generations.
//! The translator follows every write to a view with a write of the full
//! register, and the builder reads a view whose container was written later
//! through an inserted `SUBPIECE` of the container.
//!
//! # Usage
//!
//! ```rust
//! use irscope::{
//!     analysis::{build_cfg, ssa::verify, JumpTables, SsaBuilder},
//!     translate::{Generic, Instruction, Translator},
//!     ir::IrProgram,
//!     Diagnostics,
//! };
//!
//! let mut translator = Translator::new(Generic::default());
//! let mut program = IrProgram::new();
//! let listing = [
//!     (0x1000, "beqz r3, 0x100c"),
//!     (0x1004, "mov r1, 1"),
//!     (0x1008, "jmp 0x1010"),
//!     (0x100c, "mov r1, 2"),
//!     (0x1010, "ret"),
//! ];
//! for (address, text) in listing {
//!     let insn = Instruction::parse(address, 4, text)?;
//!     program.add_instruction(address, 4, translator.translate(&insn)?)?;
//! }
//!
//! let cfg = build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new())?;
//! let ssa = SsaBuilder::build(&cfg)?;
//! verify(&ssa, &cfg)?;
//!
//! for (id, block) in ssa.blocks() {
//!     for phi in block.phis() {
//!         println!("B{}: {phi}", id.index());
//!     }
//! }
//! # Ok::<(), irscope::Error>(())
//! ```
//!
//! # References
//!
//! - Cytron et al., "Efficiently Computing Static Single Assignment Form and the
//!   Control Dependence Graph", ACM TOPLAS 1991
//! - Briggs et al., "Practical Improvements to the Construction and Destruction of
//!   Static Single Assignment Form", SP&E 1998

mod block;
mod builder;
mod function;
mod instruction;
mod phi;
mod variable;
pub mod verify;

pub use block::SsaBlock;
pub use builder::SsaBuilder;
pub use function::SsaFunction;
pub use instruction::SsaOp;
pub use phi::{PhiNode, PhiOperand};
pub use variable::{is_renamed, DefSite, SsaValue, UseSite};
pub use verify::verify;
