//! Program analysis over the IR.
//!
//! This module provides the analysis stages between translation and rendering.
//! It builds upon the generic graph infrastructure in [`crate::utils::graph`]
//! for everything that walks the control flow.
//!
//! # Architecture
//!
//! The analysis module is organized into focused sub-modules:
//!
//! - [`cfg`] - Control flow graph construction, dominance and loops
//! - [`ssa`] - Static single assignment form and its verifier
//! - [`types`] - Constraint-based type inference, with or without SSA
//! - [`structure`] - Recovery of loops, switches and conditionals
//!
//! Each stage only borrows the output of the previous one, so stages can be run
//! on their own or repeated with different settings.
//!
//! # Usage
//!
//! ```rust
//! use irscope::{
//!     analysis::{build_cfg, recover_structure, JumpTables, SsaBuilder, TypeInference},
//!     config::{StructureConfig, TypeConfig},
//!     ir::IrProgram,
//!     translate::{Generic, Instruction, Translator},
//!     Diagnostics,
//! };
//!
//! let mut translator = Translator::new(Generic::default());
//! let mut program = IrProgram::new();
//! for (address, text) in [(0x1000, "mov r1, 0"), (0x1004, "add r1, r1, 1"), (0x1008, "ret")] {
//!     let insn = Instruction::parse(address, 4, text)?;
//!     program.add_instruction(address, 4, translator.translate(&insn)?)?;
//! }
//!
//! let diagnostics = Diagnostics::new();
//! let cfg = build_cfg(&mut program, &JumpTables::new(), &diagnostics)?;
//! let ssa = SsaBuilder::build(&cfg)?;
//! let types = TypeInference::new(&TypeConfig::default()).infer_ssa(&ssa, &diagnostics);
//! let structure = recover_structure(&cfg, &StructureConfig::default());
//!
//! assert!(!types.is_empty());
//! assert_eq!(structure.to_string(), "sequence(n0)");
//! # Ok::<(), irscope::Error>(())
//! ```

pub mod cfg;
pub mod ssa;
pub mod structure;
pub mod types;

// Re-export primary types at module level
pub use cfg::{
    build_cfg, detect_loops, detect_loops_with, BasicBlock, CfgEdge, CfgEdgeKind,
    ControlFlowGraph, JumpTables, LoopExit, LoopForest, LoopInfo, LoopType, Unresolved,
};
pub use ssa::{PhiNode, PhiOperand, SsaBlock, SsaBuilder, SsaFunction, SsaOp, SsaValue};
pub use structure::{recover_structure, StructureNode, StructureTree, SwitchCase, SwitchKind};
pub use types::{ConstraintSet, Signedness, Type, TypeInference, TypeMap};
