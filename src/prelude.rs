//! # irscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the irscope library. Import this module to get quick access to the pipeline,
//! the front end and the analysis results.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all irscope operations
pub use crate::Error;

/// The result type used throughout irscope
pub use crate::Result;

/// Diagnostics attached to every decompiled function
pub use crate::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The end-to-end pipeline
pub use crate::{DecompiledFunction, Decompiler, FunctionInput};

/// Pipeline configuration
pub use crate::config::{DecompilerConfig, RenderConfig, StructureConfig, TypeConfig};

// ================================================================================================
// Front End and IR
// ================================================================================================

/// Register models, decoded instructions and the translator
pub use crate::translate::{
    Generic, Instruction, MemoryOperand, Operand, RegisterModel, Translator, UnsupportedPolicy,
    X86_64,
};

/// IR building blocks
pub use crate::ir::{AddressSpace, IrProgram, OpCode, PcodeOp, Varnode};

// ================================================================================================
// Analysis Results
// ================================================================================================

/// Control flow and loops
pub use crate::analysis::{build_cfg, ControlFlowGraph, JumpTables, LoopType};

/// SSA and types
pub use crate::analysis::{SsaBuilder, SsaFunction, SsaValue, Type, TypeInference, TypeMap};

/// Control structure
pub use crate::analysis::{recover_structure, StructureNode, StructureTree};

/// Pseudocode
pub use crate::render::Renderer;
