// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # irscope
//!
//! A machine-code-independent decompilation core. `irscope` takes a linear stream
//! of already decoded machine instructions and lowers it through a P-code style
//! intermediate representation into structured, typed pseudocode.
//!
//! ## Features
//!
//! - **🧱 Small, explicit IR** - Sized varnodes in five address spaces, ~70 opcodes with checked arity
//! - **🔀 Control flow graphs** - Basic blocks, jump tables, unresolved edges and natural loops
//! - **🧬 SSA form** - Phi placement from dominance frontiers, view-aware renaming and a verifier
//! - **🏷️ Type inference** - Constraint solving over a size-aware type lattice
//! - **🧩 Structure recovery** - Loops, switches and conditionals, with goto fallback
//! - **📝 Pseudocode** - C-like output with inlined conditions and typed declarations
//! - **⚡ Parallel** - Independent functions decompile concurrently on `rayon`
//!
//! ## Quick Start
//!
//! ```rust
//! use irscope::prelude::*;
//!
//! let input = FunctionInput::from_listing(
//!     0x1000,
//!     4,
//!     &["mov r1, 0", "bge r1, 10, 0x1010", "add r1, r1, 1", "b 0x1004", "ret"],
//! )?;
//!
//! let decompiler = Decompiler::new(Generic::default(), DecompilerConfig::default());
//! let function = decompiler.decompile(&input)?;
//!
//! assert_eq!(function.cfg.loops().len(), 1);
//! assert!(function.text.contains("while (r1 < 0xa) {"));
//! # Ok::<(), irscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! Data flows strictly forward; every stage only borrows the output of the
//! previous one and can be run on its own:
//!
//! ```text
//! Instruction ──► translate ──► IrProgram ──► analysis::cfg ──► ControlFlowGraph
//!                                                   │
//!                       ┌───────────────────────────┼──────────────────────┐
//!                       ▼                           ▼                      ▼
//!                analysis::ssa             analysis::structure       (dominators,
//!                       │                           │                  loops)
//!                       ▼                           │
//!               analysis::types                     │
//!                       └─────────────► render ◄────┘
//! ```
//!
//! - [`ir`] - Varnodes, opcodes, operations and the program container
//! - [`translate`] - Register models and the instruction lowering front end
//! - [`analysis`] - CFG, dominance, SSA, type inference and structure recovery
//! - [`render`] - Pseudocode printing
//! - [`pipeline`] - The [`Decompiler`] running all of the above
//! - [`utils`] - Generic directed graphs and their algorithms
//!
//! ## Error Handling
//!
//! Operations that can fail return [`Result<T>`]. Problems that only degrade the
//! output, such as an unresolved indirect jump or a region that needed a goto,
//! are collected as [`Diagnostic`]s on the result instead.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use irscope::prelude::*;
///
/// let decompiler = Decompiler::new(X86_64, DecompilerConfig::fast());
/// let input = FunctionInput::from_listing(0x1000, 4, &["xor eax, eax", "ret"])?;
/// let function = decompiler.decompile(&input)?;
/// assert!(function.diagnostics.by_category(DiagnosticCategory::Unstructured).is_empty());
/// # Ok::<(), irscope::Error>(())
/// ```
pub mod prelude;

/// Diagnostics collected while decompiling.
///
/// Conditions that lower the quality of the output without making it wrong are
/// reported here rather than as errors.
pub mod diagnostics;

/// Pipeline configuration and its presets.
pub mod config;

/// The intermediate representation.
///
/// Programs are flat, address-ordered lists of [`ir::PcodeOp`]s reading and writing
/// [`ir::Varnode`]s. Every operation is checked against the arity and size rules
/// of its [`ir::OpCode`].
pub mod ir;

/// The instruction front end.
///
/// A [`translate::RegisterModel`] names registers and flags; the
/// [`translate::Translator`] lowers decoded [`translate::Instruction`]s into IR.
pub mod translate;

/// Analyses over the IR.
pub mod analysis;

/// Pseudocode output.
pub mod render;

/// The end-to-end decompiler.
pub mod pipeline;

/// Generic graph infrastructure.
///
/// The CFG, dominator trees and loop detection are all built on the
/// [`utils::graph::DirectedGraph`] arena and its algorithms.
pub mod utils;

/// `irscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `irscope` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the
/// individual variants.
pub use error::Error;

pub use config::DecompilerConfig;
pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};
pub use pipeline::{DecompiledFunction, Decompiler, FunctionInput};
