//! Control Flow Graph (CFG) construction and analysis.
//!
//! This module partitions a function's IR into basic blocks and provides a graph
//! abstraction over them with traversal, dominator computation, and loop detection.
//!
//! # Architecture
//!
//! The CFG builds upon the generic [`crate::utils::graph::DirectedGraph`] infrastructure,
//! storing [`BasicBlock`]s as nodes and [`CfgEdge`]s as edges while leveraging shared
//! algorithms for dominators and traversals.
//!
//! # Key Components
//!
//! - [`build_cfg`] - Leader detection, partitioning and successor resolution
//! - [`ControlFlowGraph`] - The main CFG structure wrapping basic blocks
//! - [`CfgEdge`] / [`CfgEdgeKind`] - Edges with control flow semantics
//! - [`Unresolved`] - Why a block lacks some successor
//! - [`LoopForest`] / [`LoopInfo`] - Natural loops with their classification
//!
//! # Unresolved Control Flow
//!
//! An indirect jump without a jump table cannot be followed statically. Rather
//! than dropping it, the builder marks the block [`Unresolved::Indirect`] and adds
//! [`CfgEdgeKind::Unresolved`] edges to every non-entry block, so dominance and
//! SSA construction stay sound. Analyses that need the shape of the code (loops,
//! post-dominance, structure recovery) use [`ControlFlowGraph::structural`],
//! which hides those edges.
//!
//! # Lazy Computation
//!
//! Dominator trees, dominance frontiers, post-dominators and loops are computed
//! lazily on first access and cached using [`std::sync::OnceLock`].
//!
//! # Examples
//!
//! ```rust
//! use irscope::{
//!     analysis::{build_cfg, JumpTables},
//!     translate::{Generic, Instruction, Translator},
//!     ir::IrProgram,
//!     Diagnostics,
//! };
//!
//! let mut translator = Translator::new(Generic::default());
//! let mut program = IrProgram::new();
//! for (address, text) in [(0x1000, "beqz r1, 0x100c"), (0x1004, "add r2, r2, 1"), (0x1008, "ret"), (0x100c, "ret")] {
//!     let insn = Instruction::parse(address, 4, text)?;
//!     program.add_instruction(address, 4, translator.translate(&insn)?)?;
//! }
//!
//! let cfg = build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new())?;
//! assert_eq!(cfg.block_count(), 3);
//! assert_eq!(cfg.exits().len(), 2);
//! # Ok::<(), irscope::Error>(())
//! ```

mod block;
mod builder;
mod edge;
mod graph;
mod loops;

pub use block::{BasicBlock, Unresolved};
pub use builder::{build_cfg, JumpTables};
pub use edge::{CfgEdge, CfgEdgeKind};
pub use graph::{ControlFlowGraph, StructuralView};
pub use loops::{detect_loops, detect_loops_with, LoopExit, LoopForest, LoopInfo, LoopType};
