//! Control-structure recovery.
//!
//! Turns the control-flow graph back into nested high-level constructs: loops
//! from the loop forest, `switch` from jump tables and from chains of equality
//! tests, `if` and `if`/`else` from branches whose arms rejoin at the immediate
//! post-dominator. Whatever does not fit a pattern is kept as explicit gotos, so
//! recovery always produces a tree that covers every block.
//!
//! # Key Components
//!
//! - [`recover_structure`] - The region walk
//! - [`StructureTree`] - The result, with goto targets and diagnostics
//! - [`StructureNode`] - Tree nodes
//!
//! # References
//!
//! - Cifuentes, "Reverse Compilation Techniques", PhD thesis, 1994
//! - Yakdan et al., "No More Gotos", NDSS 2015

mod node;
mod recovery;

pub use node::{StructureNode, StructureTree, SwitchCase, SwitchKind};
pub use recovery::recover_structure;
