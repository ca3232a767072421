//! C-like pseudocode output.
//!
//! The renderer walks a [`StructureTree`](crate::analysis::StructureTree) and
//! prints each block's operations as statements, folding single-use temporaries
//! and condition flags into the expressions that read them. Declarations are
//! typed from the inferred [`TypeMap`](crate::analysis::TypeMap); values whose
//! type stayed unknown print as `undefinedN`.
//!
//! Output is deterministic for a given input and configuration.

mod expr;
mod printer;

pub use printer::Renderer;
