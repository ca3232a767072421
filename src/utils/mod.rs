//! Shared utilities: the graph arena and its algorithms, plus DOT helpers.

mod dot;
pub mod graph;

pub use dot::escape_dot;
