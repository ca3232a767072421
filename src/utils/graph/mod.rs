//! Generic directed graph infrastructure.
//!
//! The control-flow graph of every decompiled function sits on top of
//! [`DirectedGraph`]. Algorithms are written against the traits in [`traits`] so
//! they also run on filtered views of a CFG.

pub mod algorithms;
mod directed;
mod edge;
mod node;
mod traits;

pub use directed::DirectedGraph;
pub use edge::EdgeId;
pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};
