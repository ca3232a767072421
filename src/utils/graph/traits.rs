//! Trait definitions for graph abstractions.
//!
//! Algorithms in [`crate::utils::graph::algorithms`] are written against these
//! traits rather than a concrete graph type. The control-flow graph implements
//! them twice: once over every edge (including the conservative edges added for
//! unresolved indirect jumps) and once through a structural view that only sees
//! statically known edges.
//!
//! - [`GraphBase`] - node count and node iteration
//! - [`Successors`] - forward adjacency
//! - [`Predecessors`] - backward adjacency
//! - [`RootedGraph`] - a designated entry node

use crate::utils::graph::NodeId;

/// Base trait providing core graph properties.
pub trait GraphBase {
    /// Returns the number of nodes in the graph.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all node identifiers, in ascending index order.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support forward edge traversal.
///
/// For a directed edge `(u, v)`, node `v` is a successor of `u`. Parallel edges
/// yield the successor once per edge.
pub trait Successors: GraphBase {
    /// Returns an iterator over the successor nodes of `node`.
    ///
    /// # Panics
    ///
    /// May panic if `node` is not a valid node in the graph.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the predecessor nodes of `node`.
    ///
    /// # Panics
    ///
    /// May panic if `node` is not a valid node in the graph.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs with a designated entry (root) node.
///
/// Dominator computation starts from [`RootedGraph::entry`]; in a control-flow
/// graph this is the block holding the function's first instruction.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry node of the graph.
    fn entry(&self) -> NodeId;
}
