//! Node identifier for directed graphs.
//!
//! [`NodeId`] names a basic block (or any other node) inside a
//! [`DirectedGraph`](crate::utils::graph::DirectedGraph). Identifiers are dense
//! indices handed out in insertion order, so per-node analysis results can live in
//! plain vectors indexed by [`NodeId::index`].

use std::fmt;

/// A strongly-typed identifier for nodes within a directed graph.
///
/// Blocks of a control-flow graph are arena allocated; a `NodeId` is the stable
/// handle to one of them. It is `Copy` and cheap to hash, which keeps
/// predecessor lists, dominator tables and loop bodies free of references into
/// the graph itself.
///
/// # Examples
///
/// ```rust
/// use irscope::utils::graph::{DirectedGraph, NodeId};
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let entry = graph.add_node("entry");
/// assert_eq!(entry, NodeId::new(0));
/// assert_eq!(entry.index(), 0);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    ///
    /// Normal code obtains ids from
    /// [`DirectedGraph::add_node`](crate::utils::graph::DirectedGraph::add_node);
    /// this constructor exists for tests and for rebuilding ids from stored indices.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw, 0-based index of this node.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<usize> for NodeId {
    #[inline]
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_roundtrip() {
        let node = NodeId::new(42);
        assert_eq!(node.index(), 42);

        let raw: usize = node.into();
        assert_eq!(raw, 42);

        let back: NodeId = raw.into();
        assert_eq!(back, node);
    }

    #[test]
    fn test_node_id_ordering() {
        let mut nodes = vec![NodeId::new(3), NodeId::new(1), NodeId::new(2)];
        nodes.sort();
        assert_eq!(nodes, vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)]);
    }

    #[test]
    fn test_node_id_hash() {
        let mut set = HashSet::new();
        set.insert(NodeId::new(1));
        set.insert(NodeId::new(2));
        set.insert(NodeId::new(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_node_id_formatting() {
        let node = NodeId::new(7);
        assert_eq!(format!("{node:?}"), "NodeId(7)");
        assert_eq!(format!("{node}"), "n7");
    }
}
