//! Edge identifier for directed graphs.
//!
//! Edges are stored densely in insertion order. Phi operand slots are keyed by
//! the [`EdgeId`] of the incoming edge, which keeps parallel edges between the
//! same pair of blocks distinct.

use std::fmt;

/// A strongly-typed identifier for edges within a directed graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub(crate) usize);

impl EdgeId {
    /// Creates a new `EdgeId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        EdgeId(index)
    }

    /// Returns the raw, 0-based index of this edge.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgeId({})", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_id_basics() {
        let edge = EdgeId::new(3);
        assert_eq!(edge.index(), 3);
        assert_eq!(format!("{edge:?}"), "EdgeId(3)");
        assert_eq!(format!("{edge}"), "e3");
        assert!(EdgeId::new(1) < EdgeId::new(2));
    }
}
