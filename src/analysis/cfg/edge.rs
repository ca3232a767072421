//! Control flow edge types for the CFG.
//!
//! Every edge carries the reason control can move along it. Most analyses only
//! need the target, but structure recovery and rendering distinguish the taken
//! and fall-through arms of a conditional branch, switch cases, and the
//! conservative edges that stand in for an unresolved indirect jump.

use crate::utils::graph::NodeId;

/// The kind of control flow represented by an edge.
///
/// # Examples
///
/// ```rust
/// use irscope::analysis::CfgEdgeKind;
///
/// assert!(CfgEdgeKind::ConditionalTrue.is_conditional());
/// assert!(!CfgEdgeKind::Unresolved.is_structural());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfgEdgeKind {
    /// The next block, reached by running off the end of a block that does not
    /// end in a control transfer.
    Fallthrough,

    /// A `BRANCH` to a known target.
    Unconditional,

    /// The taken arm of a `CBRANCH`.
    ConditionalTrue,

    /// The fall-through arm of a `CBRANCH`.
    ConditionalFalse,

    /// One jump table entry of a `BRANCHIND`.
    Switch {
        /// Index of the entry in the jump table.
        case_value: u64,
    },

    /// Return point of a call that is expected to come back.
    CallReturn,

    /// Conservative edge from a block ending in an indirect jump with no known
    /// targets. Every non-entry block is a possible target.
    Unresolved,
}

impl CfgEdgeKind {
    /// Returns `true` for [`ConditionalTrue`](Self::ConditionalTrue) and
    /// [`ConditionalFalse`](Self::ConditionalFalse).
    #[must_use]
    pub const fn is_conditional(&self) -> bool {
        matches!(self, Self::ConditionalTrue | Self::ConditionalFalse)
    }

    /// Returns `true` if this is a switch case edge.
    #[must_use]
    pub const fn is_switch(&self) -> bool {
        matches!(self, Self::Switch { .. })
    }

    /// Returns `true` for every statically known edge.
    ///
    /// Loop detection, post-dominance and structure recovery only follow
    /// structural edges; dominance and SSA see every edge.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// An edge in the control flow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgEdge {
    target: NodeId,
    kind: CfgEdgeKind,
}

impl CfgEdge {
    /// Creates a new edge towards `target`.
    #[must_use]
    pub const fn new(target: NodeId, kind: CfgEdgeKind) -> Self {
        Self { target, kind }
    }

    /// Returns the target block.
    #[must_use]
    pub const fn target(&self) -> NodeId {
        self.target
    }

    /// Returns the kind of this edge.
    #[must_use]
    pub const fn kind(&self) -> &CfgEdgeKind {
        &self.kind
    }
}
