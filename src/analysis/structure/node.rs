//! The control-structure tree.

use std::{collections::BTreeSet, fmt};

use crate::{ir::Varnode, utils::graph::NodeId, Diagnostic};

/// How a [`StructureNode::Switch`] selects its case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchKind {
    /// A `BRANCHIND` through a resolved jump table; case values are table indices.
    Table,
    /// A chain of equality tests of one selector against constants.
    Chain {
        /// The compared value
        selector: Varnode,
        /// Chain blocks after the head, in test order
        blocks: Vec<NodeId>,
    },
}

/// One arm of a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCase {
    /// Case labels sharing this body, ascending
    pub values: Vec<u64>,
    /// The case body
    pub body: StructureNode,
}

/// A node of the control-structure tree.
///
/// Nodes that own a condition block (`IfThen`, `IfThenElse`, `While`, `DoWhile`,
/// `Switch`) also own that block's statements; the block never appears as a
/// separate [`Block`](Self::Block) leaf.
///
/// `negated` flags mean the construct runs on the *false* arm of the block's
/// `CBRANCH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureNode {
    /// Nodes executed in order.
    Sequence(Vec<StructureNode>),
    /// `if (cond) then_branch`
    IfThen {
        /// Block ending in the `CBRANCH`
        condition: NodeId,
        /// The body runs when the condition is false
        negated: bool,
        /// Body
        then_branch: Box<StructureNode>,
    },
    /// `if (cond) then_branch else else_branch`; the then arm is the taken edge.
    IfThenElse {
        /// Block ending in the `CBRANCH`
        condition: NodeId,
        /// Taken arm
        then_branch: Box<StructureNode>,
        /// Fall-through arm
        else_branch: Box<StructureNode>,
    },
    /// Pre-tested loop; `header` holds the test.
    While {
        /// Loop header
        header: NodeId,
        /// The loop continues while the condition is false
        negated: bool,
        /// Body, excluding the header
        body: Box<StructureNode>,
    },
    /// Post-tested loop; `latch` holds the test.
    DoWhile {
        /// Body from the header up to, excluding, the latch
        body: Box<StructureNode>,
        /// Block with the back edge
        latch: NodeId,
        /// The loop continues while the condition is false
        negated: bool,
    },
    /// Loop without a structured exit test.
    InfiniteLoop {
        /// Loop header
        header: NodeId,
        /// Body, starting with the header
        body: Box<StructureNode>,
    },
    /// Multi-way branch.
    Switch {
        /// Block computing the selector
        head: NodeId,
        /// Table or compare chain
        kind: SwitchKind,
        /// Cases in ascending order of their first value
        cases: Vec<SwitchCase>,
        /// Body for every other value
        default: Option<Box<StructureNode>>,
    },
    /// A basic block's statements.
    Block(NodeId),
    /// Leave the innermost loop or switch.
    Break,
    /// Next iteration of the innermost loop.
    Continue,
    /// Unstructured transfer to a block.
    Goto(NodeId),
}

impl StructureNode {
    /// An empty sequence.
    #[must_use]
    pub fn empty() -> Self {
        StructureNode::Sequence(Vec::new())
    }

    /// Returns `true` for an empty sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, StructureNode::Sequence(items) if items.is_empty())
    }

    /// Returns `true` if control never continues after this node.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        match self {
            StructureNode::Break | StructureNode::Continue | StructureNode::Goto(_) => true,
            StructureNode::Sequence(items) => items.last().is_some_and(StructureNode::is_jump),
            _ => false,
        }
    }

    /// Every block this subtree mentions, in tree order.
    #[must_use]
    pub fn blocks(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_blocks(&mut out);
        out
    }

    fn collect_blocks(&self, out: &mut Vec<NodeId>) {
        match self {
            StructureNode::Sequence(items) => {
                for item in items {
                    item.collect_blocks(out);
                }
            }
            StructureNode::IfThen {
                condition,
                then_branch,
                ..
            } => {
                out.push(*condition);
                then_branch.collect_blocks(out);
            }
            StructureNode::IfThenElse {
                condition,
                then_branch,
                else_branch,
            } => {
                out.push(*condition);
                then_branch.collect_blocks(out);
                else_branch.collect_blocks(out);
            }
            StructureNode::While { header, body, .. } => {
                out.push(*header);
                body.collect_blocks(out);
            }
            StructureNode::DoWhile { body, latch, .. } => {
                body.collect_blocks(out);
                out.push(*latch);
            }
            StructureNode::InfiniteLoop { body, .. } => body.collect_blocks(out),
            StructureNode::Switch {
                head,
                kind,
                cases,
                default,
            } => {
                out.push(*head);
                if let SwitchKind::Chain { blocks, .. } = kind {
                    out.extend(blocks.iter().copied());
                }
                for case in cases {
                    case.body.collect_blocks(out);
                }
                if let Some(default) = default {
                    default.collect_blocks(out);
                }
            }
            StructureNode::Block(block) => out.push(*block),
            StructureNode::Break | StructureNode::Continue | StructureNode::Goto(_) => {}
        }
    }
}

impl fmt::Display for StructureNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureNode::Sequence(items) => {
                write!(f, "sequence(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            StructureNode::IfThen {
                condition,
                negated,
                then_branch,
            } => {
                let bang = if *negated { "!" } else { "" };
                write!(f, "if-then({bang}{condition}, {then_branch})")
            }
            StructureNode::IfThenElse {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "if-then-else({condition}, {then_branch}, {else_branch})"),
            StructureNode::While {
                header,
                negated,
                body,
            } => {
                let bang = if *negated { "!" } else { "" };
                write!(f, "while({bang}{header}, {body})")
            }
            StructureNode::DoWhile {
                body,
                latch,
                negated,
            } => {
                let bang = if *negated { "!" } else { "" };
                write!(f, "do-while({body}, {bang}{latch})")
            }
            StructureNode::InfiniteLoop { body, .. } => write!(f, "loop({body})"),
            StructureNode::Switch {
                head,
                cases,
                default,
                ..
            } => {
                write!(f, "switch({head}")?;
                for case in cases {
                    let labels: Vec<String> = case.values.iter().map(u64::to_string).collect();
                    write!(f, ", case {}: {}", labels.join("|"), case.body)?;
                }
                if let Some(default) = default {
                    write!(f, ", default: {default}")?;
                }
                write!(f, ")")
            }
            StructureNode::Block(block) => write!(f, "{block}"),
            StructureNode::Break => write!(f, "break"),
            StructureNode::Continue => write!(f, "continue"),
            StructureNode::Goto(target) => write!(f, "goto {target}"),
        }
    }
}

/// Result of structure recovery for one function.
///
/// # Examples
///
/// ```rust
/// use irscope::analysis::{StructureNode, StructureTree};
/// use irscope::utils::graph::NodeId;
///
/// let tree = StructureTree::new(StructureNode::Sequence(vec![StructureNode::Block(NodeId::new(0))]));
/// assert_eq!(tree.to_string(), "sequence(n0)");
/// assert!(tree.is_fully_structured());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureTree {
    root: StructureNode,
    goto_targets: BTreeSet<NodeId>,
    unstructured: usize,
    diagnostics: Vec<Diagnostic>,
}

impl StructureTree {
    /// Wraps a root sequence; non-sequence roots are wrapped in one.
    #[must_use]
    pub fn new(root: StructureNode) -> Self {
        let root = match root {
            StructureNode::Sequence(_) => root,
            other => StructureNode::Sequence(vec![other]),
        };
        StructureTree {
            root,
            goto_targets: BTreeSet::new(),
            unstructured: 0,
            diagnostics: Vec::new(),
        }
    }

    pub(crate) fn with_fallbacks(
        mut self,
        goto_targets: BTreeSet<NodeId>,
        unstructured: usize,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        self.goto_targets = goto_targets;
        self.unstructured = unstructured;
        self.diagnostics = diagnostics;
        self
    }

    /// The root, always a [`StructureNode::Sequence`].
    #[must_use]
    pub fn root(&self) -> &StructureNode {
        &self.root
    }

    /// Blocks that need a label: targets of `Goto` nodes and regions only
    /// reachable through unstructured flow.
    #[must_use]
    pub fn goto_targets(&self) -> &BTreeSet<NodeId> {
        &self.goto_targets
    }

    /// Number of places recovery fell back to gotos.
    #[must_use]
    pub fn unstructured_count(&self) -> usize {
        self.unstructured
    }

    /// Returns `true` if no region needed a goto fallback.
    #[must_use]
    pub fn is_fully_structured(&self) -> bool {
        self.unstructured == 0
    }

    /// `Unstructured` diagnostics raised during recovery.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

impl fmt::Display for StructureTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}
