//! Control Flow Graph implementation.
//!
//! This module provides the main [`ControlFlowGraph`] structure that wraps basic blocks
//! with proper graph semantics and provides access to dominator trees, loops, and traversals.

use std::{collections::BTreeSet, fmt::Write, sync::OnceLock};

use crate::{
    analysis::cfg::{detect_loops_with, BasicBlock, CfgEdge, CfgEdgeKind, LoopForest},
    ir::OpCode,
    utils::{
        escape_dot,
        graph::{
            algorithms::{self, DfsIterator, DominatorTree, PostDominatorTree},
            DirectedGraph, EdgeId, GraphBase, NodeId, Predecessors, RootedGraph, Successors,
        },
    },
};

/// A control flow graph over basic blocks of IR operations.
///
/// Built by [`crate::analysis::build_cfg`]. The graph holds every edge, including
/// the conservative [`CfgEdgeKind::Unresolved`] edges of indirect jumps without
/// known targets; [`structural`](Self::structural) gives a view without them.
///
/// # Lazy Computation
///
/// Expensive analyses are computed lazily and cached:
///
/// - [`dominators`](Self::dominators) - Dominator tree over all edges
/// - [`dominance_frontiers`](Self::dominance_frontiers) - For SSA phi placement
/// - [`structural_dominators`](Self::structural_dominators) - Dominators over structural edges
/// - [`post_dominators`](Self::post_dominators) - Post-dominators over structural edges
/// - [`loops`](Self::loops) - Natural loops over structural edges
///
/// # Thread Safety
///
/// `ControlFlowGraph` is [`Send`] and [`Sync`]. Lazy-initialized fields use
/// [`OnceLock`] for thread-safe initialization.
#[derive(Debug)]
pub struct ControlFlowGraph {
    /// The underlying directed graph structure.
    graph: DirectedGraph<BasicBlock, CfgEdge>,
    /// Block holding the first operation.
    entry: NodeId,
    /// Blocks without structural successors.
    exits: Vec<NodeId>,
    /// Whether any edge is [`CfgEdgeKind::Unresolved`].
    has_unresolved: bool,
    dominators: OnceLock<DominatorTree>,
    dominance_frontiers: OnceLock<Vec<BTreeSet<NodeId>>>,
    structural_dominators: OnceLock<DominatorTree>,
    post_dominators: OnceLock<PostDominatorTree>,
    loops: OnceLock<LoopForest>,
}

impl ControlFlowGraph {
    pub(crate) fn from_graph(graph: DirectedGraph<BasicBlock, CfgEdge>, entry: NodeId) -> Self {
        let exits = graph
            .node_ids()
            .filter(|&node| {
                !graph
                    .outgoing_edges(node)
                    .any(|(_, edge)| edge.kind().is_structural())
            })
            .collect();
        let has_unresolved = graph.edges().any(|(_, edge)| !edge.kind().is_structural());

        Self {
            graph,
            entry,
            exits,
            has_unresolved,
            dominators: OnceLock::new(),
            dominance_frontiers: OnceLock::new(),
            structural_dominators: OnceLock::new(),
            post_dominators: OnceLock::new(),
            loops: OnceLock::new(),
        }
    }

    /// Returns the entry block.
    #[must_use]
    pub const fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the exit blocks: returns, blocks whose control leaves the
    /// translated window, and blocks ending in an unresolved indirect jump.
    #[must_use]
    pub fn exits(&self) -> &[NodeId] {
        &self.exits
    }

    /// Returns the number of basic blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the block with the given id.
    #[must_use]
    pub fn block(&self, node_id: NodeId) -> Option<&BasicBlock> {
        self.graph.node(node_id)
    }

    /// Iterates `(id, block)` pairs in address order.
    pub fn blocks(&self) -> impl Iterator<Item = (NodeId, &BasicBlock)> + '_ {
        self.graph.nodes()
    }

    /// Returns the block holding an operation of the instruction at `address`.
    #[must_use]
    pub fn block_at(&self, address: u64) -> Option<NodeId> {
        self.graph
            .nodes()
            .find(|(_, block)| block.ops.iter().any(|op| op.address == address))
            .map(|(id, _)| id)
    }

    /// Returns `true` if some block ends in an indirect jump without known targets.
    #[must_use]
    pub const fn has_unresolved(&self) -> bool {
        self.has_unresolved
    }

    /// Returns the dominator tree over all edges, computing it on first access.
    pub fn dominators(&self) -> &DominatorTree {
        self.dominators
            .get_or_init(|| algorithms::compute_dominators(self, self.entry))
    }

    /// Returns the dominance frontiers over all edges, computing them on first access.
    pub fn dominance_frontiers(&self) -> &[BTreeSet<NodeId>] {
        self.dominance_frontiers
            .get_or_init(|| algorithms::compute_dominance_frontiers(self, self.dominators()))
    }

    /// Returns the dominator tree over structural edges only.
    ///
    /// Identical to [`dominators`](Self::dominators) unless the graph has
    /// unresolved edges.
    pub fn structural_dominators(&self) -> &DominatorTree {
        if !self.has_unresolved {
            return self.dominators();
        }
        self.structural_dominators
            .get_or_init(|| algorithms::compute_dominators(&self.structural(), self.entry))
    }

    /// Returns the post-dominator tree over structural edges.
    pub fn post_dominators(&self) -> &PostDominatorTree {
        self.post_dominators.get_or_init(|| {
            algorithms::compute_post_dominators(&self.structural(), self.exits.iter().copied())
        })
    }

    /// Returns the natural loops over structural edges, computing them on first access.
    ///
    /// Only blocks ending in a `CBRANCH` count as loop tests.
    pub fn loops(&self) -> &LoopForest {
        self.loops.get_or_init(|| {
            detect_loops_with(&self.structural(), self.structural_dominators(), |node| {
                self.block(node)
                    .and_then(BasicBlock::terminator)
                    .is_some_and(|op| op.opcode == OpCode::CBranch)
            })
        })
    }

    /// Returns the successors of a block, once per outgoing edge.
    pub fn successors(&self, node_id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.successors(node_id)
    }

    /// Returns the predecessors of a block, once per incoming edge.
    pub fn predecessors(&self, node_id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.predecessors(node_id)
    }

    /// Returns the successors reached through statically known edges.
    pub fn structural_successors(&self, node_id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing_edges(node_id)
            .filter(|(_, _, edge)| edge.kind().is_structural())
            .map(|(_, target, _)| target)
    }

    /// Returns the predecessors reaching a block through statically known edges.
    pub fn structural_predecessors(&self, node_id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.incoming_edges(node_id)
            .filter(|(_, _, edge)| edge.kind().is_structural())
            .map(|(_, source, _)| source)
    }

    /// Returns the outgoing edges of a block as `(edge id, target, edge)`.
    pub fn outgoing_edges(
        &self,
        node_id: NodeId,
    ) -> impl Iterator<Item = (EdgeId, NodeId, &CfgEdge)> + '_ {
        self.graph
            .outgoing_edges(node_id)
            .map(|(edge_id, edge)| (edge_id, edge.target(), edge))
    }

    /// Returns the incoming edges of a block as `(edge id, source, edge)`.
    ///
    /// The order is stable and defines the operand order of phi operations.
    pub fn incoming_edges(
        &self,
        node_id: NodeId,
    ) -> impl Iterator<Item = (EdgeId, NodeId, &CfgEdge)> + '_ {
        self.graph.incoming_edges(node_id).map(move |(edge_id, edge)| {
            let source = self
                .graph
                .edge_endpoints(edge_id)
                .map_or(node_id, |(source, _)| source);
            (edge_id, source, edge)
        })
    }

    /// Returns a view that hides [`CfgEdgeKind::Unresolved`] edges.
    #[must_use]
    pub const fn structural(&self) -> StructuralView<'_> {
        StructuralView { cfg: self }
    }

    /// Returns blocks in reverse postorder from the entry.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<NodeId> {
        algorithms::reverse_postorder(self, self.entry)
    }

    /// Returns blocks in postorder from the entry.
    #[must_use]
    pub fn postorder(&self) -> Vec<NodeId> {
        algorithms::postorder(self, self.entry)
    }

    /// Returns a depth-first iterator from the entry.
    pub fn dfs(&self) -> DfsIterator<'_, Self> {
        algorithms::dfs(self, self.entry)
    }

    /// Returns the underlying graph.
    #[must_use]
    pub fn graph(&self) -> &DirectedGraph<BasicBlock, CfgEdge> {
        &self.graph
    }

    /// Returns an iterator over all block ids.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_ids()
    }

    /// Checks if `dominator` dominates `dominated` over all edges.
    #[must_use]
    pub fn dominates(&self, dominator: NodeId, dominated: NodeId) -> bool {
        self.dominators().dominates(dominator, dominated)
    }

    /// Returns the immediate dominator of a block.
    #[must_use]
    pub fn idom(&self, node_id: NodeId) -> Option<NodeId> {
        self.dominators().immediate_dominator(node_id)
    }

    /// Renders the graph in Graphviz DOT format, one operation per line.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();

        dot.push_str("digraph CFG {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"CFG: {}\";", escape_dot(name));
        }
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    edge [fontname=\"Courier\", fontsize=9];\n\n");

        for (node_id, block) in self.graph.nodes() {
            let is_entry = node_id == self.entry;
            let is_exit = self.exits.contains(&node_id);

            let node_name = node_name(node_id, block);
            let mut label = node_name.clone();
            if is_entry {
                label.push_str(" (entry)");
            }
            if is_exit {
                label.push_str(" (exit)");
            }
            if let Some(reason) = block.unresolved {
                let _ = write!(label, " [{reason}]");
            }
            label.push_str("\\l");

            for op in &block.ops {
                let _ = write!(label, "{:04X}: {}", op.address, escape_dot(&op.to_string()));
                label.push_str("\\l");
            }

            let style = if is_entry {
                ", style=filled, fillcolor=lightgreen"
            } else if is_exit {
                ", style=filled, fillcolor=lightcoral"
            } else {
                ""
            };

            let _ = writeln!(dot, "    {node_name} [label=\"{label}\"{style}];");
        }

        dot.push('\n');

        for (node_id, block) in self.graph.nodes() {
            let source_name = node_name(node_id, block);

            for (_, target, edge) in self.outgoing_edges(node_id) {
                let Some(target_block) = self.block(target) else {
                    continue;
                };
                let target_name = node_name(target, target_block);

                let edge_label = match edge.kind() {
                    CfgEdgeKind::Fallthrough | CfgEdgeKind::Unconditional => String::new(),
                    CfgEdgeKind::ConditionalTrue => "true".to_string(),
                    CfgEdgeKind::ConditionalFalse => "false".to_string(),
                    CfgEdgeKind::Switch { case_value } => format!("case {case_value}"),
                    CfgEdgeKind::CallReturn => "return".to_string(),
                    CfgEdgeKind::Unresolved => "?".to_string(),
                };

                let attributes = match edge.kind() {
                    CfgEdgeKind::ConditionalTrue => "color=green",
                    CfgEdgeKind::ConditionalFalse => "color=red",
                    CfgEdgeKind::Switch { .. } => "color=blue",
                    CfgEdgeKind::Unresolved => "color=gray, style=dashed",
                    _ => "color=black",
                };

                let _ = writeln!(
                    dot,
                    "    {source_name} -> {target_name} [label=\"{}\", {attributes}];",
                    escape_dot(&edge_label)
                );
            }
        }

        dot.push_str("}\n");
        dot
    }
}

fn node_name(node_id: NodeId, block: &BasicBlock) -> String {
    format!("B{}_{:04X}", node_id.index(), block.start)
}

impl GraphBase for ControlFlowGraph {
    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.graph.node_ids()
    }
}

impl Successors for ControlFlowGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.graph.successors(node)
    }
}

impl Predecessors for ControlFlowGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.graph.predecessors(node)
    }
}

impl RootedGraph for ControlFlowGraph {
    fn entry(&self) -> NodeId {
        self.entry
    }
}

/// The control flow graph without its [`CfgEdgeKind::Unresolved`] edges.
#[derive(Debug, Clone, Copy)]
pub struct StructuralView<'a> {
    cfg: &'a ControlFlowGraph,
}

impl GraphBase for StructuralView<'_> {
    fn node_count(&self) -> usize {
        self.cfg.block_count()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.cfg.block_count()).map(NodeId::new)
    }
}

impl Successors for StructuralView<'_> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.cfg.structural_successors(node)
    }
}

impl Predecessors for StructuralView<'_> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.cfg.structural_predecessors(node)
    }
}

impl RootedGraph for StructuralView<'_> {
    fn entry(&self) -> NodeId {
        self.cfg.entry
    }
}
