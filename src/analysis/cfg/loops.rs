//! Natural loop detection and classification.
//!
//! # Loop Structure
//!
//! ```text
//!     [preheader]     <- Single entry predecessor (optional)
//!          |
//!          v
//!     [header] <------+  <- Single entry point, dominates all loop nodes
//!          |          |
//!          v          |
//!     [body ...]      |  <- Loop body nodes
//!          |          |
//!          v          |
//!     [latch] --------+  <- Back edge source(s)
//!          |
//!          v
//!     [exit ...]         <- Exit blocks (outside loop, have predecessor in loop)
//! ```
//!
//! # Loop Types
//!
//! Every loop is exactly one of:
//! - **While**: the header tests the exit condition (one successor inside, one outside)
//! - **Do-while**: a single latch tests the condition (one successor back to the
//!   header, one outside)
//! - **Infinite**: anything else; exits, if any, are explicit breaks
//!
//! [`detect_loops`] works on any graph implementing the graph traits and treats
//! every two-way block as a test. [`detect_loops_with`] takes a predicate naming
//! the blocks that end in a conditional branch, so a multi-way jump that happens
//! to have two targets is never mistaken for one. The CFG runs it on its
//! structural view so conservative edges of unresolved jumps never form loops.

use std::collections::{BTreeMap, BTreeSet};

use strum::Display;

use crate::utils::graph::{algorithms::DominatorTree, GraphBase, NodeId, Predecessors, Successors};

/// Classification of loop types based on where the exit test sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LoopType {
    /// Pre-tested loop: exit condition at the header.
    /// ```text
    /// while (cond) { body }
    /// ```
    While,

    /// Post-tested loop: exit condition at the single latch.
    /// ```text
    /// do { body } while (cond)
    /// ```
    DoWhile,

    /// No test at the header or latch.
    /// ```text
    /// for (;;) { body }
    /// ```
    Infinite,
}

/// Exit edge information for a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopExit {
    /// The block inside the loop that branches out.
    pub exiting_block: NodeId,
    /// The block outside the loop that is the exit target.
    pub exit_block: NodeId,
}

/// A natural loop: all back edges into one header.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// The header block (single entry point, dominates all loop nodes).
    pub header: NodeId,

    /// All blocks in the loop body (including header).
    pub body: BTreeSet<NodeId>,

    /// Back edge sources, in ascending order.
    pub latches: Vec<NodeId>,

    /// Single non-loop predecessor of the header, if there is exactly one.
    pub preheader: Option<NodeId>,

    /// Exit edges from the loop.
    pub exits: Vec<LoopExit>,

    /// Loop nesting depth (0 = outermost).
    pub depth: usize,

    /// Classification of the loop type.
    pub loop_type: LoopType,

    /// Parent loop header, if this loop is nested.
    pub parent: Option<NodeId>,

    /// Immediate child loop headers.
    pub children: Vec<NodeId>,
}

impl LoopInfo {
    /// Creates a new `LoopInfo` with the given header.
    #[must_use]
    pub fn new(header: NodeId) -> Self {
        let mut body = BTreeSet::new();
        body.insert(header);
        Self {
            header,
            body,
            latches: Vec::new(),
            preheader: None,
            exits: Vec::new(),
            depth: 0,
            loop_type: LoopType::Infinite,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Returns true if this loop contains the given block.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.body.contains(&node)
    }

    /// Returns the number of blocks in the loop.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Returns the single latch if there is exactly one.
    #[must_use]
    pub fn single_latch(&self) -> Option<NodeId> {
        match self.latches.as_slice() {
            [latch] => Some(*latch),
            _ => None,
        }
    }

    /// Returns all exit blocks, deduplicated and ordered.
    #[must_use]
    pub fn exit_blocks(&self) -> BTreeSet<NodeId> {
        self.exits.iter().map(|e| e.exit_block).collect()
    }

    /// Returns true if the header is also an exiting block.
    #[must_use]
    pub fn header_is_exiting(&self) -> bool {
        self.exits.iter().any(|e| e.exiting_block == self.header)
    }
}

/// Loop forest containing all loops in a function.
#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    /// All loops, ordered by header.
    loops: Vec<LoopInfo>,
    /// Map from block to the innermost loop containing it.
    block_to_loop: Vec<Option<usize>>,
}

impl LoopForest {
    fn new(block_count: usize) -> Self {
        Self {
            loops: Vec::new(),
            block_to_loop: vec![None; block_count],
        }
    }

    fn add_loop(&mut self, loop_info: LoopInfo) {
        let loop_idx = self.loops.len();

        for &block in &loop_info.body {
            let Some(slot) = self.block_to_loop.get_mut(block.index()) else {
                continue;
            };
            match *slot {
                Some(existing) if self.loops[existing].depth >= loop_info.depth => {}
                _ => *slot = Some(loop_idx),
            }
        }

        self.loops.push(loop_info);
    }

    /// Returns all loops in the forest.
    #[must_use]
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Returns the number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns true if there are no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Returns the innermost loop containing the given block.
    #[must_use]
    pub fn innermost_loop(&self, block: NodeId) -> Option<&LoopInfo> {
        self.block_to_loop
            .get(block.index())
            .copied()
            .flatten()
            .map(|idx| &self.loops[idx])
    }

    /// Returns the loop with the given header.
    #[must_use]
    pub fn loop_for_header(&self, header: NodeId) -> Option<&LoopInfo> {
        self.loops.iter().find(|l| l.header == header)
    }

    /// Returns the loop depth for a block (0 if not in any loop).
    #[must_use]
    pub fn loop_depth(&self, block: NodeId) -> usize {
        self.innermost_loop(block).map_or(0, |l| l.depth + 1)
    }

    /// Iterates over all loops in the forest.
    pub fn iter(&self) -> impl Iterator<Item = &LoopInfo> {
        self.loops.iter()
    }
}

/// Detects all natural loops in a graph using dominance-based back edge detection.
///
/// # Algorithm
///
/// 1. Finds back edges using dominance (n → h where h dominates n)
/// 2. For each back edge, walks predecessors backwards from the latch, stopping
///    at the header, to collect the body
/// 3. Computes preheaders, exits, and loop types
/// 4. Establishes nesting relationships
///
/// Back edges sharing a header form a single loop, so every back edge belongs to
/// exactly one classified loop.
///
/// # Examples
///
/// ```rust
/// use irscope::{
///     analysis::{detect_loops, LoopType},
///     utils::graph::{algorithms::compute_dominators, DirectedGraph},
/// };
///
/// let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
/// let entry = graph.add_node(());
/// let header = graph.add_node(());
/// let body = graph.add_node(());
/// let exit = graph.add_node(());
/// graph.add_edge(entry, header, ())?;
/// graph.add_edge(header, body, ())?;
/// graph.add_edge(header, exit, ())?;
/// graph.add_edge(body, header, ())?;
///
/// let forest = detect_loops(&graph, &compute_dominators(&graph, entry));
/// assert_eq!(forest.len(), 1);
/// assert_eq!(forest.loops()[0].loop_type, LoopType::While);
/// # Ok::<(), irscope::Error>(())
/// ```
#[must_use]
pub fn detect_loops<G>(graph: &G, dominators: &DominatorTree) -> LoopForest
where
    G: GraphBase + Successors + Predecessors,
{
    detect_loops_with(graph, dominators, |_| true)
}

/// Like [`detect_loops`], but a header or latch only tests the loop condition if
/// `is_conditional` holds for it.
#[must_use]
pub fn detect_loops_with<G, F>(graph: &G, dominators: &DominatorTree, is_conditional: F) -> LoopForest
where
    G: GraphBase + Successors + Predecessors,
    F: Fn(NodeId) -> bool,
{
    let mut forest = LoopForest::new(graph.node_count());
    let mut loops_by_header: BTreeMap<NodeId, LoopInfo> = BTreeMap::new();

    for node in graph.node_ids() {
        if !dominators.is_reachable(node) {
            continue;
        }
        for succ in graph.successors(node) {
            if dominators.dominates(succ, node) {
                let loop_info = loops_by_header
                    .entry(succ)
                    .or_insert_with(|| LoopInfo::new(succ));
                if !loop_info.latches.contains(&node) {
                    loop_info.latches.push(node);
                }
                expand_loop_body(graph, loop_info, node);
            }
        }
    }

    for loop_info in loops_by_header.values_mut() {
        compute_preheader(graph, loop_info);
        compute_exits(graph, loop_info);
        loop_info.loop_type = classify_loop(graph, loop_info, &is_conditional);
    }

    let mut loops: Vec<LoopInfo> = loops_by_header.into_values().collect();
    compute_nesting(&mut loops);

    for loop_info in loops {
        forest.add_loop(loop_info);
    }

    forest
}

fn expand_loop_body<G>(graph: &G, loop_info: &mut LoopInfo, latch: NodeId)
where
    G: Predecessors,
{
    let mut worklist = vec![latch];

    while let Some(node) = worklist.pop() {
        if node == loop_info.header || !loop_info.body.insert(node) {
            continue;
        }
        for pred in graph.predecessors(node) {
            if pred != loop_info.header && !loop_info.body.contains(&pred) {
                worklist.push(pred);
            }
        }
    }
}

fn compute_preheader<G>(graph: &G, loop_info: &mut LoopInfo)
where
    G: Predecessors,
{
    let outside: BTreeSet<NodeId> = graph
        .predecessors(loop_info.header)
        .filter(|pred| !loop_info.body.contains(pred))
        .collect();

    loop_info.preheader = match outside.len() {
        1 => outside.into_iter().next(),
        _ => None,
    };
}

fn compute_exits<G>(graph: &G, loop_info: &mut LoopInfo)
where
    G: Successors,
{
    loop_info.exits.clear();

    for &body_block in &loop_info.body {
        for succ in graph.successors(body_block) {
            if !loop_info.body.contains(&succ) {
                loop_info.exits.push(LoopExit {
                    exiting_block: body_block,
                    exit_block: succ,
                });
            }
        }
    }
}

/// Splits the successors of `node` into (inside the loop, outside the loop).
fn split_successors<G: Successors>(graph: &G, loop_info: &LoopInfo, node: NodeId) -> (usize, usize) {
    graph.successors(node).fold((0, 0), |(inside, outside), succ| {
        if loop_info.contains(succ) {
            (inside + 1, outside)
        } else {
            (inside, outside + 1)
        }
    })
}

fn classify_loop<G, F>(graph: &G, loop_info: &LoopInfo, is_conditional: &F) -> LoopType
where
    G: Successors,
    F: Fn(NodeId) -> bool,
{
    let header = loop_info.header;
    let latch = loop_info.single_latch();

    // A self loop tests at its only block; that is the latch test.
    if latch != Some(header)
        && is_conditional(header)
        && split_successors(graph, loop_info, header) == (1, 1)
    {
        return LoopType::While;
    }

    if let Some(latch) = latch {
        let back_to_header = graph.successors(latch).any(|s| s == header);
        if back_to_header
            && is_conditional(latch)
            && split_successors(graph, loop_info, latch) == (1, 1)
        {
            return LoopType::DoWhile;
        }
    }

    LoopType::Infinite
}

fn compute_nesting(loops: &mut [LoopInfo]) {
    let n = loops.len();
    let header_to_idx: BTreeMap<NodeId, usize> = loops
        .iter()
        .enumerate()
        .map(|(i, l)| (l.header, i))
        .collect();

    // Parent is the smallest other loop containing this loop's header
    for i in 0..n {
        let header = loops[i].header;
        loops[i].parent = (0..n)
            .filter(|&j| j != i && loops[j].body.contains(&header))
            .min_by_key(|&j| loops[j].size())
            .map(|j| loops[j].header);
    }

    for i in 0..n {
        if let Some(parent_idx) = loops[i].parent.and_then(|p| header_to_idx.get(&p).copied()) {
            let child = loops[i].header;
            loops[parent_idx].children.push(child);
        }
    }

    for i in 0..n {
        let mut depth = 0;
        let mut current = loops[i].parent;
        while let Some(parent_idx) = current.and_then(|p| header_to_idx.get(&p).copied()) {
            depth += 1;
            if depth > n {
                break;
            }
            current = loops[parent_idx].parent;
        }
        loops[i].depth = depth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::{algorithms::compute_dominators, DirectedGraph};

    fn graph(node_count: usize, edges: &[(usize, usize)]) -> DirectedGraph<(), ()> {
        let mut graph = DirectedGraph::new();
        for _ in 0..node_count {
            graph.add_node(());
        }
        for &(s, t) in edges {
            graph.add_edge(NodeId::new(s), NodeId::new(t), ()).unwrap();
        }
        graph
    }

    fn forest(node_count: usize, edges: &[(usize, usize)]) -> LoopForest {
        let graph = graph(node_count, edges);
        detect_loops(&graph, &compute_dominators(&graph, NodeId::new(0)))
    }

    #[test]
    fn test_while_loop() {
        // 0 -> 1 -> {2, 3}, 2 -> 1
        let forest = forest(4, &[(0, 1), (1, 2), (1, 3), (2, 1)]);
        assert_eq!(forest.len(), 1);

        let info = &forest.loops()[0];
        assert_eq!(info.header, NodeId::new(1));
        assert_eq!(info.latches, vec![NodeId::new(2)]);
        assert_eq!(info.preheader, Some(NodeId::new(0)));
        assert_eq!(info.loop_type, LoopType::While);
        assert!(info.header_is_exiting());
        assert_eq!(info.exit_blocks().into_iter().collect::<Vec<_>>(), vec![NodeId::new(3)]);
    }

    #[test]
    fn test_do_while_loop() {
        // 0 -> 1 -> 2 -> {1, 3}
        let forest = forest(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        assert_eq!(forest.loops()[0].loop_type, LoopType::DoWhile);
    }

    #[test]
    fn test_self_loop_is_do_while() {
        let forest = forest(3, &[(0, 1), (1, 1), (1, 2)]);
        let info = &forest.loops()[0];
        assert_eq!(info.size(), 1);
        assert_eq!(info.loop_type, LoopType::DoWhile);
    }

    #[test]
    fn test_multi_way_header_is_not_a_test() {
        // 0 -> 1 -> {2, 3}, 2 -> 1, with 1 ending in a jump table
        let graph = graph(4, &[(0, 1), (1, 2), (1, 3), (2, 1)]);
        let dominators = compute_dominators(&graph, NodeId::new(0));
        let forest = detect_loops_with(&graph, &dominators, |node| node != NodeId::new(1));
        assert_eq!(forest.loops()[0].loop_type, LoopType::Infinite);
    }

    #[test]
    fn test_infinite_loop() {
        // 0 -> 1 -> 2 -> 1, no exit at all
        let forest = forest(4, &[(0, 1), (1, 2), (2, 1)]);
        assert_eq!(forest.loops()[0].loop_type, LoopType::Infinite);

        // Exit from the middle of the body
        let forest = self::forest(5, &[(0, 1), (1, 2), (2, 3), (2, 4), (3, 1)]);
        assert_eq!(forest.loops()[0].loop_type, LoopType::Infinite);
    }

    #[test]
    fn test_nested_loops() {
        // outer: 1..4, inner: 2..3
        let forest = forest(
            6,
            &[(0, 1), (1, 2), (1, 5), (2, 3), (3, 2), (3, 4), (4, 1)],
        );
        assert_eq!(forest.len(), 2);

        let outer = forest.loop_for_header(NodeId::new(1)).unwrap();
        let inner = forest.loop_for_header(NodeId::new(2)).unwrap();
        assert_eq!(inner.parent, Some(NodeId::new(1)));
        assert_eq!(outer.children, vec![NodeId::new(2)]);
        assert_eq!(inner.depth, 1);
        assert_eq!(forest.loop_depth(NodeId::new(3)), 2);
        assert_eq!(forest.loop_depth(NodeId::new(4)), 1);
        assert_eq!(forest.loop_depth(NodeId::new(5)), 0);
        assert_eq!(inner.loop_type, LoopType::DoWhile);
        assert_eq!(outer.loop_type, LoopType::While);
    }

    #[test]
    fn test_multiple_latches_share_a_loop() {
        // 1 -> {2, 3}, both jump back to 1; 1 never exits
        let forest = forest(4, &[(0, 1), (1, 2), (1, 3), (2, 1), (3, 1)]);
        assert_eq!(forest.len(), 1);
        let info = &forest.loops()[0];
        assert_eq!(info.latches, vec![NodeId::new(2), NodeId::new(3)]);
        assert_eq!(info.loop_type, LoopType::Infinite);
    }
}
