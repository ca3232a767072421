//! Dominator trees, dominance frontiers and post-dominators.
//!
//! A node `d` **dominates** `n` if every path from the entry to `n` passes through
//! `d`. The **immediate dominator** of `n` is the closest strict dominator; making it
//! the parent of `n` yields the dominator tree rooted at the entry.
//!
//! # Algorithm
//!
//! Dominators are computed with the iterative scheme of Cooper, Harvey and Kennedy:
//! nodes are visited in reverse postorder and each node's immediate dominator is
//! the intersection of its already processed predecessors' dominator chains. The
//! pass repeats until nothing changes. Visiting order and predecessor order are
//! both fixed by the graph, so recomputing on an unchanged graph yields identical
//! results.
//!
//! Nodes not reachable from the entry have no immediate dominator and are neither
//! dominated by nor dominating any other node.
//!
//! Post-dominators run the same algorithm over the reversed graph, rooted at a
//! virtual exit node that precedes every real exit.

use std::collections::BTreeSet;

use crate::utils::graph::{
    algorithms::traversal::reverse_postorder, GraphBase, NodeId, Predecessors, Successors,
};

/// Result of dominator tree computation.
///
/// # Examples
///
/// ```rust
/// use irscope::utils::graph::{algorithms::compute_dominators, DirectedGraph};
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let entry = graph.add_node("entry");
/// let a = graph.add_node("a");
/// let b = graph.add_node("b");
/// graph.add_edge(entry, a, ())?;
/// graph.add_edge(a, b, ())?;
///
/// let dom_tree = compute_dominators(&graph, entry);
/// assert!(dom_tree.dominates(entry, b));
/// assert_eq!(dom_tree.immediate_dominator(b), Some(a));
/// assert_eq!(dom_tree.immediate_dominator(entry), None);
/// # Ok::<(), irscope::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DominatorTree {
    entry: NodeId,
    /// `None` for the entry and for unreachable nodes
    idom: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
}

impl DominatorTree {
    fn from_idoms(entry: NodeId, idom: Vec<Option<NodeId>>) -> Self {
        let mut children = vec![Vec::new(); idom.len()];
        for (index, parent) in idom.iter().enumerate() {
            if let Some(parent) = parent {
                children[parent.index()].push(NodeId::new(index));
            }
        }
        DominatorTree {
            entry,
            idom,
            children,
        }
    }

    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of a node.
    ///
    /// `None` for the entry node, for unreachable nodes and for out-of-range ids.
    #[inline]
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(node.index()).copied().flatten()
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        node == self.entry || self.immediate_dominator(node).is_some()
    }

    /// Checks if node `a` dominates node `b`.
    ///
    /// A reachable node dominates itself. Walks the dominator chain of `b`, so the
    /// cost is O(depth of `b`).
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        self.dominators(b).any(|d| d == a)
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Iterates the dominators of `node`, from the node itself up to the entry.
    ///
    /// Yields nothing for unreachable nodes.
    pub fn dominators(&self, node: NodeId) -> DominatorIterator<'_> {
        DominatorIterator {
            tree: self,
            current: self.is_reachable(node).then_some(node),
        }
    }

    /// Depth of a node in the dominator tree; the entry has depth 0.
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        self.dominators(node).count().saturating_sub(1)
    }

    /// Nodes whose immediate dominator is `node`, in ascending id order.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.children
            .get(node.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of nodes covered by the tree (reachable or not).
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }

    /// Nearest common dominator of `a` and `b`, if both are reachable.
    #[must_use]
    pub fn common_dominator(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let chain: BTreeSet<NodeId> = self.dominators(a).collect();
        self.dominators(b).find(|d| chain.contains(d))
    }
}

/// Iterator over dominators of a node, from the node up to the entry.
pub struct DominatorIterator<'a> {
    tree: &'a DominatorTree,
    current: Option<NodeId>,
}

impl Iterator for DominatorIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.immediate_dominator(current);
        Some(current)
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
///
/// # Complexity
///
/// O(V + E) per pass; reducible graphs converge in two passes.
///
/// # Examples
///
/// ```rust
/// use irscope::utils::graph::{algorithms::compute_dominators, DirectedGraph};
///
/// //      entry
/// //      /   \
/// //     a     b
/// //      \   /
/// //       exit
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let entry = graph.add_node("entry");
/// let a = graph.add_node("a");
/// let b = graph.add_node("b");
/// let exit = graph.add_node("exit");
/// graph.add_edge(entry, a, ())?;
/// graph.add_edge(entry, b, ())?;
/// graph.add_edge(a, exit, ())?;
/// graph.add_edge(b, exit, ())?;
///
/// let dom_tree = compute_dominators(&graph, entry);
/// assert_eq!(dom_tree.immediate_dominator(exit), Some(entry));
/// assert!(!dom_tree.dominates(a, exit));
/// # Ok::<(), irscope::Error>(())
/// ```
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors + Predecessors,
{
    let node_count = graph.node_count();
    if entry.index() >= node_count {
        return DominatorTree::from_idoms(entry, vec![None; node_count]);
    }

    let rpo = reverse_postorder(graph, entry);
    let mut rpo_number = vec![usize::MAX; node_count];
    for (position, node) in rpo.iter().enumerate() {
        rpo_number[node.index()] = position;
    }

    // The entry temporarily dominates itself so chains terminate during the fixpoint
    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];
    idom[entry.index()] = Some(entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for pred in graph.predecessors(node) {
                if idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, &rpo_number, pred, current),
                });
            }

            if new_idom != idom[node.index()] {
                idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    idom[entry.index()] = None;
    DominatorTree::from_idoms(entry, idom)
}

/// Walks two dominator chains upward until they meet.
fn intersect(
    idom: &[Option<NodeId>],
    rpo_number: &[usize],
    mut a: NodeId,
    mut b: NodeId,
) -> NodeId {
    while a != b {
        while rpo_number[a.index()] > rpo_number[b.index()] {
            match idom[a.index()] {
                Some(parent) if parent != a => a = parent,
                _ => return b,
            }
        }
        while rpo_number[b.index()] > rpo_number[a.index()] {
            match idom[b.index()] {
                Some(parent) if parent != b => b = parent,
                _ => return a,
            }
        }
    }
    a
}

/// Computes dominance frontiers for all nodes.
///
/// DF(B) is the set of nodes `Y` such that `B` dominates a predecessor of `Y` but
/// does not strictly dominate `Y`. Frontiers are ordered sets so phi placement is
/// deterministic.
///
/// # Examples
///
/// ```rust
/// use irscope::utils::graph::{
///     algorithms::{compute_dominance_frontiers, compute_dominators},
///     DirectedGraph,
/// };
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let entry = graph.add_node("entry");
/// let left = graph.add_node("left");
/// let right = graph.add_node("right");
/// let join = graph.add_node("join");
/// graph.add_edge(entry, left, ())?;
/// graph.add_edge(entry, right, ())?;
/// graph.add_edge(left, join, ())?;
/// graph.add_edge(right, join, ())?;
///
/// let dom_tree = compute_dominators(&graph, entry);
/// let frontiers = compute_dominance_frontiers(&graph, &dom_tree);
/// assert!(frontiers[left.index()].contains(&join));
/// assert!(frontiers[entry.index()].is_empty());
/// # Ok::<(), irscope::Error>(())
/// ```
pub fn compute_dominance_frontiers<G>(graph: &G, dom_tree: &DominatorTree) -> Vec<BTreeSet<NodeId>>
where
    G: Predecessors,
{
    let node_count = graph.node_count();
    let mut frontiers = vec![BTreeSet::new(); node_count];

    for node in graph.node_ids() {
        if !dom_tree.is_reachable(node) {
            continue;
        }
        let stop = dom_tree.immediate_dominator(node);

        for pred in graph.predecessors(node) {
            if !dom_tree.is_reachable(pred) {
                continue;
            }
            let mut runner = Some(pred);
            while let Some(current) = runner {
                if Some(current) == stop {
                    break;
                }
                frontiers[current.index()].insert(node);
                runner = dom_tree.immediate_dominator(current);
            }
        }
    }

    frontiers
}

/// Post-dominator tree, rooted at a virtual exit.
///
/// The virtual exit has id `node_count` of the analyzed graph and never appears in
/// query results: a node whose only post-dominator is the virtual exit has no
/// immediate post-dominator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDominatorTree {
    tree: DominatorTree,
}

impl PostDominatorTree {
    fn virtual_exit(&self) -> NodeId {
        self.tree.entry()
    }

    /// Closest real node that every path from `node` to an exit passes through.
    ///
    /// `None` when paths only meet at the function exit, or when `node` cannot
    /// reach any exit.
    #[must_use]
    pub fn immediate_post_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.tree
            .immediate_dominator(node)
            .filter(|&p| p != self.virtual_exit())
    }

    /// Checks if `a` post-dominates `b`.
    #[must_use]
    pub fn post_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != self.virtual_exit() && self.tree.dominates(a, b)
    }

    /// Returns `true` if `node` reaches some exit.
    #[must_use]
    pub fn reaches_exit(&self, node: NodeId) -> bool {
        node != self.virtual_exit() && self.tree.is_reachable(node)
    }
}

/// The reversed graph plus a virtual exit wired to every real exit.
struct ReversedWithExit<'g, G> {
    graph: &'g G,
    exits: Vec<NodeId>,
}

impl<G: GraphBase> GraphBase for ReversedWithExit<'_, G> {
    fn node_count(&self) -> usize {
        self.graph.node_count() + 1
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..=self.graph.node_count()).map(NodeId::new)
    }
}

impl<G: Predecessors> Successors for ReversedWithExit<'_, G> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        let list: Vec<NodeId> = if node.index() == self.graph.node_count() {
            self.exits.clone()
        } else {
            self.graph.predecessors(node).collect()
        };
        list.into_iter()
    }
}

impl<G: Successors> Predecessors for ReversedWithExit<'_, G> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        let virtual_exit = NodeId::new(self.graph.node_count());
        let mut list: Vec<NodeId> = if node == virtual_exit {
            Vec::new()
        } else {
            self.graph.successors(node).collect()
        };
        if self.exits.contains(&node) {
            list.push(virtual_exit);
        }
        list.into_iter()
    }
}

/// Computes post-dominators of `graph` with respect to the given exit nodes.
///
/// # Examples
///
/// ```rust
/// use irscope::utils::graph::{algorithms::compute_post_dominators, DirectedGraph};
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let cond = graph.add_node("cond");
/// let then = graph.add_node("then");
/// let join = graph.add_node("join");
/// graph.add_edge(cond, then, ())?;
/// graph.add_edge(cond, join, ())?;
/// graph.add_edge(then, join, ())?;
///
/// let pdom = compute_post_dominators(&graph, [join]);
/// assert_eq!(pdom.immediate_post_dominator(cond), Some(join));
/// assert_eq!(pdom.immediate_post_dominator(join), None);
/// # Ok::<(), irscope::Error>(())
/// ```
pub fn compute_post_dominators<G, I>(graph: &G, exits: I) -> PostDominatorTree
where
    G: Successors + Predecessors,
    I: IntoIterator<Item = NodeId>,
{
    let reversed = ReversedWithExit {
        graph,
        exits: exits.into_iter().collect(),
    };
    let virtual_exit = NodeId::new(graph.node_count());
    PostDominatorTree {
        tree: compute_dominators(&reversed, virtual_exit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::DirectedGraph;

    fn build(node_count: usize, edges: &[(usize, usize)]) -> DirectedGraph<usize, ()> {
        let mut graph = DirectedGraph::new();
        for i in 0..node_count {
            graph.add_node(i);
        }
        for &(s, t) in edges {
            graph.add_edge(NodeId::new(s), NodeId::new(t), ()).unwrap();
        }
        graph
    }

    fn n(i: usize) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn test_linear_chain() {
        let graph = build(3, &[(0, 1), (1, 2)]);
        let tree = compute_dominators(&graph, n(0));

        assert_eq!(tree.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(tree.immediate_dominator(n(2)), Some(n(1)));
        assert_eq!(tree.depth(n(2)), 2);
        assert_eq!(tree.dominators(n(2)).collect::<Vec<_>>(), vec![n(2), n(1), n(0)]);
    }

    #[test]
    fn test_diamond() {
        let graph = build(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let tree = compute_dominators(&graph, n(0));

        assert_eq!(tree.immediate_dominator(n(3)), Some(n(0)));
        assert_eq!(tree.children(n(0)), &[n(1), n(2), n(3)]);
        assert!(!tree.dominates(n(1), n(3)));
        assert!(tree.strictly_dominates(n(0), n(3)));
        assert_eq!(tree.common_dominator(n(1), n(2)), Some(n(0)));
    }

    #[test]
    fn test_loop() {
        // 0 -> 1 -> 2 -> 1, 1 -> 3
        let graph = build(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let tree = compute_dominators(&graph, n(0));

        assert_eq!(tree.immediate_dominator(n(2)), Some(n(1)));
        assert_eq!(tree.immediate_dominator(n(3)), Some(n(1)));
        assert!(tree.dominates(n(1), n(2)));
    }

    #[test]
    fn test_irreducible() {
        // 0 -> 1, 0 -> 2, 1 <-> 2
        let graph = build(3, &[(0, 1), (0, 2), (1, 2), (2, 1)]);
        let tree = compute_dominators(&graph, n(0));

        assert_eq!(tree.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(tree.immediate_dominator(n(2)), Some(n(0)));
    }

    #[test]
    fn test_unreachable_node() {
        let graph = build(3, &[(0, 1), (2, 1)]);
        let tree = compute_dominators(&graph, n(0));

        assert!(!tree.is_reachable(n(2)));
        assert_eq!(tree.immediate_dominator(n(1)), Some(n(0)));
        assert!(!tree.dominates(n(2), n(1)));
        assert!(!tree.dominates(n(0), n(2)));
        assert_eq!(tree.dominators(n(2)).count(), 0);
    }

    #[test]
    fn test_recompute_is_identical() {
        let graph = build(6, &[(0, 1), (1, 2), (2, 3), (3, 1), (1, 4), (4, 5), (2, 5)]);
        let first = compute_dominators(&graph, n(0));
        let second = compute_dominators(&graph, n(0));
        assert_eq!(first, second);
    }

    #[test]
    fn test_frontiers_loop() {
        let graph = build(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let tree = compute_dominators(&graph, n(0));
        let df = compute_dominance_frontiers(&graph, &tree);

        assert!(df[2].contains(&n(1)));
        assert!(df[1].contains(&n(1)));
        assert!(df[0].is_empty());
        assert!(df[3].is_empty());
    }

    #[test]
    fn test_frontiers_loop_to_entry() {
        let graph = build(2, &[(0, 1), (1, 0)]);
        let tree = compute_dominators(&graph, n(0));
        let df = compute_dominance_frontiers(&graph, &tree);

        assert!(df[1].contains(&n(0)));
        assert!(df[0].contains(&n(0)));
    }

    #[test]
    fn test_post_dominators_diamond() {
        let graph = build(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let pdom = compute_post_dominators(&graph, [n(3)]);

        assert_eq!(pdom.immediate_post_dominator(n(0)), Some(n(3)));
        assert_eq!(pdom.immediate_post_dominator(n(1)), Some(n(3)));
        assert!(pdom.post_dominates(n(3), n(0)));
        assert!(!pdom.post_dominates(n(1), n(0)));
    }

    #[test]
    fn test_post_dominators_two_exits() {
        // 0 -> 1 (exit), 0 -> 2 (exit)
        let graph = build(3, &[(0, 1), (0, 2)]);
        let pdom = compute_post_dominators(&graph, [n(1), n(2)]);

        assert_eq!(pdom.immediate_post_dominator(n(0)), None);
        assert!(pdom.reaches_exit(n(0)));
    }

    #[test]
    fn test_post_dominators_infinite_loop() {
        // 0 -> 1 -> 1, no exit reachable from 1
        let graph = build(3, &[(0, 1), (1, 1), (0, 2)]);
        let pdom = compute_post_dominators(&graph, [n(2)]);

        assert!(!pdom.reaches_exit(n(1)));
        assert_eq!(pdom.immediate_post_dominator(n(0)), Some(n(2)));
    }
}
