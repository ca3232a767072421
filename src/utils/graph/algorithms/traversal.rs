//! Graph traversal algorithms.
//!
//! - [`dfs`] - iterative depth-first search (pre-order), lazily evaluated
//! - [`postorder`] - depth-first post-order
//! - [`reverse_postorder`] - the iteration order for forward dataflow and for the
//!   dominator fixed point
//!
//! Post-order variants return collected vectors since the order requires a full
//! traversal anyway.

use crate::utils::graph::{NodeId, Successors};

/// Depth-first search iterator over graph nodes.
///
/// Visits each node reachable from the start exactly once, in pre-order. Successors
/// are explored in the order the graph yields them.
pub struct DfsIterator<'g, G: Successors> {
    graph: &'g G,
    stack: Vec<NodeId>,
    visited: Vec<bool>,
}

impl<'g, G: Successors> DfsIterator<'g, G> {
    fn new(graph: &'g G, start: NodeId) -> Self {
        let node_count = graph.node_count();
        if start.index() >= node_count {
            return DfsIterator {
                graph,
                stack: Vec::new(),
                visited: Vec::new(),
            };
        }

        let mut visited = vec![false; node_count];
        visited[start.index()] = true;

        DfsIterator {
            graph,
            stack: vec![start],
            visited,
        }
    }
}

impl<G: Successors> Iterator for DfsIterator<'_, G> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;

        // Reverse push so the first successor is visited first
        let successors: Vec<NodeId> = self.graph.successors(node).collect();
        for &succ in successors.iter().rev() {
            if !self.visited[succ.index()] {
                self.visited[succ.index()] = true;
                self.stack.push(succ);
            }
        }

        Some(node)
    }
}

/// Returns a depth-first search iterator starting from `start`.
///
/// Nodes not reachable from `start` are not visited. An out-of-range start yields
/// an empty iterator.
///
/// # Examples
///
/// ```rust
/// use irscope::utils::graph::{algorithms::dfs, DirectedGraph, NodeId};
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let a = graph.add_node("A");
/// let b = graph.add_node("B");
/// let _c = graph.add_node("C");
/// graph.add_edge(a, b, ())?;
///
/// let reachable: Vec<NodeId> = dfs(&graph, a).collect();
/// assert_eq!(reachable, vec![a, b]);
/// # Ok::<(), irscope::Error>(())
/// ```
pub fn dfs<G: Successors>(graph: &G, start: NodeId) -> DfsIterator<'_, G> {
    DfsIterator::new(graph, start)
}

/// Computes the post-order of nodes reachable from `start`.
///
/// A node is emitted after every node reachable through its not yet visited
/// successors. Runs iteratively, so deep graphs do not exhaust the call stack.
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut stack = vec![(start, State::Enter)];

    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(node),
        }
    }

    result
}

/// Computes the reverse post-order of nodes reachable from `start`.
///
/// In an acyclic region every node appears before all of its successors.
///
/// # Examples
///
/// ```rust
/// use irscope::utils::graph::{algorithms::reverse_postorder, DirectedGraph};
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let a = graph.add_node("A");
/// let b = graph.add_node("B");
/// let c = graph.add_node("C");
/// graph.add_edge(a, c, ())?;
/// graph.add_edge(c, b, ())?;
///
/// assert_eq!(reverse_postorder(&graph, a), vec![a, c, b]);
/// # Ok::<(), irscope::Error>(())
/// ```
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}
