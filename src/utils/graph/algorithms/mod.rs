//! Graph algorithms for program analysis.
//!
//! ## Traversal
//!
//! - [`dfs`] - Depth-first search traversal
//! - [`postorder`] - Postorder traversal
//! - [`reverse_postorder`] - Reverse postorder traversal (forward dataflow order)
//!
//! ## Dominance
//!
//! - [`compute_dominators`] - Iterative dominator tree over reverse postorder
//! - [`compute_dominance_frontiers`] - Dominance frontiers for phi placement
//! - [`compute_post_dominators`] - Post-dominators through a virtual exit
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | DFS / postorder | O(V + E) | Traversal, ordering |
//! | Dominators | O((V + E) * passes) | SSA construction, loop analysis |
//! | Frontiers | O(V + E + sum of DF sizes) | Phi placement |
//! | Post-dominators | O((V + E) * passes) | Branch merge points |

mod dominators;
mod traversal;

pub use dominators::{
    compute_dominance_frontiers, compute_dominators, compute_post_dominators, DominatorIterator,
    DominatorTree, PostDominatorTree,
};
pub use traversal::{dfs, postorder, reverse_postorder, DfsIterator};
