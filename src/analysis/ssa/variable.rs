//! SSA values and their definition and use sites.

use std::fmt;

use crate::{
    ir::{AddressSpace, Varnode},
    utils::graph::NodeId,
};

/// A varnode paired with a generation.
///
/// Generation `0` is the implicit definition every varnode has on entry to the
/// function. Every other generation has exactly one defining phi or operation.
/// Constants and ram varnodes are never renamed and always carry generation `0`.
///
/// # Examples
///
/// ```rust
/// use irscope::{analysis::SsaValue, ir::Varnode};
///
/// let r1 = Varnode::register(8, 8);
/// let v = SsaValue::new(r1, 2);
/// assert_eq!(v.varnode(), r1);
/// assert!(!v.is_live_in());
/// assert!(SsaValue::live_in(r1).is_live_in());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SsaValue {
    varnode: Varnode,
    generation: u32,
}

impl SsaValue {
    /// Creates a value.
    #[must_use]
    pub const fn new(varnode: Varnode, generation: u32) -> Self {
        Self {
            varnode,
            generation,
        }
    }

    /// The entry definition of `varnode`.
    #[must_use]
    pub const fn live_in(varnode: Varnode) -> Self {
        Self::new(varnode, 0)
    }

    /// The storage this value lives in.
    #[must_use]
    pub const fn varnode(&self) -> Varnode {
        self.varnode
    }

    /// The generation; `0` for entry values and unrenamed varnodes.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Returns `true` for the implicit entry definition.
    #[must_use]
    pub const fn is_live_in(&self) -> bool {
        self.generation == 0
    }
}

impl fmt::Display for SsaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_renamed(&self.varnode) {
            write!(f, "{}#{}", self.varnode, self.generation)
        } else {
            write!(f, "{}", self.varnode)
        }
    }
}

/// Returns `true` for the spaces SSA renaming versions: registers, temporaries
/// and stack slots.
#[must_use]
pub fn is_renamed(varnode: &Varnode) -> bool {
    matches!(
        varnode.space(),
        AddressSpace::Register | AddressSpace::Unique | AddressSpace::Stack
    )
}

/// Where an SSA value is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefSite {
    /// Implicitly on function entry (generation `0`)
    Entry,
    /// By the phi at `index` of `block`
    Phi {
        /// Owning block
        block: NodeId,
        /// Position among the block's phis
        index: usize,
    },
    /// By the operation at `index` of `block`
    Op {
        /// Owning block
        block: NodeId,
        /// Position among the block's operations
        index: usize,
    },
}

impl DefSite {
    /// The defining block, `None` for entry values.
    #[must_use]
    pub const fn block(&self) -> Option<NodeId> {
        match self {
            DefSite::Entry => None,
            DefSite::Phi { block, .. } | DefSite::Op { block, .. } => Some(*block),
        }
    }

    /// Returns `true` if the value is defined by a phi.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        matches!(self, DefSite::Phi { .. })
    }
}

/// Where an SSA value is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseSite {
    /// Operand `operand` of the phi at `index` of `block`; the value flows along
    /// that operand's incoming edge.
    Phi {
        /// Block holding the phi
        block: NodeId,
        /// Position among the block's phis
        index: usize,
        /// Operand slot
        operand: usize,
    },
    /// An input of the operation at `index` of `block`
    Op {
        /// Owning block
        block: NodeId,
        /// Position among the block's operations
        index: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let r1 = Varnode::register(8, 8);
        assert_eq!(SsaValue::new(r1, 3).to_string(), "(register, 0x8, 8)#3");
        assert_eq!(
            SsaValue::live_in(Varnode::constant(5, 4)).to_string(),
            "(const, 0x5, 4)"
        );
    }

    #[test]
    fn test_renamed_spaces() {
        assert!(is_renamed(&Varnode::unique(0x10000, 8)));
        assert!(is_renamed(&Varnode::stack(-8, 8)));
        assert!(!is_renamed(&Varnode::ram(0x4000, 8)));
        assert!(!is_renamed(&Varnode::constant(0, 8)));
    }

    #[test]
    fn test_def_site_block() {
        assert_eq!(DefSite::Entry.block(), None);
        let site = DefSite::Phi {
            block: NodeId::new(2),
            index: 0,
        };
        assert_eq!(site.block(), Some(NodeId::new(2)));
        assert!(site.is_phi());
    }
}
