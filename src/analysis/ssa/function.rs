//! SSA function representation - a complete function in SSA form.
//!
//! # Structure
//!
//! ```text
//! SsaFunction
//! ├── blocks: Vec<SsaBlock>                  // 1:1 with CFG blocks
//! ├── definitions: SsaValue -> DefSite       // one entry per defined value
//! └── uses: SsaValue -> [UseSite]            // every read, phis included
//! ```
//!
//! `SsaFunction` is `Send` and `Sync` once constructed.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use crate::{
    analysis::ssa::{is_renamed, DefSite, SsaBlock, SsaValue, UseSite},
    ir::Varnode,
    utils::graph::NodeId,
};

/// A function in SSA form.
#[derive(Debug, Clone, Default)]
pub struct SsaFunction {
    blocks: Vec<SsaBlock>,
    definitions: BTreeMap<SsaValue, DefSite>,
    uses: BTreeMap<SsaValue, Vec<UseSite>>,
}

impl SsaFunction {
    /// Wraps renamed blocks and indexes their definitions and uses.
    pub(crate) fn new(blocks: Vec<SsaBlock>) -> Self {
        let mut function = Self {
            blocks,
            definitions: BTreeMap::new(),
            uses: BTreeMap::new(),
        };
        function.index();
        function
    }

    fn index(&mut self) {
        for (block_index, block) in self.blocks.iter().enumerate() {
            let block_id = NodeId::new(block_index);
            for (index, phi) in block.phis().iter().enumerate() {
                self.definitions.insert(
                    phi.result(),
                    DefSite::Phi {
                        block: block_id,
                        index,
                    },
                );
                for (operand, value) in phi.operands().iter().enumerate() {
                    self.uses.entry(value.value).or_default().push(UseSite::Phi {
                        block: block_id,
                        index,
                        operand,
                    });
                }
            }
            for (index, op) in block.ops().iter().enumerate() {
                if let Some(output) = op.output {
                    self.definitions.insert(
                        output,
                        DefSite::Op {
                            block: block_id,
                            index,
                        },
                    );
                }
                for input in op.inputs.iter().filter(|v| is_renamed(&v.varnode())) {
                    self.uses.entry(*input).or_default().push(UseSite::Op {
                        block: block_id,
                        index,
                    });
                }
            }
        }
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the block with the given id.
    #[must_use]
    pub fn block(&self, id: NodeId) -> Option<&SsaBlock> {
        self.blocks.get(id.index())
    }

    /// Iterates `(id, block)` pairs.
    pub fn blocks(&self) -> impl Iterator<Item = (NodeId, &SsaBlock)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (NodeId::new(i), block))
    }

    /// Where `value` is defined. Live-in values are defined at [`DefSite::Entry`].
    #[must_use]
    pub fn definition(&self, value: &SsaValue) -> Option<DefSite> {
        if value.is_live_in() {
            return Some(DefSite::Entry);
        }
        self.definitions.get(value).copied()
    }

    /// Every site reading `value`.
    #[must_use]
    pub fn uses(&self, value: &SsaValue) -> &[UseSite] {
        self.uses.get(value).map_or(&[], Vec::as_slice)
    }

    /// Values defined by a phi or an operation, in value order.
    pub fn defined_values(&self) -> impl Iterator<Item = SsaValue> + '_ {
        self.definitions.keys().copied()
    }

    /// Renamed varnodes read before any definition in the function.
    #[must_use]
    pub fn live_ins(&self) -> BTreeSet<Varnode> {
        self.uses
            .keys()
            .filter(|value| value.is_live_in() && is_renamed(&value.varnode()))
            .map(SsaValue::varnode)
            .collect()
    }

    /// Total number of phi nodes.
    #[must_use]
    pub fn phi_count(&self) -> usize {
        self.blocks.iter().map(|b| b.phis().len()).sum()
    }
}

impl fmt::Display for SsaFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, block) in self.blocks() {
            writeln!(f, "B{}:", id.index())?;
            write!(f, "{block}")?;
        }
        Ok(())
    }
}
