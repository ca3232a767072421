//! SSA basic blocks: phis followed by renamed operations.

use std::fmt;

use crate::analysis::ssa::{PhiNode, SsaOp};

/// One CFG block in SSA form. Block ids match the CFG's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsaBlock {
    phis: Vec<PhiNode>,
    ops: Vec<SsaOp>,
}

impl SsaBlock {
    pub(crate) fn new(ops: Vec<SsaOp>) -> Self {
        Self {
            phis: Vec::new(),
            ops,
        }
    }

    /// Phi nodes at the head of the block.
    #[must_use]
    pub fn phis(&self) -> &[PhiNode] {
        &self.phis
    }

    /// Operations in execution order.
    #[must_use]
    pub fn ops(&self) -> &[SsaOp] {
        &self.ops
    }

    /// The last operation.
    #[must_use]
    pub fn terminator(&self) -> Option<&SsaOp> {
        self.ops.last()
    }

    pub(crate) fn add_phi(&mut self, phi: PhiNode) {
        self.phis.push(phi);
    }

    pub(crate) fn phis_mut(&mut self) -> &mut [PhiNode] {
        &mut self.phis
    }

    pub(crate) fn ops_mut(&mut self) -> &mut [SsaOp] {
        &mut self.ops
    }

    pub(crate) fn insert_ops(&mut self, index: usize, ops: Vec<SsaOp>) {
        if !ops.is_empty() {
            self.ops.splice(index..index, ops);
        }
    }

    /// Inserts `ops` ahead of the block's control transfer, or at the end of a
    /// block that falls through.
    pub(crate) fn insert_before_terminator(&mut self, ops: Vec<SsaOp>) {
        let index = match self.ops.last() {
            Some(last) if last.opcode.is_terminator() => self.ops.len() - 1,
            _ => self.ops.len(),
        };
        self.insert_ops(index, ops);
    }
}

impl fmt::Display for SsaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for phi in &self.phis {
            writeln!(f, "  {phi}")?;
        }
        for op in &self.ops {
            writeln!(f, "  {op}")?;
        }
        Ok(())
    }
}
