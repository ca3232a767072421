//! Phi node representation for SSA form.
//!
//! A phi `v3 = MULTIEQUAL(v1, v2)` at the head of a block selects the operand
//! belonging to the edge control arrived through. Operand `i` always corresponds
//! to the `i`-th incoming edge of the block as reported by
//! [`crate::analysis::ControlFlowGraph::incoming_edges`]; parallel edges from
//! the same predecessor each get their own slot.
//!
//! Phi nodes are evaluated "instantaneously" at block entry, before any
//! operation executes.

use std::fmt;

use crate::{
    analysis::ssa::SsaValue,
    ir::Varnode,
    utils::graph::{EdgeId, NodeId},
};

/// An operand of a phi node - a value coming along one incoming edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhiOperand {
    /// The value providing the operand.
    pub value: SsaValue,
    /// Source block of the incoming edge.
    pub predecessor: NodeId,
    /// The incoming edge.
    pub edge: EdgeId,
}

impl fmt::Display for PhiOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from B{}", self.value, self.predecessor.index())
    }
}

/// A phi node that merges values at a control flow join point.
///
/// # Invariants
///
/// - One operand per incoming edge of the owning block, in edge order
/// - Every operand and the result share the phi's varnode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiNode {
    result: SsaValue,
    operands: Vec<PhiOperand>,
}

impl PhiNode {
    /// Creates a phi whose operands all start as live-in placeholders.
    pub(crate) fn new(varnode: Varnode, incoming: &[(EdgeId, NodeId)]) -> Self {
        Self {
            result: SsaValue::live_in(varnode),
            operands: incoming
                .iter()
                .map(|&(edge, predecessor)| PhiOperand {
                    value: SsaValue::live_in(varnode),
                    predecessor,
                    edge,
                })
                .collect(),
        }
    }

    /// The value this phi defines.
    #[must_use]
    pub const fn result(&self) -> SsaValue {
        self.result
    }

    /// The merged varnode.
    #[must_use]
    pub const fn varnode(&self) -> Varnode {
        self.result.varnode()
    }

    /// Operands in incoming edge order.
    #[must_use]
    pub fn operands(&self) -> &[PhiOperand] {
        &self.operands
    }

    /// The operand arriving from `predecessor`, if exactly one edge comes from it.
    #[must_use]
    pub fn operand_from(&self, predecessor: NodeId) -> Option<SsaValue> {
        let mut from = self.operands.iter().filter(|o| o.predecessor == predecessor);
        match (from.next(), from.next()) {
            (Some(operand), None) => Some(operand.value),
            _ => None,
        }
    }

    pub(crate) fn set_result(&mut self, result: SsaValue) {
        self.result = result;
    }

    pub(crate) fn set_operand(&mut self, slot: usize, value: SsaValue) {
        if let Some(operand) = self.operands.get_mut(slot) {
            operand.value = value;
        }
    }
}

impl fmt::Display for PhiNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = MULTIEQUAL ", self.result)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{operand}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phi_operands() {
        let r1 = Varnode::register(8, 8);
        let incoming = [
            (EdgeId::new(0), NodeId::new(1)),
            (EdgeId::new(3), NodeId::new(2)),
        ];
        let mut phi = PhiNode::new(r1, &incoming);
        phi.set_result(SsaValue::new(r1, 3));
        phi.set_operand(0, SsaValue::new(r1, 1));
        phi.set_operand(1, SsaValue::new(r1, 2));
        phi.set_operand(7, SsaValue::new(r1, 9));

        assert_eq!(phi.operands().len(), 2);
        assert_eq!(phi.operand_from(NodeId::new(2)), Some(SsaValue::new(r1, 2)));
        assert_eq!(phi.operand_from(NodeId::new(5)), None);
        assert_eq!(
            phi.to_string(),
            "(register, 0x8, 8)#3 = MULTIEQUAL (register, 0x8, 8)#1 from B1, (register, 0x8, 8)#2 from B2"
        );
    }
}
