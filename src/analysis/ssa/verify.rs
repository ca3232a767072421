//! Structural checks of SSA form.
//!
//! [`verify`] re-derives the SSA invariants from the blocks alone rather than
//! trusting the indexes built by [`SsaFunction`]:
//!
//! - every renamed value has at most one definition, and generation 0 is never defined
//! - every use of a non-live-in value is dominated by its definition
//! - every phi has one operand per incoming edge, each dominated along its edge
//!
//! A use in a block unreachable from the entry must be defined in that same block.

use std::collections::BTreeMap;

use crate::{
    analysis::{
        cfg::ControlFlowGraph,
        ssa::{is_renamed, SsaFunction, SsaValue},
    },
    utils::graph::NodeId,
    Error, Result,
};

/// Position of a definition: block, then phi or op slot.
#[derive(Debug, Clone, Copy)]
struct Position {
    block: NodeId,
    phi: bool,
    index: usize,
}

impl Position {
    /// Returns `true` if `self` executes before `other` inside one block.
    fn precedes(&self, other: &Position) -> bool {
        match (self.phi, other.phi) {
            (true, false) => true,
            (false, true) => false,
            _ => self.index < other.index,
        }
    }
}

fn failure(message: String) -> Error {
    Error::SsaError(message)
}

/// Verifies `ssa` against the graph it was built from.
///
/// # Errors
///
/// Returns [`Error::SsaError`] naming the first violated property.
pub fn verify(ssa: &SsaFunction, cfg: &ControlFlowGraph) -> Result<()> {
    if ssa.block_count() != cfg.block_count() {
        return Err(failure(format!(
            "{} SSA blocks for {} CFG blocks",
            ssa.block_count(),
            cfg.block_count()
        )));
    }

    let definitions = collect_definitions(ssa)?;
    let dominators = cfg.dominators();

    let check_use = |value: &SsaValue, at: Position| -> Result<()> {
        if value.is_live_in() || !is_renamed(&value.varnode()) {
            return Ok(());
        }
        let Some(def) = definitions.get(value) else {
            return Err(failure(format!(
                "{value} used in B{} but never defined",
                at.block.index()
            )));
        };
        let dominated = if def.block == at.block {
            def.precedes(&at)
        } else {
            dominators.is_reachable(at.block) && dominators.dominates(def.block, at.block)
        };
        if dominated {
            Ok(())
        } else {
            Err(failure(format!(
                "definition of {value} in B{} does not dominate its use in B{}",
                def.block.index(),
                at.block.index()
            )))
        }
    };

    for (block_id, block) in ssa.blocks() {
        let incoming: Vec<NodeId> = cfg
            .incoming_edges(block_id)
            .map(|(_, source, _)| source)
            .collect();

        for phi in block.phis() {
            if phi.operands().len() != incoming.len() {
                return Err(failure(format!(
                    "phi {} in B{} has {} operands for {} incoming edges",
                    phi.result(),
                    block_id.index(),
                    phi.operands().len(),
                    incoming.len()
                )));
            }
            for (operand, &source) in phi.operands().iter().zip(&incoming) {
                if operand.predecessor != source {
                    return Err(failure(format!(
                        "phi {} in B{} lists B{} where the edge comes from B{}",
                        phi.result(),
                        block_id.index(),
                        operand.predecessor.index(),
                        source.index()
                    )));
                }
                if operand.value.varnode() != phi.varnode() {
                    return Err(failure(format!(
                        "phi {} merges foreign value {}",
                        phi.result(),
                        operand.value
                    )));
                }
                // The operand is read at the end of the predecessor
                check_use(
                    &operand.value,
                    Position {
                        block: source,
                        phi: false,
                        index: usize::MAX,
                    },
                )?;
            }
        }

        for (index, op) in block.ops().iter().enumerate() {
            for input in &op.inputs {
                check_use(
                    input,
                    Position {
                        block: block_id,
                        phi: false,
                        index,
                    },
                )?;
            }
        }
    }

    Ok(())
}

fn collect_definitions(ssa: &SsaFunction) -> Result<BTreeMap<SsaValue, Position>> {
    let mut definitions = BTreeMap::new();
    let mut define = |value: SsaValue, position: Position| -> Result<()> {
        if !is_renamed(&value.varnode()) {
            return Ok(());
        }
        if value.is_live_in() {
            return Err(failure(format!(
                "live-in value {value} redefined in B{}",
                position.block.index()
            )));
        }
        if definitions.insert(value, position).is_some() {
            return Err(failure(format!("{value} defined more than once")));
        }
        Ok(())
    };

    for (block_id, block) in ssa.blocks() {
        for (index, phi) in block.phis().iter().enumerate() {
            define(
                phi.result(),
                Position {
                    block: block_id,
                    phi: true,
                    index,
                },
            )?;
        }
        for (index, op) in block.ops().iter().enumerate() {
            if let Some(output) = op.output {
                define(
                    output,
                    Position {
                        block: block_id,
                        phi: false,
                        index,
                    },
                )?;
            }
        }
    }

    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{
            cfg::{build_cfg, JumpTables},
            ssa::{SsaBlock, SsaBuilder, SsaOp},
        },
        ir::{IrProgram, OpCode, Varnode},
        translate::{Generic, Instruction, Translator},
        Diagnostics,
    };

    fn cfg_of(listing: &[(u64, &str)]) -> ControlFlowGraph {
        let mut translator = Translator::new(Generic::default());
        let mut program = IrProgram::new();
        for &(address, text) in listing {
            let insn = Instruction::parse(address, 4, text).unwrap();
            program
                .add_instruction(address, 4, translator.translate(&insn).unwrap())
                .unwrap();
        }
        build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new()).unwrap()
    }

    #[test]
    fn test_built_ssa_verifies() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "bge r1, r2, 0x1010"),
            (0x1008, "add r1, r1, 1"),
            (0x100c, "jmp 0x1004"),
            (0x1010, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        verify(&ssa, &cfg).unwrap();
    }

    #[test]
    fn test_unresolved_jump_verifies() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 1"),
            (0x1004, "jmp r5"),
            (0x1008, "mov r1, 2"),
            (0x100c, "add r2, r1, r1"),
            (0x1010, "ret"),
        ]);
        assert!(cfg.has_unresolved());
        let ssa = SsaBuilder::build(&cfg).unwrap();
        verify(&ssa, &cfg).unwrap();
    }

    #[test]
    fn test_use_before_definition_fails() {
        let cfg = cfg_of(&[(0x1000, "mov r1, 0"), (0x1004, "ret")]);
        let r1 = Varnode::register(8, 8);
        let ops = vec![
            SsaOp {
                opcode: OpCode::Copy,
                output: Some(SsaValue::new(Varnode::register(16, 8), 1)),
                inputs: vec![SsaValue::new(r1, 1)],
                address: 0x1000,
                seq: 0,
            },
            SsaOp {
                opcode: OpCode::Copy,
                output: Some(SsaValue::new(r1, 1)),
                inputs: vec![SsaValue::live_in(Varnode::constant(0, 8))],
                address: 0x1000,
                seq: 1,
            },
            SsaOp {
                opcode: OpCode::Return,
                output: None,
                inputs: vec![],
                address: 0x1004,
                seq: 0,
            },
        ];
        let ssa = SsaFunction::new(vec![SsaBlock::new(ops)]);
        let err = verify(&ssa, &cfg).unwrap_err();
        assert!(matches!(err, Error::SsaError(_)));
    }

    #[test]
    fn test_double_definition_fails() {
        let cfg = cfg_of(&[(0x1000, "mov r1, 0"), (0x1004, "ret")]);
        let r1 = Varnode::register(8, 8);
        let copy = SsaOp {
            opcode: OpCode::Copy,
            output: Some(SsaValue::new(r1, 1)),
            inputs: vec![SsaValue::live_in(Varnode::constant(0, 8))],
            address: 0x1000,
            seq: 0,
        };
        let ssa = SsaFunction::new(vec![SsaBlock::new(vec![copy.clone(), copy])]);
        assert!(verify(&ssa, &cfg).is_err());
    }
}
