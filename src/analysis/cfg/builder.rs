//! Partitioning of an [`IrProgram`] into basic blocks.
//!
//! Leaders are the first operation, the first operation of every resolvable
//! branch or jump table target, and the operation following any terminator or
//! call. Each block's successors come from its last operation:
//!
//! | last op | edges |
//! |---------|-------|
//! | `CBRANCH` | `ConditionalTrue` to the target, `ConditionalFalse` to the next block |
//! | `BRANCH` | `Unconditional` to the target |
//! | `BRANCHIND` with a jump table | one `Switch` edge per table entry |
//! | `BRANCHIND` without a table | `Unresolved` edges to every non-entry block |
//! | `CALL` / `CALLIND` | `CallReturn` to the next block |
//! | `RETURN` | none |
//! | anything else | `Fallthrough` to the next block |
//!
//! Targets outside the translated window mark the block with
//! [`Unresolved::OutOfWindow`] instead of adding an edge.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::{
    analysis::cfg::{BasicBlock, CfgEdge, CfgEdgeKind, ControlFlowGraph, Unresolved},
    ir::{IrProgram, OpCode, PcodeOp},
    utils::graph::{DirectedGraph, NodeId},
    Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics, Error, Result,
};

/// Known targets of indirect jumps, keyed by the address of the jumping instruction.
pub type JumpTables = BTreeMap<u64, Vec<u64>>;

/// Builds the control-flow graph of `program`.
///
/// Every operation in `program` is stamped with the id of its block. Indirect
/// jumps without a jump table and targets leaving the window are reported in
/// `diagnostics`.
///
/// # Errors
///
/// Returns [`Error::Empty`] for a program without operations, and
/// [`Error::MalformedOperation`] for a direct branch without a static target.
///
/// # Examples
///
/// ```rust
/// use irscope::{
///     analysis::{build_cfg, JumpTables},
///     ir::{IrProgram, OpCode, PcodeOp, Varnode},
///     Diagnostics,
/// };
///
/// let r0 = Varnode::register(0, 8);
/// let mut program = IrProgram::new();
/// program.add_instruction(0x1000, 4, vec![
///     PcodeOp::new(OpCode::CBranch, None, vec![Varnode::ram(0x1008, 8), Varnode::register(0x100, 1)], 0),
/// ])?;
/// program.add_instruction(0x1004, 4, vec![PcodeOp::new(OpCode::Copy, Some(r0), vec![Varnode::constant(1, 8)], 0)])?;
/// program.add_instruction(0x1008, 4, vec![PcodeOp::new(OpCode::Return, None, vec![], 0)])?;
///
/// let cfg = build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new())?;
/// assert_eq!(cfg.block_count(), 3);
/// assert_eq!(cfg.exits().len(), 1);
/// # Ok::<(), irscope::Error>(())
/// ```
pub fn build_cfg(
    program: &mut IrProgram,
    jump_tables: &JumpTables,
    diagnostics: &Diagnostics,
) -> Result<ControlFlowGraph> {
    if program.is_empty() {
        return Err(Error::Empty);
    }

    let leaders = find_leaders(program, jump_tables);
    let starts: Vec<usize> = leaders.into_iter().collect();
    let block_of_leader: BTreeMap<usize, NodeId> = starts
        .iter()
        .enumerate()
        .map(|(block, &start)| (start, NodeId::new(block)))
        .collect();

    // Stamp owning blocks before copying operations out
    let op_count = program.len();
    for (block, window) in block_ranges(&starts, op_count).enumerate() {
        for op in &mut program.ops_mut()[window] {
            op.block = Some(NodeId::new(block));
        }
    }

    let ops = program.ops();
    let mut graph: DirectedGraph<BasicBlock, CfgEdge> =
        DirectedGraph::with_capacity(starts.len(), starts.len() * 2);
    for window in block_ranges(&starts, op_count) {
        let block_ops: Vec<PcodeOp> = ops[window].to_vec();
        let start = block_ops.first().map_or(0, |op| op.address);
        let last = block_ops.last().map_or(start, |op| op.address);
        graph.add_node(BasicBlock {
            start,
            last,
            ops: block_ops,
            unresolved: None,
        });
    }

    let block_count = starts.len();
    let resolve = |address: u64| -> Option<NodeId> {
        target_index(program, address).and_then(|index| block_of_leader.get(&index).copied())
    };

    for block_index in 0..block_count {
        let node = NodeId::new(block_index);
        let Some(terminator) = graph.node(node).and_then(BasicBlock::terminator).cloned() else {
            continue;
        };
        let next = (block_index + 1 < block_count).then(|| NodeId::new(block_index + 1));
        let fall_address = program
            .next_address(terminator.address)
            .unwrap_or(terminator.address);

        let mut edges: Vec<CfgEdge> = Vec::new();
        let mut unresolved: Option<Unresolved> = None;

        match terminator.opcode {
            OpCode::CBranch => {
                let target = static_target(&terminator)?;
                match resolve(target) {
                    Some(taken) => edges.push(CfgEdge::new(taken, CfgEdgeKind::ConditionalTrue)),
                    None => unresolved = Some(Unresolved::OutOfWindow { target }),
                }
                match next {
                    Some(next) => edges.push(CfgEdge::new(next, CfgEdgeKind::ConditionalFalse)),
                    None => {
                        unresolved.get_or_insert(Unresolved::OutOfWindow {
                            target: fall_address,
                        });
                    }
                }
            }
            OpCode::Branch => {
                let target = static_target(&terminator)?;
                match resolve(target) {
                    Some(taken) => edges.push(CfgEdge::new(taken, CfgEdgeKind::Unconditional)),
                    None => unresolved = Some(Unresolved::OutOfWindow { target }),
                }
            }
            OpCode::BranchInd => match jump_tables.get(&terminator.address) {
                Some(table) if !table.is_empty() => {
                    for (case_value, &target) in (0u64..).zip(table.iter()) {
                        match resolve(target) {
                            Some(case) => edges.push(CfgEdge::new(
                                case,
                                CfgEdgeKind::Switch { case_value },
                            )),
                            None => unresolved = Some(Unresolved::OutOfWindow { target }),
                        }
                    }
                }
                _ => {
                    unresolved = Some(Unresolved::Indirect);
                    edges.extend(
                        (1..block_count)
                            .map(|target| CfgEdge::new(NodeId::new(target), CfgEdgeKind::Unresolved)),
                    );
                }
            },
            OpCode::Return => {}
            OpCode::Call | OpCode::CallInd => match next {
                Some(next) => edges.push(CfgEdge::new(next, CfgEdgeKind::CallReturn)),
                None => {
                    unresolved = Some(Unresolved::OutOfWindow {
                        target: fall_address,
                    });
                }
            },
            _ => match next {
                Some(next) => edges.push(CfgEdge::new(next, CfgEdgeKind::Fallthrough)),
                None => {
                    unresolved = Some(Unresolved::OutOfWindow {
                        target: fall_address,
                    });
                }
            },
        }

        if let Some(reason) = unresolved {
            report(diagnostics, &terminator, reason);
            if let Some(block) = graph.node_mut(node) {
                block.unresolved = Some(reason);
            }
        }

        for edge in edges {
            let target = edge.target();
            graph.add_edge(node, target, edge)?;
        }
    }

    debug!(
        "built CFG with {} blocks and {} edges from {} ops",
        graph.node_count(),
        graph.edge_count(),
        op_count
    );

    Ok(ControlFlowGraph::from_graph(graph, NodeId::new(0)))
}

fn find_leaders(program: &IrProgram, jump_tables: &JumpTables) -> BTreeSet<usize> {
    let ops = program.ops();
    let mut leaders = BTreeSet::new();
    leaders.insert(0);

    for (index, op) in ops.iter().enumerate() {
        if (op.is_terminator() || op.is_call()) && index + 1 < ops.len() {
            leaders.insert(index + 1);
        }

        match op.opcode {
            OpCode::Branch | OpCode::CBranch => {
                if let Some(target) = op.branch_target().and_then(|t| target_index(program, t)) {
                    leaders.insert(target);
                }
            }
            OpCode::BranchInd => {
                if let Some(table) = jump_tables.get(&op.address) {
                    leaders.extend(table.iter().filter_map(|&t| target_index(program, t)));
                }
            }
            _ => {}
        }
    }

    leaders
}

/// Operation index a branch to `address` lands on.
fn target_index(program: &IrProgram, address: u64) -> Option<usize> {
    if !program.is_instruction_start(address) {
        return None;
    }
    program.first_op_at_or_after(address)
}

fn block_ranges(starts: &[usize], op_count: usize) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
    starts.iter().enumerate().map(move |(i, &start)| {
        let end = starts.get(i + 1).copied().unwrap_or(op_count);
        start..end
    })
}

fn static_target(op: &PcodeOp) -> Result<u64> {
    op.branch_target().ok_or_else(|| {
        malformed_error!(
            "{} at 0x{:x} has no static target",
            op.opcode,
            op.address
        )
    })
}

fn report(diagnostics: &Diagnostics, terminator: &PcodeOp, reason: Unresolved) {
    match reason {
        Unresolved::Indirect => {
            warn!(
                "0x{:x}: indirect jump has no known targets",
                terminator.address
            );
            diagnostics.warning_at(
                DiagnosticCategory::UnresolvedControlFlow,
                "indirect jump has no known targets",
                terminator.address,
            );
        }
        Unresolved::OutOfWindow { target } => {
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticSeverity::Info,
                    DiagnosticCategory::UnresolvedControlFlow,
                    format!("control leaves the translated window towards 0x{target:x}"),
                )
                .with_address(terminator.address),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Varnode;

    fn op(opcode: OpCode, inputs: Vec<Varnode>) -> PcodeOp {
        PcodeOp::new(opcode, None, inputs, 0)
    }

    fn copy(dst: u64) -> PcodeOp {
        PcodeOp::new(
            OpCode::Copy,
            Some(Varnode::register(dst, 8)),
            vec![Varnode::constant(1, 8)],
            0,
        )
    }

    fn cond() -> Varnode {
        Varnode::register(0x100, 1)
    }

    fn build(instructions: Vec<(u64, Vec<PcodeOp>)>, tables: &JumpTables) -> (ControlFlowGraph, Diagnostics) {
        let mut program = IrProgram::new();
        for (address, ops) in instructions {
            program.add_instruction(address, 4, ops).unwrap();
        }
        let diagnostics = Diagnostics::new();
        let cfg = build_cfg(&mut program, tables, &diagnostics).unwrap();
        (cfg, diagnostics)
    }

    fn kinds(cfg: &ControlFlowGraph, node: usize) -> Vec<CfgEdgeKind> {
        cfg.outgoing_edges(NodeId::new(node))
            .map(|(_, _, edge)| *edge.kind())
            .collect()
    }

    #[test]
    fn test_empty_program() {
        let mut program = IrProgram::new();
        let result = build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new());
        assert!(matches!(result, Err(Error::Empty)));
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let (cfg, diagnostics) = build(
            vec![
                (0x1000, vec![copy(0)]),
                (0x1004, vec![copy(8)]),
                (0x1008, vec![op(OpCode::Return, vec![])]),
            ],
            &JumpTables::new(),
        );

        assert_eq!(cfg.block_count(), 1);
        let block = cfg.block(NodeId::new(0)).unwrap();
        assert_eq!((block.start, block.last), (0x1000, 0x1008));
        assert!(block.ops.iter().all(|op| op.block == Some(NodeId::new(0))));
        assert_eq!(cfg.exits(), &[NodeId::new(0)]);
        assert!(!diagnostics.has_any());
    }

    #[test]
    fn test_diamond() {
        let (cfg, _) = build(
            vec![
                (0x1000, vec![op(OpCode::CBranch, vec![Varnode::ram(0x100c, 8), cond()])]),
                (0x1004, vec![copy(0)]),
                (0x1008, vec![op(OpCode::Branch, vec![Varnode::ram(0x1010, 8)])]),
                (0x100c, vec![copy(8)]),
                (0x1010, vec![op(OpCode::Return, vec![])]),
            ],
            &JumpTables::new(),
        );

        assert_eq!(cfg.block_count(), 4);
        assert_eq!(
            kinds(&cfg, 0),
            vec![CfgEdgeKind::ConditionalTrue, CfgEdgeKind::ConditionalFalse]
        );
        assert_eq!(kinds(&cfg, 1), vec![CfgEdgeKind::Unconditional]);
        assert_eq!(kinds(&cfg, 2), vec![CfgEdgeKind::Fallthrough]);
        assert_eq!(cfg.idom(NodeId::new(3)), Some(NodeId::new(0)));
    }

    #[test]
    fn test_branch_to_empty_instruction() {
        // The target lowered to nothing; the branch lands on the next operation.
        let (cfg, _) = build(
            vec![
                (0x1000, vec![op(OpCode::CBranch, vec![Varnode::ram(0x1008, 8), cond()])]),
                (0x1004, vec![copy(0)]),
                (0x1008, vec![]),
                (0x100c, vec![op(OpCode::Return, vec![])]),
            ],
            &JumpTables::new(),
        );

        assert_eq!(cfg.block_count(), 3);
        let taken: Vec<_> = cfg.successors(NodeId::new(0)).collect();
        assert_eq!(taken, vec![NodeId::new(2), NodeId::new(1)]);
    }

    #[test]
    fn test_calls_end_blocks() {
        let (cfg, _) = build(
            vec![
                (0x1000, vec![op(OpCode::Call, vec![Varnode::ram(0x5000, 8)])]),
                (0x1004, vec![op(OpCode::Return, vec![])]),
            ],
            &JumpTables::new(),
        );

        assert_eq!(cfg.block_count(), 2);
        assert_eq!(kinds(&cfg, 0), vec![CfgEdgeKind::CallReturn]);
    }

    #[test]
    fn test_jump_table() {
        let mut tables = JumpTables::new();
        tables.insert(0x1000, vec![0x1004, 0x1008, 0x1004]);
        let (cfg, diagnostics) = build(
            vec![
                (0x1000, vec![op(OpCode::BranchInd, vec![Varnode::register(0, 8)])]),
                (0x1004, vec![op(OpCode::Return, vec![])]),
                (0x1008, vec![op(OpCode::Return, vec![])]),
            ],
            &tables,
        );

        assert_eq!(
            kinds(&cfg, 0),
            vec![
                CfgEdgeKind::Switch { case_value: 0 },
                CfgEdgeKind::Switch { case_value: 1 },
                CfgEdgeKind::Switch { case_value: 2 },
            ]
        );
        assert!(cfg.block(NodeId::new(0)).unwrap().unresolved.is_none());
        assert!(!diagnostics.has_any());
    }

    #[test]
    fn test_unresolved_indirect_jump() {
        let (cfg, diagnostics) = build(
            vec![
                (0x1000, vec![op(OpCode::BranchInd, vec![Varnode::register(0, 8)])]),
                (0x1004, vec![copy(0)]),
                (0x1008, vec![op(OpCode::Return, vec![])]),
            ],
            &JumpTables::new(),
        );

        let entry = cfg.block(NodeId::new(0)).unwrap();
        assert_eq!(entry.unresolved, Some(Unresolved::Indirect));
        assert!(entry.has_unknown_successor());
        assert_eq!(kinds(&cfg, 0), vec![CfgEdgeKind::Unresolved]);
        assert_eq!(cfg.structural_successors(NodeId::new(0)).count(), 0);
        assert_eq!(
            diagnostics
                .by_category(DiagnosticCategory::UnresolvedControlFlow)
                .len(),
            1
        );
        // The block after the jump is only reachable through the conservative edge
        assert!(cfg.dominators().is_reachable(NodeId::new(1)));
        assert!(cfg.exits().contains(&NodeId::new(0)));
    }

    #[test]
    fn test_out_of_window_targets() {
        let (cfg, diagnostics) = build(
            vec![
                (0x1000, vec![op(OpCode::CBranch, vec![Varnode::ram(0x9000, 8), cond()])]),
                (0x1004, vec![copy(0)]),
            ],
            &JumpTables::new(),
        );

        assert_eq!(
            cfg.block(NodeId::new(0)).unwrap().unresolved,
            Some(Unresolved::OutOfWindow { target: 0x9000 })
        );
        assert_eq!(kinds(&cfg, 0), vec![CfgEdgeKind::ConditionalFalse]);
        assert_eq!(
            cfg.block(NodeId::new(1)).unwrap().unresolved,
            Some(Unresolved::OutOfWindow { target: 0x1008 })
        );
        assert_eq!(diagnostics.count(), 2);
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_program_ops_are_stamped() {
        let mut program = IrProgram::new();
        program
            .add_instruction(0x1000, 4, vec![op(OpCode::Branch, vec![Varnode::ram(0x1008, 8)])])
            .unwrap();
        program.add_instruction(0x1004, 4, vec![copy(0)]).unwrap();
        program
            .add_instruction(0x1008, 4, vec![op(OpCode::Return, vec![])])
            .unwrap();

        build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new()).unwrap();
        let blocks: Vec<_> = program.ops().iter().map(|op| op.block).collect();
        assert_eq!(
            blocks,
            vec![Some(NodeId::new(0)), Some(NodeId::new(1)), Some(NodeId::new(2))]
        );
    }
}
