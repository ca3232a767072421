//! SSA construction algorithm (Cytron et al.).
//!
//! This module implements the classic SSA construction algorithm from:
//!
//! > Cytron et al., "Efficiently Computing Static Single Assignment Form and the
//! > Control Dependence Graph", ACM TOPLAS 1991
//!
//! # Algorithm Overview
//!
//! 1. **Phi Placement**: Every varnode assigned in more than one block gets phis
//!    on the iterated dominance frontier of its defining blocks, with the entry
//!    block counting as a definition (the live-in value). A varnode assigned in a
//!    single block gets phis only if some block reads it, or a varnode overlapping
//!    it, before writing it.
//! 2. **Renaming**: A walk of the dominator tree keeps a stack of generations per
//!    varnode. Each definition pushes a fresh generation, each use reads the top of
//!    its stack, successor phis receive the top along the connecting edge, and the
//!    pushes are popped when the walk leaves the block's subtree.
//!
//! Register views overlap: `eax` lies inside `rax`, `r1d` inside `r1`. Writes to a
//! view are merged into the full register by the translator, so the widest
//! varnode always holds the latest bytes. When a varnode containing the one being
//! read was defined more recently than the read varnode itself, renaming inserts a
//! `SUBPIECE` of the container and the read takes that value instead.
//!
//! Blocks unreachable from the entry have no place in the dominator tree; each one
//! is renamed as a root of its own, with only live-in values visible.
//!
//! Dominance and frontiers come from the graph with all edges, so the conservative
//! edges of unresolved indirect jumps receive phi operands like any other edge.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::{
    analysis::{
        cfg::ControlFlowGraph,
        ssa::{is_renamed, PhiNode, SsaBlock, SsaFunction, SsaOp, SsaValue},
    },
    ir::{AddressSpace, OpCode, Varnode},
    utils::graph::{EdgeId, NodeId},
    Error, Result,
};

/// Generation stacks used during renaming.
///
/// Each pushed generation carries a stamp from a running clock. Phis of one
/// block share a stamp; any other definition takes a fresh one.
#[derive(Debug, Default)]
struct Versions {
    stacks: HashMap<Varnode, Vec<(u32, u64)>>,
    next: HashMap<Varnode, u32>,
    clock: u64,
}

impl Versions {
    fn top(&self, varnode: Varnode) -> (u32, u64) {
        self.stacks
            .get(&varnode)
            .and_then(|stack| stack.last())
            .copied()
            .unwrap_or((0, 0))
    }

    fn current(&self, varnode: Varnode) -> SsaValue {
        SsaValue::new(varnode, self.top(varnode).0)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn define(&mut self, varnode: Varnode) -> SsaValue {
        let stamp = self.tick();
        self.define_at(varnode, stamp)
    }

    fn define_at(&mut self, varnode: Varnode, stamp: u64) -> SsaValue {
        let next = self.next.entry(varnode).or_insert(1);
        let generation = *next;
        *next += 1;
        self.stacks
            .entry(varnode)
            .or_default()
            .push((generation, stamp));
        SsaValue::new(varnode, generation)
    }

    fn pop(&mut self, varnode: Varnode) {
        if let Some(stack) = self.stacks.get_mut(&varnode) {
            stack.pop();
        }
    }

    /// The container of `varnode` written most recently, if it was written
    /// after `varnode` itself.
    fn fresher_container(&self, varnode: Varnode, containers: &[Varnode]) -> Option<Varnode> {
        let own = self.top(varnode).1;
        containers
            .iter()
            .map(|&container| (self.top(container).1, container))
            .filter(|&(stamp, _)| stamp > own)
            .max_by_key(|&(stamp, _)| stamp)
            .map(|(_, container)| container)
    }

    /// Reads `varnode`. When a container holds newer bytes, returns the
    /// `SUBPIECE` defining a fresh generation from it alongside the value.
    fn read(
        &mut self,
        varnode: Varnode,
        containers: &HashMap<Varnode, Vec<Varnode>>,
        at: (u64, u32),
    ) -> (SsaValue, Option<SsaOp>) {
        let fresher = containers
            .get(&varnode)
            .and_then(|list| self.fresher_container(varnode, list));
        let Some(container) = fresher else {
            return (self.current(varnode), None);
        };

        let source = self.current(container);
        let value = self.define(varnode);
        let offset = varnode.offset() - container.offset();
        let extract = SsaOp {
            opcode: OpCode::SubPiece,
            output: Some(value),
            inputs: vec![source, SsaValue::live_in(Varnode::constant(offset, 4))],
            address: at.0,
            seq: at.1,
        };
        (value, Some(extract))
    }
}

enum Visit {
    Enter(NodeId),
    Exit(Vec<Varnode>),
}

/// Builder for constructing SSA form from a control flow graph.
///
/// # Examples
///
/// ```rust
/// use irscope::{
///     analysis::{build_cfg, JumpTables, SsaBuilder},
///     translate::{Generic, Instruction, Translator},
///     ir::IrProgram,
///     Diagnostics,
/// };
///
/// let mut translator = Translator::new(Generic::default());
/// let mut program = IrProgram::new();
/// let listing = [
///     (0x1000, "mov r1, 0"),
///     (0x1004, "bge r1, r2, 0x1010"),
///     (0x1008, "add r1, r1, 1"),
///     (0x100c, "jmp 0x1004"),
///     (0x1010, "ret"),
/// ];
/// for (address, text) in listing {
///     let insn = Instruction::parse(address, 4, text)?;
///     program.add_instruction(address, 4, translator.translate(&insn)?)?;
/// }
///
/// let cfg = build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new())?;
/// let ssa = SsaBuilder::build(&cfg)?;
/// assert_eq!(ssa.phi_count(), 1);
/// # Ok::<(), irscope::Error>(())
/// ```
#[derive(Debug)]
pub struct SsaBuilder<'a> {
    cfg: &'a ControlFlowGraph,
    blocks: Vec<SsaBlock>,
    versions: Versions,
    /// Position of every edge among its target's incoming edges.
    edge_slots: HashMap<EdgeId, usize>,
    /// Varnodes of the function strictly containing each varnode.
    containers: HashMap<Varnode, Vec<Varnode>>,
}

impl<'a> SsaBuilder<'a> {
    /// Builds SSA form for `cfg`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] for a graph without blocks.
    pub fn build(cfg: &'a ControlFlowGraph) -> Result<SsaFunction> {
        if cfg.block_count() == 0 {
            return Err(Error::Empty);
        }

        let mut builder = Self::new(cfg);
        builder.place_phis();
        builder.rename();

        let function = SsaFunction::new(builder.blocks);
        debug!(
            "built SSA for {} blocks: {} phis, {} values",
            function.block_count(),
            function.phi_count(),
            function.defined_values().count()
        );
        Ok(function)
    }

    fn new(cfg: &'a ControlFlowGraph) -> Self {
        let blocks = cfg
            .blocks()
            .map(|(_, block)| {
                SsaBlock::new(
                    block
                        .ops
                        .iter()
                        .map(|op| SsaOp {
                            opcode: op.opcode,
                            output: op.output.map(SsaValue::live_in),
                            inputs: op.inputs.iter().copied().map(SsaValue::live_in).collect(),
                            address: op.address,
                            seq: op.seq,
                        })
                        .collect(),
                )
            })
            .collect();

        let mut edge_slots = HashMap::new();
        for node in cfg.node_ids() {
            for (slot, (edge, _, _)) in cfg.incoming_edges(node).enumerate() {
                edge_slots.insert(edge, slot);
            }
        }

        Self {
            cfg,
            blocks,
            versions: Versions::default(),
            edge_slots,
            containers: containers(cfg),
        }
    }

    /// Varnodes read in some block before that block writes them, together with
    /// the written varnodes overlapping them, and the blocks writing each varnode.
    fn collect_definitions(&self) -> (BTreeSet<Varnode>, BTreeMap<Varnode, BTreeSet<NodeId>>) {
        let mut globals = BTreeSet::new();
        let mut def_blocks: BTreeMap<Varnode, BTreeSet<NodeId>> = BTreeMap::new();

        for (node, block) in self.cfg.blocks() {
            let mut killed = BTreeSet::new();
            for op in &block.ops {
                for input in op.inputs.iter().filter(|v| is_renamed(v)) {
                    if !killed.contains(input) {
                        globals.insert(*input);
                    }
                }
                if let Some(output) = op.output.filter(is_renamed) {
                    killed.insert(output);
                    def_blocks.entry(output).or_default().insert(node);
                }
            }
        }

        let aliased: Vec<Varnode> = def_blocks
            .keys()
            .filter(|written| !written.is_unique() && !globals.contains(*written))
            .filter(|written| globals.iter().any(|read| read.overlaps(written)))
            .copied()
            .collect();
        globals.extend(aliased);

        (globals, def_blocks)
    }

    fn place_phis(&mut self) {
        let cfg = self.cfg;
        let frontiers = cfg.dominance_frontiers();
        let (globals, def_blocks) = self.collect_definitions();

        for (varnode, defs) in def_blocks {
            if defs.len() < 2 && !globals.contains(&varnode) {
                continue;
            }

            let mut worklist: Vec<NodeId> = defs.iter().copied().collect();
            worklist.push(cfg.entry());
            let mut phi_blocks: BTreeSet<NodeId> = BTreeSet::new();

            while let Some(block) = worklist.pop() {
                let Some(frontier) = frontiers.get(block.index()) else {
                    continue;
                };
                for &join in frontier {
                    if phi_blocks.insert(join) {
                        worklist.push(join);
                    }
                }
            }

            for block in phi_blocks {
                let incoming: Vec<(EdgeId, NodeId)> = cfg
                    .incoming_edges(block)
                    .map(|(edge, source, _)| (edge, source))
                    .collect();
                if let Some(ssa_block) = self.blocks.get_mut(block.index()) {
                    ssa_block.add_phi(PhiNode::new(varnode, &incoming));
                }
            }
        }
    }

    fn rename(&mut self) {
        let cfg = self.cfg;
        let dominators = cfg.dominators();

        let roots = std::iter::once(cfg.entry())
            .chain(cfg.node_ids().filter(|&node| !dominators.is_reachable(node)));

        for root in roots {
            let mut work = vec![Visit::Enter(root)];
            while let Some(visit) = work.pop() {
                match visit {
                    Visit::Enter(block) => {
                        let pushed = self.rename_block(block);
                        work.push(Visit::Exit(pushed));
                        for &child in dominators.children(block).iter().rev() {
                            work.push(Visit::Enter(child));
                        }
                    }
                    Visit::Exit(pushed) => {
                        for varnode in pushed {
                            self.versions.pop(varnode);
                        }
                    }
                }
            }
        }
    }

    /// Renames one block and fills its successors' phi operands. Returns the
    /// varnodes whose stacks were pushed.
    fn rename_block(&mut self, block: NodeId) -> Vec<Varnode> {
        let mut pushed = Vec::new();
        let cfg = self.cfg;
        let Self {
            blocks,
            versions,
            edge_slots,
            containers,
            ..
        } = self;
        let Some(ssa_block) = blocks.get_mut(block.index()) else {
            return pushed;
        };

        let stamp = versions.tick();
        for phi in ssa_block.phis_mut() {
            let varnode = phi.varnode();
            phi.set_result(versions.define_at(varnode, stamp));
            pushed.push(varnode);
        }

        let mut index = 0;
        while index < ssa_block.ops().len() {
            let mut extracts = Vec::new();
            let op = &mut ssa_block.ops_mut()[index];
            let at = (op.address, op.seq);
            for input in &mut op.inputs {
                let varnode = input.varnode();
                if !is_renamed(&varnode) {
                    continue;
                }
                let (value, extract) = versions.read(varnode, containers, at);
                if let Some(extract) = extract {
                    extracts.push(extract);
                    pushed.push(varnode);
                }
                *input = value;
            }
            if let Some(output) = &mut op.output {
                let varnode = output.varnode();
                if is_renamed(&varnode) {
                    *output = versions.define(varnode);
                    pushed.push(varnode);
                }
            }
            let inserted = extracts.len();
            ssa_block.insert_ops(index, extracts);
            index += inserted + 1;
        }

        for (edge, successor, _) in cfg.outgoing_edges(block) {
            let Some(&slot) = edge_slots.get(&edge) else {
                continue;
            };
            let Some(phi_varnodes) = blocks
                .get(successor.index())
                .map(|b| b.phis().iter().map(PhiNode::varnode).collect::<Vec<_>>())
            else {
                continue;
            };

            let mut operands = Vec::with_capacity(phi_varnodes.len());
            let mut extracts = Vec::new();
            for varnode in phi_varnodes {
                let at = blocks
                    .get(block.index())
                    .and_then(SsaBlock::terminator)
                    .map_or((0, 0), |op| (op.address, op.seq));
                let (value, extract) = versions.read(varnode, containers, at);
                if let Some(extract) = extract {
                    extracts.push(extract);
                    pushed.push(varnode);
                }
                operands.push(value);
            }
            if let Some(current) = blocks.get_mut(block.index()) {
                current.insert_before_terminator(extracts);
            }
            if let Some(successor_block) = blocks.get_mut(successor.index()) {
                for (phi, value) in successor_block.phis_mut().iter_mut().zip(operands) {
                    phi.set_operand(slot, value);
                }
            }
        }

        pushed
    }
}

/// Maps each register or stack varnode of `cfg` to the other varnodes of the
/// function that contain it.
fn containers(cfg: &ControlFlowGraph) -> HashMap<Varnode, Vec<Varnode>> {
    let varnodes: BTreeSet<Varnode> = cfg
        .blocks()
        .flat_map(|(_, block)| block.ops.iter())
        .flat_map(|op| op.inputs.iter().copied().chain(op.output))
        .filter(|v| matches!(v.space(), AddressSpace::Register | AddressSpace::Stack))
        .collect();

    let mut map = HashMap::new();
    for inner in &varnodes {
        let outer: Vec<Varnode> = varnodes
            .iter()
            .filter(|outer| *outer != inner && outer.contains(inner))
            .copied()
            .collect();
        if !outer.is_empty() {
            map.insert(*inner, outer);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{
            cfg::{build_cfg, JumpTables},
            ssa::DefSite,
        },
        ir::IrProgram,
        translate::{Generic, Instruction, RegisterModel, Translator},
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

    fn reg(name: &str) -> Varnode {
        Generic::default().register(name).unwrap()
    }

    #[test]
    fn test_straight_line() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "mov r2, 10"),
            (0x1008, "add r1, r1, r2"),
            (0x100c, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let block = ssa.block(NodeId::new(0)).unwrap();

        assert_eq!(ssa.phi_count(), 0);
        let add = &block.ops()[2];
        assert_eq!(add.opcode, OpCode::IntAdd);
        assert_eq!(add.output, Some(SsaValue::new(reg("r1"), 2)));
        assert_eq!(
            add.inputs,
            vec![SsaValue::new(reg("r1"), 1), SsaValue::new(reg("r2"), 1)]
        );
        assert!(ssa.live_ins().is_empty());
    }

    #[test]
    fn test_diamond_merges_with_phi() {
        let cfg = cfg_of(&[
            (0x1000, "beqz r3, 0x100c"),
            (0x1004, "mov r1, 1"),
            (0x1008, "jmp 0x1010"),
            (0x100c, "mov r1, 2"),
            (0x1010, "add r2, r1, r1"),
            (0x1014, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let join = ssa.block(NodeId::new(3)).unwrap();

        // The compare temporary never crosses a block and gets no phi
        assert_eq!(ssa.phi_count(), 1);
        let phi = &join.phis()[0];
        assert_eq!(phi.varnode(), reg("r1"));
        assert_eq!(phi.operand_from(NodeId::new(1)), Some(SsaValue::new(reg("r1"), 1)));
        assert_eq!(phi.operand_from(NodeId::new(2)), Some(SsaValue::new(reg("r1"), 2)));
        assert_eq!(join.ops()[0].inputs[0], phi.result());
        assert_eq!(ssa.live_ins().into_iter().collect::<Vec<_>>(), vec![reg("r3")]);
    }

    #[test]
    fn test_loop_header_phi() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "bge r1, r2, 0x1010"),
            (0x1008, "add r1, r1, 1"),
            (0x100c, "jmp 0x1004"),
            (0x1010, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let header = ssa.block(NodeId::new(1)).unwrap();

        assert_eq!(header.phis().len(), 1);
        let phi = &header.phis()[0];
        let values: Vec<SsaValue> = phi.operands().iter().map(|o| o.value).collect();
        assert_eq!(
            values,
            vec![SsaValue::new(reg("r1"), 1), SsaValue::new(reg("r1"), 3)]
        );

        let body = ssa.block(NodeId::new(2)).unwrap();
        assert_eq!(body.ops()[0].inputs[0], phi.result());
        assert_eq!(ssa.definition(&phi.result()).map(|d| d.is_phi()), Some(true));
        assert_eq!(ssa.uses(&phi.result()).len(), 2);
    }

    #[test]
    fn test_value_only_defined_at_entry_needs_no_phi() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 7"),
            (0x1004, "beqz r2, 0x100c"),
            (0x1008, "add r3, r1, 1"),
            (0x100c, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        assert_eq!(ssa.phi_count(), 0);
    }

    #[test]
    fn test_value_written_on_both_arms_merges_without_a_read() {
        let cfg = cfg_of(&[
            (0x1000, "beqz r3, 0x100c"),
            (0x1004, "mov r1, 1"),
            (0x1008, "jmp 0x1010"),
            (0x100c, "mov r1, 2"),
            (0x1010, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let join = ssa.block(cfg.block_at(0x1010).unwrap()).unwrap();

        assert_eq!(ssa.phi_count(), 1);
        assert_eq!(join.phis()[0].varnode(), reg("r1"));
        assert!(ssa.uses(&join.phis()[0].result()).is_empty());
    }

    #[test]
    fn test_byte_write_reaches_full_register_read() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 5"),
            (0x1004, "mov r1b, 1"),
            (0x1008, "mov r2, r1"),
            (0x100c, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let block = ssa.block(NodeId::new(0)).unwrap();

        let copy = block
            .ops()
            .iter()
            .find(|op| op.output.map(|o| o.varnode()) == Some(reg("r2")))
            .unwrap();
        let Some(DefSite::Op { index, .. }) = ssa.definition(&copy.inputs[0]) else {
            panic!("r1 read has no defining op");
        };
        assert_eq!(block.ops()[index].opcode, OpCode::Insert);
        assert_eq!(block.ops()[index].inputs[1].varnode(), reg("r1b"));
    }

    #[test]
    fn test_view_read_after_full_write_extracts() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 5"),
            (0x1004, "mov r2d, r1d"),
            (0x1008, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let block = ssa.block(NodeId::new(0)).unwrap();
        let ops = block.ops();

        assert_eq!(ops[1].opcode, OpCode::SubPiece);
        assert_eq!(ops[1].output, Some(SsaValue::new(reg("r1d"), 1)));
        assert_eq!(
            ops[1].inputs,
            vec![
                SsaValue::new(reg("r1"), 1),
                SsaValue::live_in(Varnode::constant(0, 4))
            ]
        );
        assert_eq!(ops[2].inputs[0], SsaValue::new(reg("r1d"), 1));
        crate::analysis::ssa::verify(&ssa, &cfg).unwrap();
    }

    #[test]
    fn test_view_read_at_join_extracts_from_phi() {
        let cfg = cfg_of(&[
            (0x1000, "beqz r3, 0x100c"),
            (0x1004, "mov r1, 1"),
            (0x1008, "jmp 0x1010"),
            (0x100c, "mov r1, 2"),
            (0x1010, "mov r2d, r1d"),
            (0x1014, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let join = ssa.block(cfg.block_at(0x1010).unwrap()).unwrap();

        let phi = join.phis().iter().find(|phi| phi.varnode() == reg("r1")).unwrap();
        assert_eq!(join.ops()[0].opcode, OpCode::SubPiece);
        assert_eq!(join.ops()[0].inputs[0], phi.result());
        assert_eq!(join.ops()[1].inputs[0], join.ops()[0].output.unwrap());
        crate::analysis::ssa::verify(&ssa, &cfg).unwrap();
    }

    #[test]
    fn test_phi_operand_extracts_from_containing_write() {
        let cfg = cfg_of(&[
            (0x1000, "beqz r3, 0x100c"),
            (0x1004, "mov r1, 1"),
            (0x1008, "jmp 0x1010"),
            (0x100c, "mov r1d, 2"),
            (0x1010, "mov r2d, r1d"),
            (0x1014, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let then_id = cfg.block_at(0x1004).unwrap();
        let then_block = ssa.block(then_id).unwrap();
        let join = ssa.block(cfg.block_at(0x1010).unwrap()).unwrap();

        let phi = join.phis().iter().find(|phi| phi.varnode() == reg("r1d")).unwrap();
        let ops = then_block.ops();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[1].opcode, OpCode::SubPiece);
        assert_eq!(ops[2].opcode, OpCode::Branch);
        assert_eq!(phi.operand_from(then_id), ops[1].output);
        crate::analysis::ssa::verify(&ssa, &cfg).unwrap();
    }

    #[test]
    fn test_unreachable_block_is_renamed() {
        let cfg = cfg_of(&[
            (0x1000, "ret"),
            (0x1004, "mov r1, 5"),
            (0x1008, "add r1, r1, 1"),
            (0x100c, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let dead = ssa.block(NodeId::new(1)).unwrap();

        assert_eq!(dead.ops()[1].inputs[0], SsaValue::new(reg("r1"), 1));
        assert_eq!(dead.ops()[1].output, Some(SsaValue::new(reg("r1"), 2)));
    }

    #[test]
    fn test_generations_are_unique() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "beqz r2, 0x1010"),
            (0x1008, "add r1, r1, 1"),
            (0x100c, "jmp 0x1004"),
            (0x1010, "add r1, r1, 2"),
            (0x1014, "ret"),
        ]);
        let ssa = SsaBuilder::build(&cfg).unwrap();

        let mut seen = BTreeSet::new();
        for (_, block) in ssa.blocks() {
            for phi in block.phis() {
                assert!(seen.insert(phi.result()));
            }
            for op in block.ops() {
                if let Some(output) = op.output {
                    assert!(seen.insert(output));
                }
            }
        }
    }
}
