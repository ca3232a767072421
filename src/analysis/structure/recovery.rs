//! Region-based recovery of structured control flow.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::{
    analysis::{
        cfg::{CfgEdgeKind, ControlFlowGraph, LoopInfo, LoopType},
        structure::{StructureNode, StructureTree, SwitchCase, SwitchKind},
    },
    config::StructureConfig,
    ir::{OpCode, OpFlags, PcodeOp, Varnode},
    utils::graph::{
        algorithms::{compute_post_dominators, PostDominatorTree},
        DirectedGraph, NodeId,
    },
    Diagnostic, DiagnosticCategory, DiagnosticSeverity,
};

/// Recovers the control-structure tree of `cfg`.
///
/// The walk starts at the entry and places every block at most once. At each
/// block the patterns are tried in a fixed order: loop header, jump-table
/// switch, compare-chain switch, if-then-else, if-then, straight-line sequence.
/// A block that is reached a second time, or an arm that is not private to its
/// branch, becomes a `Goto`. Once `config.max_attempts` pattern attempts are
/// spent, or regions nest deeper than `config.max_depth`, the remaining blocks
/// are emitted linearly with explicit gotos. Blocks the walk never reaches are
/// appended in reverse postorder, unreachable ones last.
///
/// Recovery never fails; every fallback is counted and summarized in one
/// `Unstructured` diagnostic.
///
/// # Examples
///
/// ```rust
/// use irscope::{
///     analysis::{build_cfg, recover_structure, JumpTables},
///     config::StructureConfig,
///     ir::IrProgram,
///     translate::{Generic, Instruction, Translator},
///     Diagnostics,
/// };
///
/// let listing = [
///     (0x1000, "beqz r1, 0x100c"),
///     (0x1004, "mov r2, 1"),
///     (0x1008, "b 0x1010"),
///     (0x100c, "mov r2, 2"),
///     (0x1010, "ret"),
/// ];
/// let mut translator = Translator::new(Generic::default());
/// let mut program = IrProgram::new();
/// for (address, text) in listing {
///     let insn = Instruction::parse(address, 4, text)?;
///     program.add_instruction(address, 4, translator.translate(&insn)?)?;
/// }
/// let cfg = build_cfg(&mut program, &JumpTables::new(), &Diagnostics::new())?;
///
/// let tree = recover_structure(&cfg, &StructureConfig::default());
/// assert_eq!(tree.to_string(), "sequence(if-then-else(n0, n2, n1), n3)");
/// # Ok::<(), irscope::Error>(())
/// ```
#[must_use]
pub fn recover_structure(cfg: &ControlFlowGraph, config: &StructureConfig) -> StructureTree {
    let mut recovery = Recovery::new(cfg, config);
    let mut items = recovery.region(cfg.entry(), &Scope::default(), 0);
    recovery.append_unplaced(&mut items);
    recovery.finish(items)
}

#[derive(Clone, Copy)]
struct LoopScope<'a> {
    info: &'a LoopInfo,
    follow: Option<NodeId>,
}

/// Where the region being walked ends.
#[derive(Clone, Copy, Default)]
struct Scope<'a> {
    /// Merge point of the enclosing construct; reaching it ends the region
    stop: Option<NodeId>,
    /// Innermost loop being emitted
    looping: Option<LoopScope<'a>>,
    /// Inside a switch case of the innermost loop, where `break` means the switch
    in_switch: bool,
}

enum Boundary {
    Inside,
    Stop,
    Continue,
    Break,
    Outside,
}

/// Post-dominators of one loop body with its back and exit edges cut.
struct LoopPostDominators {
    local: BTreeMap<NodeId, usize>,
    nodes: Vec<NodeId>,
    tree: PostDominatorTree,
}

/// A selector compared against constants through a chain of blocks.
struct Chain {
    selector: Varnode,
    blocks: Vec<NodeId>,
    cases: Vec<(u64, NodeId)>,
    default: NodeId,
}

struct Recovery<'a> {
    cfg: &'a ControlFlowGraph,
    config: &'a StructureConfig,
    placed: BTreeSet<NodeId>,
    goto_targets: BTreeSet<NodeId>,
    rpo_index: HashMap<NodeId, usize>,
    loop_pdoms: HashMap<NodeId, LoopPostDominators>,
    attempts: usize,
    unstructured: usize,
    first_unstructured: Option<NodeId>,
}

impl<'a> Recovery<'a> {
    fn new(cfg: &'a ControlFlowGraph, config: &'a StructureConfig) -> Self {
        let rpo_index = cfg
            .reverse_postorder()
            .into_iter()
            .enumerate()
            .map(|(index, node)| (node, index))
            .collect();
        Recovery {
            cfg,
            config,
            placed: BTreeSet::new(),
            goto_targets: BTreeSet::new(),
            rpo_index,
            loop_pdoms: HashMap::new(),
            attempts: 0,
            unstructured: 0,
            first_unstructured: None,
        }
    }

    fn region(&mut self, start: NodeId, scope: &Scope<'a>, depth: usize) -> Vec<StructureNode> {
        let mut items = Vec::new();
        self.walk(start, scope, depth, &mut items);
        items
    }

    fn walk(&mut self, start: NodeId, scope: &Scope<'a>, depth: usize, items: &mut Vec<StructureNode>) {
        let mut current = Some(start);
        while let Some(node) = current {
            match self.classify(node, scope) {
                Boundary::Inside => {}
                Boundary::Stop => break,
                boundary => {
                    items.push(self.exit(boundary, node, scope));
                    break;
                }
            }
            if !self.placed.insert(node) {
                items.push(self.unstructured_goto(node));
                break;
            }
            current = self.place(node, scope, depth, items);
        }
    }

    fn classify(&self, node: NodeId, scope: &Scope<'a>) -> Boundary {
        if scope.stop == Some(node) {
            return Boundary::Stop;
        }
        if let Some(looping) = scope.looping {
            if node == looping.info.header {
                return Boundary::Continue;
            }
            if looping.follow == Some(node) {
                return Boundary::Break;
            }
            if !looping.info.contains(node) {
                return Boundary::Outside;
            }
        }
        Boundary::Inside
    }

    fn exit(&mut self, boundary: Boundary, node: NodeId, scope: &Scope<'a>) -> StructureNode {
        match boundary {
            Boundary::Continue => StructureNode::Continue,
            Boundary::Break if !scope.in_switch => StructureNode::Break,
            _ => self.goto(node),
        }
    }

    fn goto(&mut self, target: NodeId) -> StructureNode {
        self.goto_targets.insert(target);
        StructureNode::Goto(target)
    }

    fn unstructured_goto(&mut self, target: NodeId) -> StructureNode {
        self.note_unstructured(target);
        self.goto(target)
    }

    fn note_unstructured(&mut self, node: NodeId) {
        self.unstructured += 1;
        self.first_unstructured.get_or_insert(node);
    }

    fn exhausted(&self, depth: usize) -> bool {
        self.attempts >= self.config.max_attempts || depth >= self.config.max_depth
    }

    /// Places `node` (already marked) and returns the block control continues at.
    fn place(
        &mut self,
        node: NodeId,
        scope: &Scope<'a>,
        depth: usize,
        items: &mut Vec<StructureNode>,
    ) -> Option<NodeId> {
        if self.exhausted(depth) {
            return self.fallback(node, items);
        }
        self.attempts += 1;

        let cfg = self.cfg;
        if let Some(info) = cfg.loops().loop_for_header(node) {
            return self.place_loop(info, depth, items);
        }
        self.place_block(node, scope, depth, items)
    }

    /// Places `node` without looking at its loop header role.
    fn place_block(
        &mut self,
        node: NodeId,
        scope: &Scope<'a>,
        depth: usize,
        items: &mut Vec<StructureNode>,
    ) -> Option<NodeId> {
        let edges = self.structural_edges(node);
        match self.terminator(node).map(|op| op.opcode) {
            Some(OpCode::BranchInd) if edges.iter().any(|(_, kind)| kind.is_switch()) => {
                return self.place_table(node, &edges, scope, depth, items);
            }
            Some(OpCode::CBranch) => {
                if let Some((taken, fallthrough)) = conditional_targets(&edges) {
                    if taken != fallthrough {
                        if let Some(chain) = self.compare_chain(node, scope) {
                            return self.place_chain(node, chain, scope, depth, items);
                        }
                        return self.place_branch(node, taken, fallthrough, scope, depth, items);
                    }
                }
            }
            _ => {}
        }

        items.push(StructureNode::Block(node));
        single_target(&edges)
    }

    fn place_loop(
        &mut self,
        info: &'a LoopInfo,
        depth: usize,
        items: &mut Vec<StructureNode>,
    ) -> Option<NodeId> {
        let header = info.header;
        let body_scope = |follow| Scope {
            stop: None,
            looping: Some(LoopScope { info, follow }),
            in_switch: false,
        };

        match info.loop_type {
            LoopType::While => {
                if let Some((inner, outer, negated)) = self.header_test(info) {
                    let mut body = self.region(inner, &body_scope(Some(outer)), depth + 1);
                    trim_continue(&mut body);
                    items.push(StructureNode::While {
                        header,
                        negated,
                        body: Box::new(sequence(body)),
                    });
                    return Some(outer);
                }
            }
            LoopType::DoWhile => {
                if let Some((latch, outer, negated)) = self.latch_test(info) {
                    let body = if latch == header {
                        Vec::new()
                    } else {
                        self.placed.insert(latch);
                        let scope = Scope {
                            stop: Some(latch),
                            ..body_scope(Some(outer))
                        };
                        self.loop_body(header, &scope, depth)
                    };
                    items.push(StructureNode::DoWhile {
                        body: Box::new(sequence(body)),
                        latch,
                        negated,
                    });
                    return Some(outer);
                }
            }
            LoopType::Infinite => {}
        }

        let follow = self.infinite_follow(info);
        let mut body = self.loop_body(header, &body_scope(follow), depth);
        trim_continue(&mut body);
        items.push(StructureNode::InfiniteLoop {
            header,
            body: Box::new(sequence(body)),
        });
        follow
    }

    /// Walks a loop body that starts with the header itself.
    fn loop_body(&mut self, header: NodeId, scope: &Scope<'a>, depth: usize) -> Vec<StructureNode> {
        let mut items = Vec::new();
        if let Some(next) = self.place_block(header, scope, depth + 1, &mut items) {
            self.walk(next, scope, depth + 1, &mut items);
        }
        items
    }

    /// `(in-loop successor, exit, negated)` of a header that tests the exit.
    fn header_test(&self, info: &LoopInfo) -> Option<(NodeId, NodeId, bool)> {
        let (taken, fallthrough) = self.branch_targets(info.header)?;
        match (info.contains(taken), info.contains(fallthrough)) {
            (true, false) => Some((taken, fallthrough, false)),
            (false, true) => Some((fallthrough, taken, true)),
            _ => None,
        }
    }

    /// `(latch, exit, negated)` of a loop tested at its single latch.
    fn latch_test(&self, info: &LoopInfo) -> Option<(NodeId, NodeId, bool)> {
        let latch = info.single_latch()?;
        let (taken, fallthrough) = self.branch_targets(latch)?;
        if taken == info.header && !info.contains(fallthrough) {
            Some((latch, fallthrough, false))
        } else if fallthrough == info.header && !info.contains(taken) {
            Some((latch, taken, true))
        } else {
            None
        }
    }

    /// The exit target earliest in reverse postorder.
    fn infinite_follow(&self, info: &LoopInfo) -> Option<NodeId> {
        info.exit_blocks()
            .into_iter()
            .min_by_key(|node| self.rpo_index.get(node).copied().unwrap_or(usize::MAX))
    }

    fn place_branch(
        &mut self,
        node: NodeId,
        taken: NodeId,
        fallthrough: NodeId,
        scope: &Scope<'a>,
        depth: usize,
        items: &mut Vec<StructureNode>,
    ) -> Option<NodeId> {
        if let Some(merge) = self.merge_point(node, scope) {
            let arm_scope = Scope {
                stop: Some(merge),
                ..*scope
            };
            let structure = if fallthrough == merge {
                StructureNode::IfThen {
                    condition: node,
                    negated: false,
                    then_branch: self.arm(node, taken, &arm_scope, depth),
                }
            } else if taken == merge {
                StructureNode::IfThen {
                    condition: node,
                    negated: true,
                    then_branch: self.arm(node, fallthrough, &arm_scope, depth),
                }
            } else {
                StructureNode::IfThenElse {
                    condition: node,
                    then_branch: self.arm(node, taken, &arm_scope, depth),
                    else_branch: self.arm(node, fallthrough, &arm_scope, depth),
                }
            };
            items.push(structure);
            return Some(merge);
        }

        // No merge point: an arm that leaves the region, or a private block that
        // ends the function, is guarded; the other arm continues the sequence
        if self.is_short_arm(node, taken, scope) {
            let then_branch = self.arm(node, taken, scope, depth);
            items.push(StructureNode::IfThen {
                condition: node,
                negated: false,
                then_branch,
            });
            return Some(fallthrough);
        }
        if self.is_short_arm(node, fallthrough, scope) {
            let then_branch = self.arm(node, fallthrough, scope, depth);
            items.push(StructureNode::IfThen {
                condition: node,
                negated: true,
                then_branch,
            });
            return Some(taken);
        }

        let then_branch = self.arm(node, taken, scope, depth);
        let else_branch = self.arm(node, fallthrough, scope, depth);
        items.push(StructureNode::IfThenElse {
            condition: node,
            then_branch,
            else_branch,
        });
        None
    }

    fn is_short_arm(&self, branch: NodeId, arm: NodeId, scope: &Scope<'a>) -> bool {
        match self.classify(arm, scope) {
            Boundary::Continue | Boundary::Break | Boundary::Outside => true,
            Boundary::Stop => false,
            Boundary::Inside => {
                !self.placed.contains(&arm)
                    && self.is_private(branch, arm)
                    && self.structural_edges(arm).is_empty()
            }
        }
    }

    /// The body of one arm of `branch`.
    fn arm(
        &mut self,
        branch: NodeId,
        target: NodeId,
        scope: &Scope<'a>,
        depth: usize,
    ) -> Box<StructureNode> {
        let enters = matches!(self.classify(target, scope), Boundary::Inside);
        if enters && (self.placed.contains(&target) || !self.is_private(branch, target)) {
            return Box::new(self.unstructured_goto(target));
        }
        Box::new(sequence(self.region(target, scope, depth + 1)))
    }

    fn is_private(&self, branch: NodeId, block: NodeId) -> bool {
        block != branch && self.cfg.structural_dominators().dominates(branch, block)
    }

    /// Where the arms of a branch at `node` rejoin within the current scope.
    fn merge_point(&mut self, node: NodeId, scope: &Scope<'a>) -> Option<NodeId> {
        match scope.looping {
            Some(looping) => self.loop_merge(looping.info, node),
            None => self.cfg.post_dominators().immediate_post_dominator(node),
        }
    }

    fn loop_merge(&mut self, info: &LoopInfo, node: NodeId) -> Option<NodeId> {
        let cfg = self.cfg;
        let pdoms = self
            .loop_pdoms
            .entry(info.header)
            .or_insert_with(|| loop_post_dominators(cfg, info));
        let local = *pdoms.local.get(&node)?;
        pdoms
            .tree
            .immediate_post_dominator(NodeId::new(local))
            .and_then(|merge| pdoms.nodes.get(merge.index()).copied())
    }

    fn place_table(
        &mut self,
        node: NodeId,
        edges: &[(NodeId, CfgEdgeKind)],
        scope: &Scope<'a>,
        depth: usize,
        items: &mut Vec<StructureNode>,
    ) -> Option<NodeId> {
        let mut by_target: Vec<(NodeId, Vec<u64>)> = Vec::new();
        for &(target, kind) in edges {
            let CfgEdgeKind::Switch { case_value } = kind else {
                continue;
            };
            match by_target.iter_mut().find(|(t, _)| *t == target) {
                Some((_, values)) => values.push(case_value),
                None => by_target.push((target, vec![case_value])),
            }
        }

        let follow = self.merge_point(node, scope);
        let case_scope = Scope {
            stop: follow,
            in_switch: true,
            ..*scope
        };
        let mut cases = Vec::with_capacity(by_target.len());
        for (target, mut values) in by_target {
            values.sort_unstable();
            let body = if Some(target) == follow {
                StructureNode::empty()
            } else {
                *self.arm(node, target, &case_scope, depth)
            };
            cases.push(SwitchCase { values, body });
        }
        cases.sort_by_key(|case| case.values.first().copied());

        items.push(StructureNode::Switch {
            head: node,
            kind: SwitchKind::Table,
            cases,
            default: None,
        });
        follow
    }

    fn place_chain(
        &mut self,
        head: NodeId,
        chain: Chain,
        scope: &Scope<'a>,
        depth: usize,
        items: &mut Vec<StructureNode>,
    ) -> Option<NodeId> {
        self.placed.extend(chain.blocks.iter().copied());

        let follow = self.merge_point(head, scope);
        let case_scope = Scope {
            stop: follow,
            in_switch: true,
            ..*scope
        };

        let mut by_target: Vec<(NodeId, Vec<u64>)> = Vec::new();
        for &(value, target) in &chain.cases {
            match by_target.iter_mut().find(|(t, _)| *t == target) {
                Some((_, values)) => {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                None => by_target.push((target, vec![value])),
            }
        }

        let mut cases = Vec::with_capacity(by_target.len());
        for (target, mut values) in by_target {
            values.sort_unstable();
            let body = if Some(target) == follow {
                StructureNode::empty()
            } else {
                *self.arm(head, target, &case_scope, depth)
            };
            cases.push(SwitchCase { values, body });
        }
        cases.sort_by_key(|case| case.values.first().copied());

        let default = if Some(chain.default) == follow {
            None
        } else {
            Some(self.arm(head, chain.default, &case_scope, depth))
        };

        items.push(StructureNode::Switch {
            head,
            kind: SwitchKind::Chain {
                selector: chain.selector,
                blocks: chain.blocks,
            },
            cases,
            default,
        });
        follow
    }

    fn compare_chain(&self, head: NodeId, scope: &Scope<'a>) -> Option<Chain> {
        let (selector, value, case, mut rest) = self.equality_test(head, None)?;
        let mut cases = vec![(value, case)];
        let mut blocks = Vec::new();
        let mut previous = head;

        while self.is_chain_link(rest, previous, selector, scope) {
            let Some((_, value, case, next)) = self.equality_test(rest, Some(selector)) else {
                break;
            };
            cases.push((value, case));
            blocks.push(rest);
            previous = rest;
            rest = next;
        }

        let distinct: BTreeSet<u64> = cases.iter().map(|&(value, _)| value).collect();
        if distinct.len() < self.config.min_switch_cases.max(2) {
            return None;
        }

        Some(Chain {
            selector,
            blocks,
            cases,
            default: rest,
        })
    }

    /// A block that can continue a compare chain: reached only from the previous
    /// link, holding nothing but the compare.
    fn is_chain_link(&self, node: NodeId, previous: NodeId, selector: Varnode, scope: &Scope<'a>) -> bool {
        if !matches!(self.classify(node, scope), Boundary::Inside)
            || self.placed.contains(&node)
            || self.cfg.loops().loop_for_header(node).is_some()
        {
            return false;
        }
        let mut preds = self.cfg.structural_predecessors(node);
        if preds.next() != Some(previous) || preds.next().is_some() {
            return false;
        }
        let Some(block) = self.cfg.block(node) else {
            return false;
        };
        block.ops.iter().all(|op| {
            is_scratch(op) && !op.output.is_some_and(|output| output.overlaps(&selector))
        })
    }

    /// `(selector, constant, case target, next target)` of a block ending in
    /// an equality test against a constant.
    fn equality_test(
        &self,
        node: NodeId,
        expected: Option<Varnode>,
    ) -> Option<(Varnode, u64, NodeId, NodeId)> {
        let block = self.cfg.block(node)?;
        let (terminator, body) = block.ops.split_last()?;
        let condition = terminator.condition()?;
        let position = body
            .iter()
            .rposition(|op| op.output == Some(condition))?;
        let test = &body[position];

        let (selector, constant) = match test.inputs.as_slice() {
            [a, b] if !a.is_constant() && b.is_constant() => (*a, b.constant_value()?),
            [a, b] if a.is_constant() && !b.is_constant() => (*b, a.constant_value()?),
            _ => return None,
        };
        if expected.is_some_and(|expected| expected != selector) {
            return None;
        }
        if body[position + 1..]
            .iter()
            .any(|op| op.output.is_some_and(|output| output.overlaps(&selector)))
        {
            return None;
        }

        let (taken, fallthrough) = self.branch_targets(node)?;
        match test.opcode {
            OpCode::IntEqual => Some((selector, constant, taken, fallthrough)),
            OpCode::IntNotEqual => Some((selector, constant, fallthrough, taken)),
            _ => None,
        }
    }

    /// Budget fallback: the block as a leaf, a conditional jump as `if (c) goto`.
    fn fallback(&mut self, node: NodeId, items: &mut Vec<StructureNode>) -> Option<NodeId> {
        self.note_unstructured(node);
        let edges = self.structural_edges(node);

        if let Some((taken, fallthrough)) = conditional_targets(&edges) {
            if taken != fallthrough {
                let then_branch = Box::new(self.goto(taken));
                items.push(StructureNode::IfThen {
                    condition: node,
                    negated: false,
                    then_branch,
                });
                return Some(fallthrough);
            }
        }

        items.push(StructureNode::Block(node));
        let targets: BTreeSet<NodeId> = edges.iter().map(|&(target, _)| target).collect();
        match targets.len() {
            1 => targets.into_iter().next(),
            _ => {
                for target in targets {
                    items.push(self.goto(target));
                }
                None
            }
        }
    }

    fn append_unplaced(&mut self, items: &mut Vec<StructureNode>) {
        let mut order = self.cfg.reverse_postorder();
        let reached: BTreeSet<NodeId> = order.iter().copied().collect();
        order.extend(self.cfg.node_ids().filter(|node| !reached.contains(node)));

        for node in order {
            if self.placed.contains(&node) {
                continue;
            }
            self.goto_targets.insert(node);
            let region = self.region(node, &Scope::default(), 0);
            items.extend(region);
        }
    }

    fn finish(self, items: Vec<StructureNode>) -> StructureTree {
        let mut diagnostics = Vec::new();
        if let Some(first) = self.first_unstructured {
            let address = self.cfg.block(first).map_or(0, |block| block.start);
            let message = format!(
                "{} unstructured transfer(s), first at block {}",
                self.unstructured, first
            );
            warn!("{} (0x{:x})", message, address);
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticSeverity::Warning,
                    DiagnosticCategory::Unstructured,
                    message,
                )
                .with_address(address),
            );
        }

        debug!(
            "recovered structure for {} blocks: {} attempts, {} goto target(s)",
            self.cfg.block_count(),
            self.attempts,
            self.goto_targets.len()
        );

        StructureTree::new(StructureNode::Sequence(items)).with_fallbacks(
            self.goto_targets,
            self.unstructured,
            diagnostics,
        )
    }

    fn terminator(&self, node: NodeId) -> Option<&'a PcodeOp> {
        self.cfg.block(node).and_then(|block| block.terminator())
    }

    fn structural_edges(&self, node: NodeId) -> Vec<(NodeId, CfgEdgeKind)> {
        self.cfg
            .outgoing_edges(node)
            .filter(|(_, _, edge)| edge.kind().is_structural())
            .map(|(_, target, edge)| (target, *edge.kind()))
            .collect()
    }

    fn branch_targets(&self, node: NodeId) -> Option<(NodeId, NodeId)> {
        if self.terminator(node)?.opcode != OpCode::CBranch {
            return None;
        }
        conditional_targets(&self.structural_edges(node))
    }
}

/// `(taken, fall-through)` targets of a conditional branch.
fn conditional_targets(edges: &[(NodeId, CfgEdgeKind)]) -> Option<(NodeId, NodeId)> {
    let taken = edges
        .iter()
        .find(|(_, kind)| *kind == CfgEdgeKind::ConditionalTrue)?;
    let fallthrough = edges
        .iter()
        .find(|(_, kind)| *kind == CfgEdgeKind::ConditionalFalse)?;
    Some((taken.0, fallthrough.0))
}

fn single_target(edges: &[(NodeId, CfgEdgeKind)]) -> Option<NodeId> {
    let first = edges.first()?.0;
    edges.iter().all(|&(target, _)| target == first).then_some(first)
}

/// Operations a compare-chain link may hold besides its test: temporaries and
/// flag updates.
fn is_scratch(op: &PcodeOp) -> bool {
    op.is_terminator()
        || op.output.is_some_and(|output| {
            output.is_unique()
                || (op.opcode.flags().contains(OpFlags::BOOLEAN_OUTPUT) && output.size() == 1)
        })
}

fn sequence(mut items: Vec<StructureNode>) -> StructureNode {
    if items.len() == 1 {
        if let Some(item) = items.pop() {
            return item;
        }
    }
    StructureNode::Sequence(items)
}

fn trim_continue(body: &mut Vec<StructureNode>) {
    if matches!(body.last(), Some(StructureNode::Continue)) {
        body.pop();
    }
}

fn loop_post_dominators(cfg: &ControlFlowGraph, info: &LoopInfo) -> LoopPostDominators {
    let nodes: Vec<NodeId> = info.body.iter().copied().collect();
    let local: BTreeMap<NodeId, usize> = nodes
        .iter()
        .enumerate()
        .map(|(index, &node)| (node, index))
        .collect();

    let mut graph: DirectedGraph<NodeId, ()> = DirectedGraph::with_capacity(nodes.len(), nodes.len() * 2);
    for &node in &nodes {
        graph.add_node(node);
    }

    let mut exits = Vec::new();
    for (index, &node) in nodes.iter().enumerate() {
        let mut leaves = false;
        let mut inner = false;
        for succ in cfg.structural_successors(node) {
            match local.get(&succ) {
                Some(&target) if succ != info.header => {
                    inner = true;
                    let _ = graph.add_edge(NodeId::new(index), NodeId::new(target), ());
                }
                _ => leaves = true,
            }
        }
        if leaves || !inner {
            exits.push(NodeId::new(index));
        }
    }

    let tree = compute_post_dominators(&graph, exits);
    LoopPostDominators { local, nodes, tree }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::cfg::{build_cfg, JumpTables},
        ir::IrProgram,
        translate::{Generic, Instruction, RegisterModel, Translator},
        Diagnostics,
    };

    fn cfg_with_tables(listing: &[(u64, &str)], tables: &JumpTables) -> ControlFlowGraph {
        let mut translator = Translator::new(Generic::default());
        let mut program = IrProgram::new();
        for &(address, text) in listing {
            let insn = Instruction::parse(address, 4, text).unwrap();
            program
                .add_instruction(address, 4, translator.translate(&insn).unwrap())
                .unwrap();
        }
        build_cfg(&mut program, tables, &Diagnostics::new()).unwrap()
    }

    fn cfg_of(listing: &[(u64, &str)]) -> ControlFlowGraph {
        cfg_with_tables(listing, &JumpTables::new())
    }

    fn recover(cfg: &ControlFlowGraph) -> StructureTree {
        recover_structure(cfg, &StructureConfig::default())
    }

    #[test]
    fn test_straight_line() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "mov r2, 10"),
            (0x1008, "add r1, r1, r2"),
            (0x100c, "ret"),
        ]);
        let tree = recover(&cfg);
        assert_eq!(tree.to_string(), "sequence(n0)");
        assert!(tree.is_fully_structured());
        assert!(tree.goto_targets().is_empty());
    }

    #[test]
    fn test_diamond() {
        let cfg = cfg_of(&[
            (0x1000, "beqz r1, 0x100c"),
            (0x1004, "mov r2, 1"),
            (0x1008, "b 0x1010"),
            (0x100c, "mov r2, 2"),
            (0x1010, "ret"),
        ]);
        let tree = recover(&cfg);
        assert_eq!(tree.to_string(), "sequence(if-then-else(n0, n2, n1), n3)");
        assert!(tree.is_fully_structured());
    }

    #[test]
    fn test_if_then() {
        let cfg = cfg_of(&[
            (0x1000, "beqz r1, 0x1008"),
            (0x1004, "mov r2, 1"),
            (0x1008, "ret"),
        ]);
        let tree = recover(&cfg);
        assert_eq!(tree.to_string(), "sequence(if-then(!n0, n1), n2)");
    }

    #[test]
    fn test_early_return() {
        let cfg = cfg_of(&[
            (0x1000, "beqz r1, 0x100c"),
            (0x1004, "mov r2, 1"),
            (0x1008, "ret"),
            (0x100c, "mov r2, 2"),
            (0x1010, "ret"),
        ]);
        let tree = recover(&cfg);
        assert_eq!(tree.to_string(), "sequence(if-then(n0, n2), n1)");
        assert!(tree.is_fully_structured());
    }

    #[test]
    fn test_while_loop() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "bge r1, 10, 0x1010"),
            (0x1008, "add r1, r1, 1"),
            (0x100c, "b 0x1004"),
            (0x1010, "ret"),
        ]);
        let tree = recover(&cfg);
        assert_eq!(tree.to_string(), "sequence(n0, while(!n1, n2), n3)");
        assert!(tree.is_fully_structured());
    }

    #[test]
    fn test_do_while_loop() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "add r1, r1, 1"),
            (0x1008, "b 0x100c"),
            (0x100c, "blt r1, 10, 0x1004"),
            (0x1010, "ret"),
        ]);
        let tree = recover(&cfg);
        assert_eq!(tree.to_string(), "sequence(n0, do-while(n1, n2), n3)");
    }

    #[test]
    fn test_self_loop() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "add r1, r1, 1"),
            (0x1008, "blt r1, 10, 0x1004"),
            (0x100c, "ret"),
        ]);
        let tree = recover(&cfg);
        assert_eq!(tree.to_string(), "sequence(n0, do-while(sequence(), n1), n2)");
    }

    #[test]
    fn test_infinite_loop_with_break() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "add r1, r1, 1"),
            (0x1008, "b 0x100c"),
            (0x100c, "beq r1, 10, 0x1018"),
            (0x1010, "add r2, r2, r1"),
            (0x1014, "b 0x1004"),
            (0x1018, "ret"),
        ]);
        let tree = recover(&cfg);
        assert_eq!(
            tree.to_string(),
            "sequence(n0, loop(sequence(n1, if-then(n2, break), n3)), n4)"
        );
        assert!(tree.is_fully_structured());
    }

    #[test]
    fn test_jump_table_switch() {
        let mut tables = JumpTables::new();
        tables.insert(0x1000, vec![0x1004, 0x100c, 0x1014]);
        let cfg = cfg_with_tables(
            &[
                (0x1000, "jmp r5"),
                (0x1004, "mov r1, 1"),
                (0x1008, "b 0x1014"),
                (0x100c, "mov r1, 2"),
                (0x1010, "b 0x1014"),
                (0x1014, "ret"),
            ],
            &tables,
        );
        let tree = recover(&cfg);
        assert_eq!(
            tree.to_string(),
            "sequence(switch(n0, case 0: n1, case 1: n2, case 2: sequence()), n3)"
        );
    }

    #[test]
    fn test_two_target_jump_table_header_loops_forever() {
        let mut tables = JumpTables::new();
        tables.insert(0x1004, vec![0x1008, 0x1010]);
        let cfg = cfg_with_tables(
            &[
                (0x1000, "mov r1, 0"),
                (0x1004, "jmp r5"),
                (0x1008, "add r1, r1, 1"),
                (0x100c, "b 0x1004"),
                (0x1010, "ret"),
            ],
            &tables,
        );
        let header = cfg.block_at(0x1004).unwrap();
        let info = cfg.loops().loop_for_header(header).unwrap();
        assert_eq!(info.loop_type, LoopType::Infinite);

        let text = recover(&cfg).to_string();
        assert!(text.contains("loop("), "{text}");
        assert!(!text.contains("while("), "{text}");
    }

    #[test]
    fn test_compare_chain_switch() {
        let cfg = cfg_of(&[
            (0x1000, "beq r1, 1, 0x1010"),
            (0x1004, "beq r1, 2, 0x1018"),
            (0x1008, "beq r1, 3, 0x1020"),
            (0x100c, "b 0x1028"),
            (0x1010, "mov r2, 10"),
            (0x1014, "b 0x1028"),
            (0x1018, "mov r2, 20"),
            (0x101c, "b 0x1028"),
            (0x1020, "mov r2, 30"),
            (0x1024, "b 0x1028"),
            (0x1028, "ret"),
        ]);
        let tree = recover(&cfg);
        assert_eq!(
            tree.to_string(),
            "sequence(switch(n0, case 1: n4, case 2: n5, case 3: n6, default: n3), n7)"
        );

        let StructureNode::Sequence(items) = tree.root() else {
            panic!("root is a sequence");
        };
        let StructureNode::Switch { kind, .. } = &items[0] else {
            panic!("expected a switch, got {}", items[0]);
        };
        assert_eq!(
            *kind,
            SwitchKind::Chain {
                selector: Generic::default().register("r1").unwrap(),
                blocks: vec![NodeId::new(1), NodeId::new(2)],
            }
        );
    }

    #[test]
    fn test_short_chain_stays_nested_ifs() {
        let cfg = cfg_of(&[
            (0x1000, "beq r1, 1, 0x100c"),
            (0x1004, "beq r1, 2, 0x1010"),
            (0x1008, "ret"),
            (0x100c, "ret"),
            (0x1010, "ret"),
        ]);
        let tree = recover(&cfg);
        assert!(!tree.to_string().contains("switch"));
        assert!(tree.is_fully_structured());
    }

    #[test]
    fn test_budget_exhaustion_falls_back_to_gotos() {
        let cfg = cfg_of(&[
            (0x1000, "beqz r1, 0x100c"),
            (0x1004, "mov r2, 1"),
            (0x1008, "b 0x1010"),
            (0x100c, "mov r2, 2"),
            (0x1010, "ret"),
        ]);
        let config = StructureConfig {
            max_attempts: 0,
            ..StructureConfig::default()
        };
        let tree = recover_structure(&cfg, &config);

        assert_eq!(tree.to_string(), "sequence(if-then(n0, goto n2), n1, n3, n2, goto n3)");
        assert!(!tree.is_fully_structured());
        assert_eq!(tree.diagnostics().len(), 1);
        assert_eq!(tree.diagnostics()[0].category, DiagnosticCategory::Unstructured);
        assert!(tree.goto_targets().contains(&NodeId::new(2)));
        assert!(tree.goto_targets().contains(&NodeId::new(3)));
    }

    #[test]
    fn test_unreachable_blocks_appended() {
        let cfg = cfg_of(&[(0x1000, "ret"), (0x1004, "mov r1, 1"), (0x1008, "ret")]);
        let tree = recover(&cfg);
        assert_eq!(tree.to_string(), "sequence(n0, n1)");
        assert!(tree.goto_targets().contains(&NodeId::new(1)));
    }

    #[test]
    fn test_every_block_placed_once() {
        let cfg = cfg_of(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "bge r1, 10, 0x1020"),
            (0x1008, "beqz r2, 0x1014"),
            (0x100c, "add r3, r3, 1"),
            (0x1010, "b 0x1018"),
            (0x1014, "add r4, r4, 1"),
            (0x1018, "add r1, r1, 1"),
            (0x101c, "b 0x1004"),
            (0x1020, "ret"),
        ]);
        let tree = recover(&cfg);
        assert!(tree.is_fully_structured());

        let mut blocks = tree.root().blocks();
        blocks.sort();
        let expected: Vec<NodeId> = cfg.node_ids().collect();
        assert_eq!(blocks, expected);
    }
}
