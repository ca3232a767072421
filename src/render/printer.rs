//! Pseudocode printing of a structured function.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::{self, Write},
};

use tracing::debug;

use crate::{
    analysis::{
        ssa::SsaValue, ControlFlowGraph, StructureNode, StructureTree, SwitchCase, SwitchKind,
        Type, TypeMap, Unresolved,
    },
    config::RenderConfig,
    ir::{AddressSpace, IrProgram, OpCode, PcodeOp, Varnode},
    render::expr::{BinaryOp, Expr},
    translate::{RegisterModel, PLACEHOLDER_PREFIX, UNIQUE_BASE},
    utils::graph::NodeId,
};

/// A value computed but not yet printed, waiting to be folded into its use.
struct Pending {
    expr: Expr,
    inputs: Vec<Varnode>,
    reads_memory: bool,
}

/// Statements of one block plus the value its terminator branches on.
struct BlockText {
    statements: Vec<String>,
    /// `CBRANCH` condition or `BRANCHIND` target
    control: Option<Expr>,
}

/// Output under construction.
struct Output {
    text: String,
    level: usize,
    indent: usize,
    referenced: BTreeSet<Varnode>,
}

impl Output {
    fn line(&mut self, content: impl fmt::Display) {
        let width = self.level * self.indent;
        let _ = writeln!(self.text, "{:width$}{}", "", content, width = width);
    }
}

/// Renders one function as C-like pseudocode.
///
/// Unique temporaries read exactly once in their defining block, and flag
/// values, are folded into the expression that uses them; a branch condition
/// therefore prints as the compare that produced it. A folded value is printed
/// as an assignment instead when a later write in the block clobbers one of
/// its inputs before the use.
///
/// # Examples
///
/// ```rust
/// use irscope::{
///     analysis::{build_cfg, recover_structure, JumpTables, SsaBuilder, TypeInference},
///     config::{RenderConfig, StructureConfig, TypeConfig},
///     ir::IrProgram,
///     render::Renderer,
///     translate::{Generic, Instruction, Translator},
///     Diagnostics,
/// };
///
/// let mut translator = Translator::new(Generic::default());
/// let mut program = IrProgram::new();
/// for (address, text) in [(0x1000, "beqz r1, 0x1008"), (0x1004, "mov r2, 1"), (0x1008, "ret")] {
///     let insn = Instruction::parse(address, 4, text)?;
///     program.add_instruction(address, 4, translator.translate(&insn)?)?;
/// }
/// let diagnostics = Diagnostics::new();
/// let cfg = build_cfg(&mut program, &JumpTables::new(), &diagnostics)?;
/// let ssa = SsaBuilder::build(&cfg)?;
/// let types = TypeInference::new(&TypeConfig::default()).infer_ssa(&ssa, &diagnostics);
/// let structure = recover_structure(&cfg, &StructureConfig::default());
///
/// let model = Generic::default();
/// let config = RenderConfig::default();
/// let text = Renderer::new(&program, &cfg, &types, &structure, &model, &config).render();
/// assert!(text.starts_with("void fn_1000(void)"));
/// assert!(text.contains("if (r1 != 0) {"));
/// # Ok::<(), irscope::Error>(())
/// ```
pub struct Renderer<'a> {
    program: &'a IrProgram,
    cfg: &'a ControlFlowGraph,
    structure: &'a StructureTree,
    model: &'a dyn RegisterModel,
    config: &'a RenderConfig,
    types: BTreeMap<Varnode, Type>,
    reads: HashMap<Varnode, usize>,
}

impl<'a> Renderer<'a> {
    /// Creates a renderer over the outputs of the earlier stages.
    pub fn new(
        program: &'a IrProgram,
        cfg: &'a ControlFlowGraph,
        types: &TypeMap<SsaValue>,
        structure: &'a StructureTree,
        model: &'a dyn RegisterModel,
        config: &'a RenderConfig,
    ) -> Self {
        let mut reads: HashMap<Varnode, usize> = HashMap::new();
        for op in program.ops() {
            for input in op.inputs.iter().filter(|input| input.is_unique()) {
                *reads.entry(*input).or_default() += 1;
            }
        }

        Renderer {
            program,
            cfg,
            structure,
            model,
            config,
            types: types.by_storage(),
            reads,
        }
    }

    /// Produces the pseudocode text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut body = Output {
            text: String::new(),
            level: 1,
            indent: self.config.indent,
            referenced: BTreeSet::new(),
        };
        self.node(self.structure.root(), &mut body);

        let start = self
            .cfg
            .block(self.cfg.entry())
            .map_or(0, |block| block.start);
        let mut text = String::new();
        let _ = writeln!(text, "void fn_{start:x}(void)");
        text.push_str("{\n");
        if self.config.declare_locals && !body.referenced.is_empty() {
            let indent = " ".repeat(self.config.indent);
            for varnode in &body.referenced {
                let _ = writeln!(text, "{indent}{} {};", self.type_name(varnode), self.name(varnode));
            }
            text.push('\n');
        }
        text.push_str(&body.text);
        text.push_str("}\n");

        debug!(
            "rendered fn_{:x}: {} lines, {} locals",
            start,
            text.lines().count(),
            body.referenced.len()
        );
        text
    }

    fn node(&self, node: &StructureNode, out: &mut Output) {
        match node {
            StructureNode::Sequence(items) => {
                for item in items {
                    self.node(item, out);
                }
            }
            StructureNode::Block(block) => self.leaf(*block, out),
            StructureNode::IfThen {
                condition,
                negated,
                then_branch,
            } => {
                let cond = self.open(*condition, *negated, out);
                self.print_if(cond, then_branch, None, "", out);
            }
            StructureNode::IfThenElse {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.open(*condition, false, out);
                self.print_if(cond, then_branch, Some(else_branch), "", out);
            }
            StructureNode::While {
                header,
                negated,
                body,
            } => {
                self.label(*header, out);
                let text = self.block_text(*header, out);
                let cond = condition(text.control, *negated);
                if text.statements.is_empty() {
                    out.line(format_args!("while ({cond}) {{"));
                    self.nested(body, out);
                } else {
                    out.line("for (;;) {");
                    out.level += 1;
                    for statement in &text.statements {
                        out.line(statement);
                    }
                    out.line(format_args!("if ({}) break;", cond.negate()));
                    out.level -= 1;
                    self.nested(body, out);
                }
                out.line("}");
            }
            StructureNode::DoWhile {
                body,
                latch,
                negated,
            } => {
                out.line("do {");
                out.level += 1;
                self.node(body, out);
                self.label(*latch, out);
                let text = self.block_text(*latch, out);
                for statement in &text.statements {
                    out.line(statement);
                }
                out.level -= 1;
                out.line(format_args!("}} while ({});", condition(text.control, *negated)));
            }
            StructureNode::InfiniteLoop { body, .. } => {
                out.line("for (;;) {");
                self.nested(body, out);
                out.line("}");
            }
            StructureNode::Switch {
                head,
                kind,
                cases,
                default,
            } => self.switch(*head, kind, cases, default.as_deref(), out),
            StructureNode::Break => out.line("break;"),
            StructureNode::Continue => out.line("continue;"),
            StructureNode::Goto(target) => out.line(format_args!("goto block_{};", target.index())),
        }
    }

    fn nested(&self, node: &StructureNode, out: &mut Output) {
        out.level += 1;
        self.node(node, out);
        out.level -= 1;
    }

    /// Prints a condition block's label and statements and returns its test.
    fn open(&self, block: NodeId, negated: bool, out: &mut Output) -> Expr {
        self.label(block, out);
        let text = self.block_text(block, out);
        for statement in &text.statements {
            out.line(statement);
        }
        condition(text.control, negated)
    }

    fn print_if(
        &self,
        cond: Expr,
        then_branch: &StructureNode,
        else_branch: Option<&StructureNode>,
        prefix: &str,
        out: &mut Output,
    ) {
        out.line(format_args!("{prefix}if ({cond}) {{"));
        self.nested(then_branch, out);

        let Some(else_branch) = else_branch else {
            out.line("}");
            return;
        };
        if let Some((block, negated, then_next, else_next)) = self.else_if(else_branch, out) {
            let text = self.block_text(block, out);
            let cond = condition(text.control, negated);
            self.print_if(cond, then_next, else_next, "} else ", out);
        } else {
            out.line("} else {");
            self.nested(else_branch, out);
            out.line("}");
        }
    }

    /// An else arm that prints as `else if`: a conditional whose block holds
    /// nothing but the test.
    fn else_if<'n>(
        &self,
        node: &'n StructureNode,
        out: &mut Output,
    ) -> Option<(NodeId, bool, &'n StructureNode, Option<&'n StructureNode>)> {
        let (block, negated, then_branch, else_branch) = match node {
            StructureNode::IfThen {
                condition,
                negated,
                then_branch,
            } => (*condition, *negated, then_branch.as_ref(), None),
            StructureNode::IfThenElse {
                condition,
                then_branch,
                else_branch,
            } => (*condition, false, then_branch.as_ref(), Some(else_branch.as_ref())),
            _ => return None,
        };
        if self.structure.goto_targets().contains(&block) {
            return None;
        }
        let mut scratch = BTreeSet::new();
        std::mem::swap(&mut scratch, &mut out.referenced);
        let empty = self.block_text(block, out).statements.is_empty();
        std::mem::swap(&mut scratch, &mut out.referenced);
        empty.then_some((block, negated, then_branch, else_branch))
    }

    fn switch(
        &self,
        head: NodeId,
        kind: &SwitchKind,
        cases: &[SwitchCase],
        default: Option<&StructureNode>,
        out: &mut Output,
    ) {
        self.label(head, out);
        let text = self.block_text(head, out);
        for statement in &text.statements {
            out.line(statement);
        }
        let selector = match kind {
            SwitchKind::Table => text.control.unwrap_or_else(|| Expr::atom("?")),
            SwitchKind::Chain { selector, .. } => self.atom(*selector, out),
        };

        out.line(format_args!("switch ({selector}) {{"));
        for case in cases {
            for value in &case.values {
                out.line(format_args!("case {}:", Expr::literal(*value)));
            }
            self.case_body(&case.body, out);
        }
        if let Some(default) = default {
            out.line("default:");
            self.case_body(default, out);
        }
        out.line("}");
    }

    fn case_body(&self, body: &StructureNode, out: &mut Output) {
        out.level += 1;
        self.node(body, out);
        if self.falls_through(body) {
            out.line("break;");
        }
        out.level -= 1;
    }

    /// Returns `true` if control can run off the end of `node`.
    fn falls_through(&self, node: &StructureNode) -> bool {
        match node {
            StructureNode::Break | StructureNode::Continue | StructureNode::Goto(_) => false,
            StructureNode::Sequence(items) => {
                items.last().map_or(true, |last| self.falls_through(last))
            }
            StructureNode::Block(block) => self.cfg.structural_successors(*block).next().is_some(),
            _ => true,
        }
    }

    fn label(&self, block: NodeId, out: &mut Output) {
        if self.structure.goto_targets().contains(&block) {
            let level = out.level;
            out.level = level.saturating_sub(1);
            out.line(format_args!("block_{}:", block.index()));
            out.level = level;
        }
    }

    /// A block printed on its own: statements plus whatever its terminator
    /// does that the tree does not show.
    fn leaf(&self, node: NodeId, out: &mut Output) {
        self.label(node, out);
        let text = self.block_text(node, out);
        for statement in &text.statements {
            out.line(statement);
        }

        let Some(block) = self.cfg.block(node) else {
            return;
        };
        let terminator = block.terminator();
        match (terminator.map(|op| op.opcode), block.unresolved) {
            (Some(OpCode::BranchInd), _) => {
                let target = text.control.unwrap_or_else(|| Expr::atom("?"));
                out.line(format_args!("goto *({target});"));
            }
            (Some(OpCode::CBranch), Some(Unresolved::OutOfWindow { target })) => {
                let taken = terminator.and_then(PcodeOp::branch_target) == Some(target);
                let cond = condition(text.control, !taken);
                out.line(format_args!("if ({cond}) goto *(0x{target:x});"));
            }
            (_, Some(Unresolved::OutOfWindow { target })) => {
                out.line(format_args!("goto *(0x{target:x});"));
            }
            _ => {}
        }
    }

    /// Lowers the operations of a block to statements.
    fn block_text(&self, node: NodeId, out: &mut Output) -> BlockText {
        let mut text = BlockText {
            statements: Vec::new(),
            control: None,
        };
        let Some(block) = self.cfg.block(node) else {
            return text;
        };

        let mut pending: HashMap<Varnode, Pending> = HashMap::new();
        let mut tail = None;
        for op in &block.ops {
            let args: Vec<Expr> = op
                .inputs
                .iter()
                .map(|input| self.operand(*input, &mut pending, out))
                .collect();

            let clobbers_memory = matches!(
                op.opcode,
                OpCode::Store | OpCode::Call | OpCode::CallInd | OpCode::CallOther
            );
            self.invalidate(op.output, clobbers_memory, &mut pending, &mut text, out);

            match op.opcode {
                OpCode::CBranch => text.control = args.into_iter().nth(1),
                OpCode::BranchInd => text.control = args.into_iter().next(),
                OpCode::Branch | OpCode::MultiEqual | OpCode::Indirect => {}
                OpCode::Return => tail = Some("return;".to_string()),
                OpCode::Store => {
                    let value_type = op
                        .inputs
                        .get(1)
                        .map_or_else(|| "int".to_string(), |value| self.type_name(value));
                    let mut args = args.into_iter();
                    if let (Some(address), Some(value)) = (args.next(), args.next()) {
                        text.statements
                            .push(format!("{} = {};", Expr::deref(value_type, address), value));
                    }
                }
                OpCode::Call | OpCode::CallInd | OpCode::CallOther => {
                    let call = self.call(op, args);
                    match op.output {
                        Some(output) => {
                            let name = self.atom(output, out);
                            text.statements.push(format!("{name} = {call};"));
                        }
                        None => text.statements.push(format!("{call};")),
                    }
                }
                _ => {
                    let (Some(output), Some(expr)) = (op.output, self.expression(op, args)) else {
                        continue;
                    };
                    let flag = self.model.is_flag(&output);
                    if self.foldable(&output) {
                        if flag && self.config.show_flag_updates {
                            let name = self.atom(output, out);
                            text.statements.push(format!("{name} = {expr};"));
                        }
                        pending.insert(
                            output,
                            Pending {
                                expr,
                                inputs: op.inputs.clone(),
                                reads_memory: op.opcode == OpCode::Load,
                            },
                        );
                    } else {
                        let name = self.atom(output, out);
                        text.statements.push(format!("{name} = {expr};"));
                    }
                }
            }
        }

        // Temporaries read by later blocks
        let mut leftover: Vec<(Varnode, Pending)> = pending
            .into_iter()
            .filter(|(varnode, _)| varnode.is_unique())
            .collect();
        leftover.sort_by_key(|(varnode, _)| *varnode);
        for (varnode, value) in leftover {
            let name = self.atom(varnode, out);
            text.statements.push(format!("{name} = {};", value.expr));
        }
        text.statements.extend(tail);
        text
    }

    /// Prints folded values whose inputs `written` is about to overwrite.
    fn invalidate(
        &self,
        written: Option<Varnode>,
        clobbers_memory: bool,
        pending: &mut HashMap<Varnode, Pending>,
        text: &mut BlockText,
        out: &mut Output,
    ) {
        let mut stale: Vec<Varnode> = pending
            .iter()
            .filter(|(key, value)| {
                (clobbers_memory && value.reads_memory)
                    || written.is_some_and(|written| {
                        key.overlaps(&written) || value.inputs.iter().any(|input| input.overlaps(&written))
                    })
            })
            .map(|(key, _)| *key)
            .collect();
        stale.sort();
        for key in stale {
            let Some(value) = pending.remove(&key) else {
                continue;
            };
            if key.is_unique() && written != Some(key) {
                let name = self.atom(key, out);
                text.statements.push(format!("{name} = {};", value.expr));
            }
        }
    }

    /// Returns `true` if writes to `varnode` are folded into their readers.
    fn foldable(&self, varnode: &Varnode) -> bool {
        (varnode.is_unique() && self.reads.get(varnode) == Some(&1)) || self.model.is_flag(varnode)
    }

    fn operand(&self, varnode: Varnode, pending: &mut HashMap<Varnode, Pending>, out: &mut Output) -> Expr {
        if varnode.is_unique() {
            if let Some(value) = pending.remove(&varnode) {
                return value.expr;
            }
        } else if let Some(value) = pending.get(&varnode) {
            return value.expr.clone();
        }
        self.atom(varnode, out)
    }

    /// Names a varnode, recording it for the declarations.
    fn atom(&self, varnode: Varnode, out: &mut Output) -> Expr {
        match varnode.space() {
            AddressSpace::Const => {
                let value = varnode.constant_value().unwrap_or(0);
                match varnode.signed_value() {
                    Some(signed) if (-4096..0).contains(&signed) => {
                        Expr::atom(format!("-{}", signed.unsigned_abs()))
                    }
                    _ => Expr::literal(value),
                }
            }
            AddressSpace::Ram => Expr::atom(self.name(&varnode)),
            _ => {
                out.referenced.insert(varnode);
                Expr::atom(self.name(&varnode))
            }
        }
    }

    fn name(&self, varnode: &Varnode) -> String {
        match varnode.space() {
            AddressSpace::Register => self
                .model
                .register_name(varnode)
                .unwrap_or_else(|| format!("reg_{:x}_{}", varnode.offset(), varnode.size())),
            AddressSpace::Stack => match varnode.stack_displacement() {
                Some(displacement) if displacement < 0 => {
                    format!("local_{:x}", displacement.unsigned_abs())
                }
                Some(displacement) => format!("param_{displacement:x}"),
                None => format!("stack_{:x}", varnode.offset()),
            },
            AddressSpace::Unique => {
                format!("tmp_{:x}", varnode.offset().saturating_sub(UNIQUE_BASE))
            }
            AddressSpace::Ram => format!("mem_{:x}", varnode.offset()),
            AddressSpace::Const => Expr::literal(varnode.offset()).to_string(),
        }
    }

    fn type_name(&self, varnode: &Varnode) -> String {
        let size = varnode.size();
        match self.types.get(varnode) {
            Some(ty) => c_type(ty, size),
            None => Type::int(size).to_string(),
        }
    }

    fn call(&self, op: &PcodeOp, args: Vec<Expr>) -> Expr {
        let mut args = args.into_iter();
        match op.opcode {
            OpCode::Call => {
                args.next();
                let name = op
                    .branch_target()
                    .map_or_else(|| "fn_unknown".to_string(), |target| format!("fn_{target:x}"));
                Expr::call(name, args.collect())
            }
            OpCode::CallInd => {
                let target = args.next().unwrap_or_else(|| Expr::atom("?"));
                Expr::call(format!("(*{target})"), args.collect())
            }
            _ => {
                args.next();
                let index = op.inputs.first().and_then(Varnode::constant_value).unwrap_or(0);
                match self.program.user_op_name(index) {
                    Some(name) => match name.strip_prefix(PLACEHOLDER_PREFIX) {
                        Some(mnemonic) => {
                            let literal = Expr::atom(format!("\"{mnemonic}\""));
                            Expr::call("__unsupported", vec![literal])
                        }
                        None => Expr::call(name, args.collect()),
                    },
                    None => Expr::call(format!("CALLOTHER_{index}"), args.collect()),
                }
            }
        }
    }

    /// The right-hand side of a value-producing operation.
    fn expression(&self, op: &PcodeOp, args: Vec<Expr>) -> Option<Expr> {
        use OpCode::*;

        let output_type = op.output.map(|output| self.type_name(&output))?;
        let mut args = args.into_iter();
        let mut next = || args.next().unwrap_or_else(|| Expr::atom("?"));

        let binary = |op: BinaryOp, lhs: Expr, rhs: Expr| Expr::binary(op, lhs, rhs);
        // `10 <= x` reads as `x >= 10`
        let constant_first = op.inputs.first().is_some_and(Varnode::is_constant)
            && !op.inputs.get(1).is_some_and(Varnode::is_constant);
        let compare = |op: BinaryOp, lhs: Expr, rhs: Expr| {
            if constant_first {
                Expr::binary(op.mirror(), rhs, lhs)
            } else {
                Expr::binary(op, lhs, rhs)
            }
        };
        let expr = match op.opcode {
            Copy => next(),
            Load => Expr::deref(output_type, next()),
            IntAdd | FloatAdd => binary(BinaryOp::Add, next(), next()),
            IntSub | FloatSub => binary(BinaryOp::Sub, next(), next()),
            IntMult | FloatMult => binary(BinaryOp::Mul, next(), next()),
            IntDiv | IntSDiv | FloatDiv => binary(BinaryOp::Div, next(), next()),
            IntRem | IntSRem => binary(BinaryOp::Rem, next(), next()),
            IntAnd => binary(BinaryOp::BitAnd, next(), next()),
            IntOr => binary(BinaryOp::BitOr, next(), next()),
            IntXor | BoolXor => binary(BinaryOp::BitXor, next(), next()),
            IntLeft => binary(BinaryOp::Shl, next(), next()),
            IntRight | IntSRight => binary(BinaryOp::Shr, next(), next()),
            IntEqual | FloatEqual => compare(BinaryOp::Equal, next(), next()),
            IntNotEqual | FloatNotEqual => compare(BinaryOp::NotEqual, next(), next()),
            IntSLess | IntLess | FloatLess => compare(BinaryOp::Less, next(), next()),
            IntSLessEqual | IntLessEqual | FloatLessEqual => {
                compare(BinaryOp::LessEqual, next(), next())
            }
            BoolAnd => binary(BinaryOp::LogicalAnd, next(), next()),
            BoolOr => binary(BinaryOp::LogicalOr, next(), next()),
            BoolNegate => next().negate(),
            IntNegate => Expr::unary("~", next()),
            Int2Comp | FloatNeg => Expr::unary("-", next()),
            IntZExt | IntSExt | FloatInt2Float | FloatFloat2Float | FloatTrunc | Cast => {
                Expr::cast(output_type, next())
            }
            PtrAdd => {
                let base = next();
                let index = next();
                let scale = next();
                binary(BinaryOp::Add, base, binary(BinaryOp::Mul, index, scale))
            }
            PtrSub => binary(BinaryOp::Add, next(), next()),
            IntCarry => Expr::call("CARRY", vec![next(), next()]),
            IntSCarry => Expr::call("SCARRY", vec![next(), next()]),
            IntSBorrow => Expr::call("SBORROW", vec![next(), next()]),
            Piece => Expr::call("CONCAT", vec![next(), next()]),
            SubPiece => Expr::call("SUB", vec![next(), next()]),
            FloatNan => Expr::call("isnan", vec![next()]),
            FloatAbs => Expr::call("fabs", vec![next()]),
            FloatSqrt => Expr::call("sqrt", vec![next()]),
            FloatCeil => Expr::call("ceil", vec![next()]),
            FloatFloor => Expr::call("floor", vec![next()]),
            FloatRound => Expr::call("round", vec![next()]),
            PopCount => Expr::call("POPCOUNT", vec![next()]),
            LzCount => Expr::call("LZCOUNT", vec![next()]),
            Insert => Expr::call("INSERT", vec![next(), next(), next(), next()]),
            Extract => Expr::call("EXTRACT", vec![next(), next(), next()]),
            Store | Branch | CBranch | BranchInd | Call | CallInd | CallOther | Return
            | MultiEqual | Indirect => return None,
        };
        Some(expr)
    }
}

/// The test of a conditional, negated when the construct runs on the false arm.
fn condition(control: Option<Expr>, negated: bool) -> Expr {
    let cond = control.unwrap_or_else(|| Expr::atom("true"));
    if negated {
        cond.negate()
    } else {
        cond
    }
}

/// Declaration spelling of an inferred type.
fn c_type(ty: &Type, size: u32) -> String {
    match ty {
        Type::Unknown => format!("undefined{size}"),
        Type::Pointer(inner) if matches!(**inner, Type::Unknown) => "void*".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{build_cfg, recover_structure, JumpTables, SsaBuilder, TypeInference},
        config::{StructureConfig, TypeConfig},
        translate::{Generic, Instruction, Translator, X86_64},
        Diagnostics,
    };

    fn render_with<M: RegisterModel + Clone>(
        model: M,
        listing: &[(u64, &str)],
        tables: &JumpTables,
        config: &RenderConfig,
    ) -> String {
        let mut translator = Translator::new(model.clone());
        let mut program = IrProgram::new();
        for &(address, text) in listing {
            let insn = Instruction::parse(address, 4, text).unwrap();
            let ops = match translator.translate(&insn) {
                Ok(ops) => ops,
                Err(_) => vec![translator.placeholder(&insn)],
            };
            program.add_instruction(address, 4, ops).unwrap();
        }
        for name in translator.user_ops() {
            program.user_op_index(name);
        }
        let diagnostics = Diagnostics::new();
        let cfg = build_cfg(&mut program, tables, &diagnostics).unwrap();
        let ssa = SsaBuilder::build(&cfg).unwrap();
        let types = TypeInference::new(&TypeConfig::default()).infer_ssa(&ssa, &diagnostics);
        let structure = recover_structure(&cfg, &StructureConfig::default());
        Renderer::new(&program, &cfg, &types, &structure, &model, config).render()
    }

    fn render(listing: &[(u64, &str)]) -> String {
        render_with(Generic::default(), listing, &JumpTables::new(), &RenderConfig::default())
    }

    #[test]
    fn test_straight_line() {
        let text = render(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "mov r2, 10"),
            (0x1008, "add r1, r1, r2"),
            (0x100c, "ret"),
        ]);
        let expected = "\
void fn_1000(void)
{
  int64 r1;
  int64 r2;

  r1 = 0;
  r2 = 0xa;
  r1 = r1 + r2;
  return;
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_if_else_condition_inlined() {
        let text = render(&[
            (0x1000, "beq r1, 5, 0x100c"),
            (0x1004, "mov r2, 1"),
            (0x1008, "b 0x1010"),
            (0x100c, "mov r2, 2"),
            (0x1010, "ret"),
        ]);
        assert!(text.contains("  if (r1 == 5) {\n    r2 = 2;\n  } else {\n    r2 = 1;\n  }\n"));
        assert!(!text.contains("tmp_"));
    }

    #[test]
    fn test_while_loop() {
        let text = render(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "bge r1, 10, 0x1010"),
            (0x1008, "add r1, r1, 1"),
            (0x100c, "b 0x1004"),
            (0x1010, "ret"),
        ]);
        assert!(text.contains("  while ("));
        assert!(text.contains("    r1 = r1 + 1;\n  }\n  return;\n"));
    }

    #[test]
    fn test_infinite_loop_with_break() {
        let text = render(&[
            (0x1000, "mov r1, 0"),
            (0x1004, "add r1, r1, 1"),
            (0x1008, "b 0x100c"),
            (0x100c, "beq r1, 10, 0x1018"),
            (0x1010, "add r2, r2, r1"),
            (0x1014, "b 0x1004"),
            (0x1018, "ret"),
        ]);
        assert!(text.contains("  for (;;) {\n"));
        assert!(text.contains("    if (r1 == 0xa) {\n      break;\n    }\n"));
    }

    #[test]
    fn test_switch_cases() {
        let text = render(&[
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
        assert!(text.contains("  switch (r1) {\n  case 1:\n    r2 = 0xa;\n    break;\n"));
        assert!(text.contains("  default:\n    break;\n  }\n"));
    }

    #[test]
    fn test_unresolved_indirect_jump() {
        let text = render(&[(0x1000, "mov r1, 8"), (0x1004, "jmp r5"), (0x1008, "ret")]);
        assert!(text.contains("goto *(r5);"));
        assert!(text.contains("block_1:\n"));
    }

    #[test]
    fn test_unsupported_placeholder() {
        let text = render_with(
            X86_64,
            &[(0x1000, "vzeroupper"), (0x1004, "ret")],
            &JumpTables::new(),
            &RenderConfig::default(),
        );
        assert!(text.contains("__unsupported(\"vzeroupper\");"));
    }

    #[test]
    fn test_flags_hidden_unless_requested() {
        let listing = [
            (0x1000, "cmp eax, 5"),
            (0x1004, "jl 0x100c"),
            (0x1008, "mov ebx, 1"),
            (0x100c, "ret"),
        ];
        let hidden = render_with(X86_64, &listing, &JumpTables::new(), &RenderConfig::default());
        assert!(!hidden.contains("ZF"));
        assert!(hidden.contains("if (eax >= 5) {"));

        let config = RenderConfig {
            show_flag_updates: true,
            indent: 4,
            ..RenderConfig::default()
        };
        let shown = render_with(X86_64, &listing, &JumpTables::new(), &config);
        assert!(shown.contains("    ZF = eax == 5;"));
    }
}
