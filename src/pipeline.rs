//! The end-to-end decompilation driver.
//!
//! The [`Decompiler`] runs every stage for one function in order: translation,
//! CFG construction, SSA, type inference, structure recovery and rendering. Each
//! stage's output is kept on the [`DecompiledFunction`], so callers can inspect
//! the intermediate results as well as the final text.
//!
//! Functions share nothing; [`Decompiler::decompile_all`] processes them in
//! parallel and reports one result per input.

use std::{collections::BTreeSet, time::Instant};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    analysis::{
        build_cfg, recover_structure, ssa, ControlFlowGraph, JumpTables, SsaBuilder, SsaFunction,
        SsaValue, StructureTree, TypeInference, TypeMap,
    },
    config::DecompilerConfig,
    ir::{IrProgram, OpCode, PcodeOp},
    render::Renderer,
    translate::{Instruction, RegisterModel, Translator, UnsupportedPolicy},
    DiagnosticCategory, Diagnostics, Error, Result,
};

/// One function to decompile.
#[derive(Debug, Clone, Default)]
pub struct FunctionInput {
    /// Entry address
    pub start: u64,
    /// Decoded instructions in address order; may extend past the function
    pub instructions: Vec<Instruction>,
    /// Per-function instruction cap, lowered to the configured maximum if larger
    pub max_instructions: Option<usize>,
    /// Resolved indirect jump targets, keyed by the jump's address
    pub jump_tables: JumpTables,
}

impl FunctionInput {
    /// Creates an input starting at `start` without jump tables.
    pub fn new(start: u64, instructions: Vec<Instruction>) -> Self {
        FunctionInput {
            start,
            instructions,
            max_instructions: None,
            jump_tables: JumpTables::new(),
        }
    }

    /// Parses a textual listing with [`Instruction::parse`], `length` bytes apart.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperand`] if a line does not parse.
    pub fn from_listing(start: u64, length: u32, lines: &[&str]) -> Result<Self> {
        let mut address = start;
        let mut instructions = Vec::with_capacity(lines.len());
        for line in lines {
            let insn = Instruction::parse(address, length, line)?;
            address = insn.next_address();
            instructions.push(insn);
        }
        Ok(Self::new(start, instructions))
    }

    /// Sets the instruction cap.
    #[must_use]
    pub fn with_max_instructions(mut self, max: usize) -> Self {
        self.max_instructions = Some(max);
        self
    }

    /// Adds the targets of the indirect jump at `address`.
    #[must_use]
    pub fn with_jump_table(mut self, address: u64, targets: Vec<u64>) -> Self {
        self.jump_tables.insert(address, targets);
        self
    }
}

/// Every stage's output for one function.
#[derive(Debug)]
pub struct DecompiledFunction {
    /// Entry address
    pub start: u64,
    /// The translated operations
    pub ir: IrProgram,
    /// Control flow graph over `ir`
    pub cfg: ControlFlowGraph,
    /// SSA form of `cfg`
    pub ssa: SsaFunction,
    /// Inferred types per SSA value
    pub types: TypeMap<SsaValue>,
    /// Recovered control structure
    pub structure: StructureTree,
    /// Rendered pseudocode
    pub text: String,
    /// Problems found along the way
    pub diagnostics: Diagnostics,
}

/// Runs the full pipeline for one register model.
///
/// # Examples
///
/// ```rust
/// use irscope::{Decompiler, DecompilerConfig, FunctionInput};
/// use irscope::translate::Generic;
///
/// let decompiler = Decompiler::new(Generic::default(), DecompilerConfig::default());
/// let input = FunctionInput::from_listing(
///     0x1000,
///     4,
///     &["mov r1, 0", "mov r2, 10", "add r1, r1, r2", "ret"],
/// )?;
///
/// let function = decompiler.decompile(&input)?;
/// assert_eq!(function.cfg.block_count(), 1);
/// assert_eq!(function.structure.to_string(), "sequence(n0)");
/// assert!(function.text.contains("r1 = r1 + r2;"));
/// # Ok::<(), irscope::Error>(())
/// ```
pub struct Decompiler<M> {
    model: M,
    config: DecompilerConfig,
}

impl<M: RegisterModel + Clone> Decompiler<M> {
    /// Creates a decompiler for `model`.
    pub fn new(model: M, config: DecompilerConfig) -> Self {
        Decompiler { model, config }
    }

    /// The active configuration.
    pub fn config(&self) -> &DecompilerConfig {
        &self.config
    }

    /// The register model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Decompiles one function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if no instruction lies at or after `input.start`,
    /// [`Error::UnsupportedInstruction`] under [`UnsupportedPolicy::Abort`],
    /// [`Error::MalformedOperation`] if a lowered operation breaks its operator's
    /// arity or size rules, and any error of the CFG and SSA stages.
    pub fn decompile(&self, input: &FunctionInput) -> Result<DecompiledFunction> {
        let started = Instant::now();
        let diagnostics = Diagnostics::new();

        let mut program = self.translate(input, &diagnostics)?;
        debug!(
            "fn_{:x}: {} instruction(s) lowered to {} op(s)",
            input.start,
            program.instruction_count(),
            program.len()
        );
        if let Err(error) = program.validate() {
            warn!("fn_{:x}: {error}", input.start);
            return Err(error);
        }

        let cfg = build_cfg(&mut program, &input.jump_tables, &diagnostics)?;
        let ssa = SsaBuilder::build(&cfg)?;
        if self.config.verify_ssa {
            ssa::verify(&ssa, &cfg)?;
        }

        let mut type_config = self.config.types.clone();
        type_config.pointer_size = self.model.pointer_size();
        let types = TypeInference::new(&type_config).infer_ssa(&ssa, &diagnostics);

        let structure = recover_structure(&cfg, &self.config.structure);
        for diagnostic in structure.diagnostics() {
            diagnostics.push(diagnostic.clone());
        }

        let text = Renderer::new(
            &program,
            &cfg,
            &types,
            &structure,
            &self.model,
            &self.config.render,
        )
        .render();

        debug!(
            "fn_{:x}: decompiled in {:?} ({} diagnostic(s))",
            input.start,
            started.elapsed(),
            diagnostics.count()
        );

        Ok(DecompiledFunction {
            start: input.start,
            ir: program,
            cfg,
            ssa,
            types,
            structure,
            text,
            diagnostics,
        })
    }

    /// Decompiles independent functions in parallel.
    ///
    /// Results are in input order; one function failing does not affect the others.
    pub fn decompile_all(&self, inputs: &[FunctionInput]) -> Vec<Result<DecompiledFunction>> {
        inputs.par_iter().map(|input| self.decompile(input)).collect()
    }

    /// Lowers the function's instruction window into a program.
    ///
    /// The window starts at `input.start` and ends at the instruction cap, at a
    /// gap in the listing that no branch targets, or after an instruction that
    /// does not fall through when no branch seen so far targets a later address.
    fn translate(&self, input: &FunctionInput, diagnostics: &Diagnostics) -> Result<IrProgram> {
        let limit = input
            .max_instructions
            .map_or(self.config.max_instructions, |max| max.min(self.config.max_instructions));

        let mut translator = Translator::new(self.model.clone());
        if self.model.flags().is_some() {
            translator.add_branch_targets(self.scan_targets(input, limit));
        }
        let mut program = IrProgram::new();
        let mut pending: BTreeSet<u64> = BTreeSet::new();
        let mut expected = None;
        let mut count = 0;
        let mut ended = false;

        let window = input
            .instructions
            .iter()
            .skip_while(|insn| insn.address < input.start);
        for insn in window {
            if count == limit {
                diagnostics.warning_at(
                    DiagnosticCategory::Truncated,
                    format!("function window truncated after {limit} instruction(s)"),
                    insn.address,
                );
                warn!("fn_{:x}: truncated at 0x{:x}", input.start, insn.address);
                break;
            }
            if expected.is_some_and(|next| next != insn.address) && !pending.contains(&insn.address) {
                break;
            }

            let ops = self.lower(&mut translator, insn, diagnostics)?;
            for target in branch_targets(&ops, insn.address, &input.jump_tables) {
                if target > insn.address {
                    pending.insert(target);
                }
            }
            let falls_through = ops.last().map_or(true, |op| {
                !matches!(op.opcode, OpCode::Branch | OpCode::BranchInd | OpCode::Return)
            });

            program.add_instruction(insn.address, insn.length, ops)?;
            count += 1;
            expected = Some(insn.next_address());
            pending = pending.split_off(&insn.next_address());

            if !falls_through && pending.is_empty() {
                ended = true;
                break;
            }
        }

        if program.instruction_count() == 0 {
            return Err(Error::Empty);
        }
        if !ended {
            debug!("fn_{:x}: window ended without a final return", input.start);
        }

        for name in translator.user_ops() {
            program.user_op_index(name);
        }
        Ok(program)
    }

    /// Direct and jump-table targets of the first `limit` instructions from the
    /// entry, found by lowering them with a scratch translator.
    fn scan_targets(&self, input: &FunctionInput, limit: usize) -> BTreeSet<u64> {
        let mut scratch = Translator::new(self.model.clone());
        let mut targets = BTreeSet::new();
        let window = input
            .instructions
            .iter()
            .skip_while(|insn| insn.address < input.start)
            .take(limit);
        for insn in window {
            if let Ok(ops) = scratch.translate(insn) {
                targets.extend(branch_targets(&ops, insn.address, &input.jump_tables));
            }
        }
        targets
    }

    /// Translates one instruction under the configured unsupported policy.
    fn lower(
        &self,
        translator: &mut Translator<M>,
        insn: &Instruction,
        diagnostics: &Diagnostics,
    ) -> Result<Vec<PcodeOp>> {
        match translator.translate(insn) {
            Ok(ops) => Ok(ops),
            Err(Error::UnsupportedInstruction { mnemonic, address }) => {
                let policy = self.config.unsupported;
                if policy == UnsupportedPolicy::Abort {
                    return Err(Error::UnsupportedInstruction { mnemonic, address });
                }

                diagnostics.warning_at(
                    DiagnosticCategory::UnsupportedInstruction,
                    format!("unsupported instruction '{mnemonic}' ({policy})"),
                    address,
                );
                warn!("0x{:x}: unsupported instruction '{}'", address, mnemonic);

                Ok(match policy {
                    UnsupportedPolicy::Placeholder => vec![translator.placeholder(insn)],
                    _ => Vec::new(),
                })
            }
            Err(error) => Err(error),
        }
    }
}

/// Statically known targets of an instruction's branches.
fn branch_targets(ops: &[PcodeOp], address: u64, jump_tables: &JumpTables) -> Vec<u64> {
    let mut targets = Vec::new();
    for op in ops {
        match op.opcode {
            OpCode::Branch | OpCode::CBranch => targets.extend(op.branch_target()),
            OpCode::BranchInd => {
                if let Some(table) = jump_tables.get(&address) {
                    targets.extend(table.iter().copied());
                }
            }
            _ => {}
        }
    }
    targets
}
