//! Lowering of decoded instructions to IR operations.

use std::collections::BTreeSet;

use tracing::trace;

use crate::{
    ir::{OpCode, PcodeOp, Varnode},
    translate::{
        conditions::{CompareKind, Condition, Flag, FlagProducer, FlagState, FlagTest},
        Instruction, MemoryOperand, Operand, RegisterModel, ReturnLinkage,
    },
    Error, Result,
};

/// First offset handed out for temporaries.
pub const UNIQUE_BASE: u64 = 0x10000;

/// Prefix of the user-defined operation a placeholder `CALLOTHER` names.
pub const PLACEHOLDER_PREFIX: &str = "__unsupported:";

/// Stack and frame pointer positions relative to the stack pointer at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StackState {
    sp: Option<i64>,
    fp: Option<i64>,
}

impl Default for StackState {
    fn default() -> Self {
        StackState {
            sp: Some(0),
            fp: None,
        }
    }
}

/// Lowers instructions of one register model into IR operations.
///
/// A translator carries state across the instructions of a function: the
/// temporary allocator, the user-defined operation table, the last flag-setting
/// compare and the tracked stack pointer. While the stack pointer offset is known,
/// `[sp + d]` and `[fp + d]` references become `stack` space varnodes instead of
/// `LOAD`/`STORE` operations.
///
/// A flag consumer at a [branch target](Translator::add_branch_targets) may be
/// reached with flags set elsewhere, so it always reads the flag varnodes.
///
/// # Examples
///
/// ```rust
/// use irscope::{
///     ir::OpCode,
///     translate::{Generic, Instruction, Translator},
/// };
///
/// let mut translator = Translator::new(Generic::default());
/// let insn = Instruction::parse(0x1000, 4, "add r1, r1, r2")?;
/// let ops = translator.translate(&insn)?;
///
/// assert_eq!(ops.len(), 1);
/// assert_eq!(ops[0].opcode, OpCode::IntAdd);
/// # Ok::<(), irscope::Error>(())
/// ```
#[derive(Debug)]
pub struct Translator<M> {
    model: M,
    next_unique: u64,
    user_ops: Vec<String>,
    flags: FlagState,
    stack: StackState,
    branch_targets: BTreeSet<u64>,
}

impl<M: RegisterModel> Translator<M> {
    /// Creates a translator for `model`.
    pub fn new(model: M) -> Self {
        Translator {
            model,
            next_unique: UNIQUE_BASE,
            user_ops: Vec::new(),
            flags: FlagState::default(),
            stack: StackState::default(),
            branch_targets: BTreeSet::new(),
        }
    }

    /// The register model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// User-defined operation names, indexed by `CALLOTHER` input 0.
    pub fn user_ops(&self) -> &[String] {
        &self.user_ops
    }

    /// Forgets the per-function state before translating another function.
    ///
    /// Temporaries keep counting so ops of different functions never share one.
    pub fn reset(&mut self) {
        self.flags.clear();
        self.stack = StackState::default();
        self.branch_targets.clear();
    }

    /// Records addresses that branches of the current function jump to.
    pub fn add_branch_targets(&mut self, targets: impl IntoIterator<Item = u64>) {
        self.branch_targets.extend(targets);
    }

    /// Lowers one instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedInstruction`] for an unknown mnemonic and
    /// [`Error::InvalidOperand`] when the operands do not fit it.
    pub fn translate(&mut self, insn: &Instruction) -> Result<Vec<PcodeOp>> {
        let joined = self.model.flags().is_some() && self.branch_targets.contains(&insn.address);
        let producer = self.flags.take_for(insn.address).filter(|_| !joined);
        let mut lowering = Lowering {
            translator: self,
            insn,
            producer,
            ops: Vec::new(),
            sp_tracked: false,
            fp_tracked: false,
        };
        lowering.lower()?;
        let ops = lowering.finish();

        trace!(
            "0x{:x}: {} lowered to {} op(s)",
            insn.address,
            insn.mnemonic,
            ops.len()
        );
        Ok(ops)
    }

    /// A `CALLOTHER` standing in for an instruction that could not be lowered.
    ///
    /// The referenced user operation is named `__unsupported:<mnemonic>`.
    pub fn placeholder(&mut self, insn: &Instruction) -> PcodeOp {
        self.flags.clear();
        let index = self.user_op(&format!("{PLACEHOLDER_PREFIX}{}", insn.mnemonic));
        PcodeOp::new(
            OpCode::CallOther,
            None,
            vec![Varnode::constant(index, 4)],
            insn.address,
        )
    }

    fn user_op(&mut self, name: &str) -> u64 {
        let index = match self.user_ops.iter().position(|n| n == name) {
            Some(index) => index,
            None => {
                self.user_ops.push(name.to_string());
                self.user_ops.len() - 1
            }
        };
        index as u64
    }
}

/// Where an instruction writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    /// A register, stack slot or global written by the operation itself
    Direct(Varnode),
    /// Memory written with `STORE` through a computed address
    Memory { address: Varnode, size: u32 },
}

impl Place {
    fn size(self) -> u32 {
        match self {
            Place::Direct(varnode) => varnode.size(),
            Place::Memory { size, .. } => size,
        }
    }
}

/// How an integer operation updates the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagEffect {
    None,
    Add,
    Sub,
    Logic,
    Shift,
}

/// Lowering state of a single instruction.
struct Lowering<'t, M> {
    translator: &'t mut Translator<M>,
    insn: &'t Instruction,
    producer: Option<FlagProducer>,
    ops: Vec<PcodeOp>,
    sp_tracked: bool,
    fp_tracked: bool,
}

impl<'t, M: RegisterModel> Lowering<'t, M> {
    fn lower(&mut self) -> Result<()> {
        let insn = self.insn;
        let mnemonic = insn.mnemonic.as_str();
        match mnemonic {
            "nop" => Ok(()),

            "mov" | "movabs" => self.mov(),
            "movzx" => self.extend(OpCode::IntZExt, 1),
            "movsx" => self.extend(OpCode::IntSExt, 1),
            "movsxd" => self.extend(OpCode::IntSExt, 4),
            "lea" => self.lea(),
            "xchg" => self.xchg(),
            "push" => self.push(),
            "pop" => self.pop(),
            "leave" => self.leave(),

            "add" => self.binary(OpCode::IntAdd, FlagEffect::Add),
            "sub" => self.binary(OpCode::IntSub, FlagEffect::Sub),
            "and" => self.binary(OpCode::IntAnd, FlagEffect::Logic),
            "or" => self.binary(OpCode::IntOr, FlagEffect::Logic),
            "xor" => self.binary(OpCode::IntXor, FlagEffect::Logic),
            "shl" | "sal" => self.binary(OpCode::IntLeft, FlagEffect::Shift),
            "shr" => self.binary(OpCode::IntRight, FlagEffect::Shift),
            "sar" => self.binary(OpCode::IntSRight, FlagEffect::Shift),
            "adc" => self.add_with_carry(OpCode::IntAdd),
            "sbb" => self.add_with_carry(OpCode::IntSub),
            "inc" | "dec" | "neg" | "not" => self.unary(mnemonic),
            "mul" | "imul" if insn.operands.len() == 1 => {
                self.widening_multiply(mnemonic == "imul")
            }
            "mul" | "imul" => self.binary(OpCode::IntMult, FlagEffect::None),
            "div" | "idiv" if insn.operands.len() == 1 => self.divide(mnemonic == "idiv"),
            "div" => self.binary(OpCode::IntDiv, FlagEffect::None),
            "idiv" => self.binary(OpCode::IntSDiv, FlagEffect::None),

            "cmp" => self.compare(),
            "test" => self.test(),

            "jmp" | "b" => self.jump(),
            "call" => self.call(),
            "ret" | "return" => self.ret(),

            "cbw" => self.sign_extend_accumulator("al", "ax"),
            "cwde" => self.sign_extend_accumulator("ax", "eax"),
            "cdqe" => self.sign_extend_accumulator("eax", "rax"),
            "cdq" => self.sign_fill("eax", "edx"),
            "cqo" => self.sign_fill("rax", "rdx"),

            "movss" => self.float_move(4),
            "movsd" if !insn.operands.is_empty() => self.float_move(8),
            "movaps" | "movups" | "movapd" | "movupd" | "movdqa" | "movdqu" => {
                self.float_move(16)
            }
            "addss" => self.float_binary(OpCode::FloatAdd, 4),
            "addsd" => self.float_binary(OpCode::FloatAdd, 8),
            "subss" => self.float_binary(OpCode::FloatSub, 4),
            "subsd" => self.float_binary(OpCode::FloatSub, 8),
            "mulss" => self.float_binary(OpCode::FloatMult, 4),
            "mulsd" => self.float_binary(OpCode::FloatMult, 8),
            "divss" => self.float_binary(OpCode::FloatDiv, 4),
            "divsd" => self.float_binary(OpCode::FloatDiv, 8),
            "sqrtss" => self.float_unary(OpCode::FloatSqrt, 4, 4),
            "sqrtsd" => self.float_unary(OpCode::FloatSqrt, 8, 8),
            "cvtss2sd" => self.float_unary(OpCode::FloatFloat2Float, 4, 8),
            "cvtsd2ss" => self.float_unary(OpCode::FloatFloat2Float, 8, 4),
            "cvtsi2ss" => self.int_to_float(4),
            "cvtsi2sd" => self.int_to_float(8),
            "cvttss2si" => self.float_to_int(4),
            "cvttsd2si" => self.float_to_int(8),
            "ucomiss" | "comiss" => self.float_compare(4),
            "ucomisd" | "comisd" => self.float_compare(8),
            "xorps" | "xorpd" | "pxor" => self.binary(OpCode::IntXor, FlagEffect::None),
            "andps" | "andpd" | "pand" => self.binary(OpCode::IntAnd, FlagEffect::None),
            "orps" | "orpd" | "por" => self.binary(OpCode::IntOr, FlagEffect::None),

            "stosb" | "stosw" | "stosd" | "stosq" => self.store_string(string_width(mnemonic)),
            "lodsb" | "lodsw" | "lodsd" | "lodsq" => self.load_string(string_width(mnemonic)),
            "movsb" | "movsw" | "movsd" | "movsq" => self.move_string(string_width(mnemonic)),

            "hlt" | "int3" | "int" | "syscall" | "sysenter" | "cpuid" | "rdtsc" | "ud2" => {
                self.system()
            }

            _ => self.conditional(mnemonic),
        }
    }

    fn conditional(&mut self, mnemonic: &str) -> Result<()> {
        if let Some(condition) = Condition::from_compare_branch(mnemonic) {
            return self.compare_branch(condition, mnemonic.ends_with('z'));
        }
        if let Some(condition) = mnemonic.strip_prefix("cmov").and_then(Condition::from_suffix) {
            return self.cmov(condition);
        }
        if let Some(condition) = mnemonic.strip_prefix("set").and_then(Condition::from_suffix) {
            return self.setcc(condition);
        }
        if let Some(condition) = mnemonic.strip_prefix('j').and_then(Condition::from_suffix) {
            return self.jcc(condition);
        }
        Err(Error::UnsupportedInstruction {
            mnemonic: mnemonic.to_string(),
            address: self.insn.address,
        })
    }

    /// Invalidates stack tracking that the emitted ops may have broken.
    fn finish(self) -> Vec<PcodeOp> {
        let model = &self.translator.model;
        let sp = model.stack_pointer();
        let fp = model.frame_pointer();

        let writes = |target: &Varnode| {
            self.ops
                .iter()
                .filter_map(|op| op.output)
                .any(|out| out.overlaps(target))
        };
        let sp_lost = !self.sp_tracked && writes(&sp);
        let fp_lost = !self.fp_tracked && fp.is_some_and(|fp| writes(&fp));

        if sp_lost {
            self.translator.stack.sp = None;
        }
        if fp_lost {
            self.translator.stack.fp = None;
        }
        self.ops
    }

    // Building blocks

    fn model(&self) -> &M {
        &self.translator.model
    }

    fn pointer_size(&self) -> u32 {
        self.model().pointer_size()
    }

    fn emit(&mut self, opcode: OpCode, output: Option<Varnode>, inputs: Vec<Varnode>) {
        self.ops
            .push(PcodeOp::new(opcode, output, inputs, self.insn.address));
    }

    fn temp(&mut self, size: u32) -> Varnode {
        let offset = self.translator.next_unique;
        self.translator.next_unique += u64::from(size.max(1));
        Varnode::unique(offset, size)
    }

    fn compute(&mut self, opcode: OpCode, size: u32, inputs: Vec<Varnode>) -> Varnode {
        let output = self.temp(size);
        self.emit(opcode, Some(output), inputs);
        output
    }

    fn constant(value: i64, size: u32) -> Varnode {
        Varnode::constant(value as u64, size)
    }

    fn invalid(&self, what: &str) -> Error {
        Error::InvalidOperand(format!(
            "{} at 0x{:x}: {}",
            self.insn.mnemonic, self.insn.address, what
        ))
    }

    fn operand(&self, index: usize) -> Result<&'t Operand> {
        let insn = self.insn;
        insn.operands
            .get(index)
            .ok_or_else(|| self.invalid(&format!("missing operand {}", index + 1)))
    }

    /// `(destination, left, right)` of the two and three operand forms.
    fn binary_operands(&self) -> Result<(&'t Operand, &'t Operand, &'t Operand)> {
        let insn = self.insn;
        match insn.operands.as_slice() {
            [dst, src] => Ok((dst, dst, src)),
            [dst, lhs, rhs] => Ok((dst, lhs, rhs)),
            _ => Err(self.invalid("expected two or three operands")),
        }
    }

    fn register(&self, name: &str) -> Result<Varnode> {
        self.model()
            .register(name)
            .ok_or_else(|| self.invalid(&format!("unknown register '{name}'")))
    }

    fn operand_size(&self, operand: &Operand) -> Option<u32> {
        match operand {
            Operand::Register(name) => self.model().register(name).map(|r| r.size()),
            Operand::Memory(mem) => mem.size,
            Operand::Immediate(_) => None,
        }
    }

    fn common_size(&self, operands: &[&Operand]) -> u32 {
        operands
            .iter()
            .find_map(|operand| self.operand_size(operand))
            .unwrap_or_else(|| self.pointer_size())
    }

    fn is_stack_pointer(&self, operand: &Operand) -> bool {
        match operand {
            Operand::Register(name) => {
                self.model().register(name) == Some(self.model().stack_pointer())
            }
            _ => false,
        }
    }

    // Memory

    fn stack_slot(&self, mem: &MemoryOperand) -> Option<i64> {
        if mem.index.is_some() {
            return None;
        }
        let base = self.model().register(mem.base.as_deref()?)?;
        let stack = self.translator.stack;
        if base == self.model().stack_pointer() {
            stack.sp?.checked_add(mem.displacement)
        } else if Some(base) == self.model().frame_pointer() {
            stack.fp?.checked_add(mem.displacement)
        } else {
            None
        }
    }

    fn absolute_address(&self, mem: &MemoryOperand) -> Option<u64> {
        if mem.index.is_some() {
            return None;
        }
        match mem.base.as_deref() {
            None => Some(mem.displacement as u64),
            Some("rip") => Some(self.insn.next_address().wrapping_add(mem.displacement as u64)),
            Some(_) => None,
        }
    }

    fn address_of(&mut self, mem: &MemoryOperand) -> Result<Varnode> {
        let size = self.pointer_size();
        if let Some(address) = self.absolute_address(mem) {
            return Ok(Varnode::constant(address, size));
        }

        let base = match mem.base.as_deref() {
            Some(name) => Some(self.register(name)?),
            None => None,
        };
        let index = match mem.index.as_deref() {
            Some(name) => {
                let index = self.register(name)?;
                Some(if mem.scale > 1 {
                    let scale = Varnode::constant(u64::from(mem.scale), index.size());
                    self.compute(OpCode::IntMult, index.size(), vec![index, scale])
                } else {
                    index
                })
            }
            None => None,
        };

        let mut address = match (base, index) {
            (Some(base), Some(index)) => {
                self.compute(OpCode::IntAdd, base.size(), vec![base, index])
            }
            (Some(base), None) => base,
            (None, Some(index)) => index,
            (None, None) => return Ok(Self::constant(mem.displacement, size)),
        };
        if mem.displacement != 0 {
            let displacement = Self::constant(mem.displacement, address.size());
            address = self.compute(OpCode::IntAdd, address.size(), vec![address, displacement]);
        }
        Ok(address)
    }

    fn resolve(&mut self, mem: &MemoryOperand, size: u32) -> Result<Place> {
        if let Some(displacement) = self.stack_slot(mem) {
            return Ok(Place::Direct(Varnode::stack(displacement, size)));
        }
        if let Some(address) = self.absolute_address(mem) {
            return Ok(Place::Direct(Varnode::ram(address, size)));
        }
        let address = self.address_of(mem)?;
        Ok(Place::Memory { address, size })
    }

    // Reads and writes

    fn read(&mut self, operand: &Operand, size: u32) -> Result<Varnode> {
        match operand {
            Operand::Register(name) => self.register(name),
            Operand::Immediate(value) => Ok(Self::constant(*value, size)),
            Operand::Memory(mem) => {
                let place = self.resolve(mem, mem.size.unwrap_or(size))?;
                Ok(self.read_place(place))
            }
        }
    }

    /// Like [`Self::read`] but narrows vector registers to the scalar width.
    fn read_scalar(&mut self, operand: &Operand, size: u32) -> Result<Varnode> {
        match operand {
            Operand::Register(name) => {
                let register = self.register(name)?;
                Ok(if register.size() > size {
                    register.resized(size)
                } else {
                    register
                })
            }
            _ => self.read(operand, size),
        }
    }

    fn read_place(&mut self, place: Place) -> Varnode {
        match place {
            Place::Direct(varnode) => varnode,
            Place::Memory { address, size } => self.compute(OpCode::Load, size, vec![address]),
        }
    }

    fn place(&mut self, operand: &Operand, size: u32) -> Result<Place> {
        match operand {
            Operand::Register(name) => Ok(Place::Direct(self.register(name)?)),
            Operand::Memory(mem) => self.resolve(mem, mem.size.unwrap_or(size)),
            Operand::Immediate(_) => Err(self.invalid("immediate destination")),
        }
    }

    fn scalar_place(&mut self, operand: &Operand, size: u32) -> Result<Place> {
        match self.place(operand, size)? {
            Place::Direct(register) if register.is_register() && register.size() > size => {
                Ok(Place::Direct(register.resized(size)))
            }
            place => Ok(place),
        }
    }

    /// Emits `opcode` writing `place`; returns the written value.
    fn assign(&mut self, place: Place, opcode: OpCode, inputs: Vec<Varnode>) -> Varnode {
        match place {
            Place::Direct(output) => {
                self.emit(opcode, Some(output), inputs);
                self.widen(output);
                output
            }
            Place::Memory { address, size } => {
                let value = self.compute(opcode, size, inputs);
                self.emit(OpCode::Store, None, vec![address, value]);
                value
            }
        }
    }

    fn store(&mut self, place: Place, value: Varnode) {
        match place {
            Place::Direct(output) => {
                if output != value {
                    self.emit(OpCode::Copy, Some(output), vec![value]);
                }
                self.widen(output);
            }
            Place::Memory { address, .. } => {
                self.emit(OpCode::Store, None, vec![address, value]);
            }
        }
    }

    /// Stores `value`, writing the destination directly from the op that just
    /// produced it when `value` is a fresh temporary.
    fn store_value(&mut self, place: Place, value: Varnode) {
        if let Place::Direct(output) = place {
            if value.is_unique() && value.size() == output.size() {
                if let Some(last) = self.ops.last_mut() {
                    if last.output == Some(value) {
                        last.output = Some(output);
                        self.widen(output);
                        return;
                    }
                }
            }
        }
        self.store(place, value);
    }

    /// Propagates a register write to the full register it is a view of:
    /// zero-extended where the model clears the upper bits, merged otherwise.
    fn widen(&mut self, written: Varnode) {
        if let Some(full) = self.model().widened_on_write(&written) {
            self.emit(OpCode::IntZExt, Some(full), vec![written]);
        } else if let Some(full) = self.model().parent_register(&written) {
            let position = (written.offset() - full.offset()) * 8;
            let bits = u64::from(written.size()) * 8;
            self.emit(
                OpCode::Insert,
                Some(full),
                vec![
                    full,
                    written,
                    Varnode::constant(position, 4),
                    Varnode::constant(bits, 4),
                ],
            );
        }
    }

    // Flags

    fn set_flag(&mut self, flag: Flag, opcode: OpCode, inputs: Vec<Varnode>) {
        if let Some(layout) = self.model().flags() {
            self.emit(opcode, Some(flag.select(&layout)), inputs);
        }
    }

    fn clear_flag(&mut self, flag: Flag) {
        self.set_flag(flag, OpCode::Copy, vec![Varnode::constant(0, 1)]);
    }

    fn result_flags(&mut self, result: Varnode) {
        let zero = Varnode::constant(0, result.size());
        self.set_flag(Flag::Zero, OpCode::IntEqual, vec![result, zero]);
        self.set_flag(Flag::Sign, OpCode::IntSLess, vec![result, zero]);
    }

    /// A 1-byte boolean that is true when `condition` holds.
    fn condition_value(&mut self, condition: Condition) -> Result<Varnode> {
        if let Some(producer) = self.producer {
            if let Some((opcode, swapped)) = condition.direct_compare(producer.kind) {
                let inputs = if swapped {
                    vec![producer.rhs, producer.lhs]
                } else {
                    vec![producer.lhs, producer.rhs]
                };
                return Ok(self.compute(opcode, 1, inputs));
            }
        }

        let layout = self
            .model()
            .flags()
            .ok_or_else(|| self.invalid(&format!("'{condition}' needs a preceding compare")))?;
        let (test, negated) = condition.flag_test();
        let value = match test {
            FlagTest::Flag(flag) => flag.select(&layout),
            FlagTest::Either(a, b) => {
                let inputs = vec![a.select(&layout), b.select(&layout)];
                self.compute(OpCode::BoolOr, 1, inputs)
            }
            FlagTest::SignedLess => {
                self.compute(OpCode::BoolXor, 1, vec![layout.sign, layout.overflow])
            }
            FlagTest::SignedLessEqual => {
                let less = self.compute(OpCode::BoolXor, 1, vec![layout.sign, layout.overflow]);
                self.compute(OpCode::BoolOr, 1, vec![layout.zero, less])
            }
        };

        Ok(if negated {
            self.compute(OpCode::BoolNegate, 1, vec![value])
        } else {
            value
        })
    }

    fn record_compare(&mut self, kind: CompareKind, lhs: Varnode, rhs: Varnode) {
        let next = self.insn.next_address();
        self.translator.flags.set_compare(kind, lhs, rhs, next);
    }

    fn shift_stack(&mut self, delta: i64) {
        let stack = &mut self.translator.stack;
        stack.sp = stack.sp.and_then(|sp| sp.checked_add(delta));
        self.sp_tracked = true;
    }

    fn stack_top(&self, size: u32) -> Place {
        match self.translator.stack.sp {
            Some(sp) => Place::Direct(Varnode::stack(sp, size)),
            None => Place::Memory {
                address: self.model().stack_pointer(),
                size,
            },
        }
    }

    // Data movement

    fn mov(&mut self) -> Result<()> {
        let dst = self.operand(0)?;
        let src = self.operand(1)?;
        let size = self.common_size(&[dst, src]);

        if let (Operand::Register(d), Operand::Register(s)) = (dst, src) {
            let (d, s) = (self.register(d)?, self.register(s)?);
            let sp = self.model().stack_pointer();
            let fp = self.model().frame_pointer();
            if Some(d) == fp && s == sp {
                self.translator.stack.fp = self.translator.stack.sp;
                self.fp_tracked = true;
            } else if d == sp && Some(s) == fp {
                self.translator.stack.sp = self.translator.stack.fp;
                self.sp_tracked = true;
            }
        }

        let value = self.read(src, size)?;
        let place = self.place(dst, size)?;
        self.store_value(place, value);
        Ok(())
    }

    fn extend(&mut self, opcode: OpCode, default_source: u32) -> Result<()> {
        let dst = self.operand(0)?;
        let src = self.operand(1)?;
        let out_size = self.common_size(&[dst]);
        let in_size = self.operand_size(src).unwrap_or(default_source);

        let value = self.read(src, in_size)?;
        let place = self.place(dst, out_size)?;
        match in_size.cmp(&place.size()) {
            std::cmp::Ordering::Less => {
                self.assign(place, opcode, vec![value]);
            }
            std::cmp::Ordering::Equal => self.store(place, value),
            std::cmp::Ordering::Greater => {
                return Err(self.invalid("source wider than destination"));
            }
        }
        Ok(())
    }

    fn lea(&mut self) -> Result<()> {
        let dst = self.operand(0)?;
        let Operand::Memory(mem) = self.operand(1)? else {
            return Err(self.invalid("expected a memory operand"));
        };
        let size = self.common_size(&[dst]);

        let mut address = self.address_of(mem)?;
        if address.size() > size {
            address = self.compute(
                OpCode::SubPiece,
                size,
                vec![address, Varnode::constant(0, 4)],
            );
        }
        let place = self.place(dst, size)?;
        self.store_value(place, address);
        Ok(())
    }

    fn xchg(&mut self) -> Result<()> {
        let a = self.operand(0)?;
        let b = self.operand(1)?;
        let size = self.common_size(&[a, b]);

        let pa = self.place(a, size)?;
        let pb = self.place(b, size)?;
        let va = self.read_place(pa);
        let vb = self.read_place(pb);
        let saved = self.compute(OpCode::Copy, size, vec![va]);
        self.store(pa, vb);
        self.store(pb, saved);
        Ok(())
    }

    fn push(&mut self) -> Result<()> {
        let operand = self.operand(0)?;
        let size = self
            .operand_size(operand)
            .unwrap_or_else(|| self.pointer_size());
        let value = self.read(operand, size)?;

        let sp = self.model().stack_pointer();
        self.emit(
            OpCode::IntSub,
            Some(sp),
            vec![sp, Varnode::constant(u64::from(size), sp.size())],
        );
        self.shift_stack(-i64::from(size));
        let top = self.stack_top(size);
        self.store(top, value);
        Ok(())
    }

    fn pop(&mut self) -> Result<()> {
        let operand = self.operand(0)?;
        let size = self
            .operand_size(operand)
            .unwrap_or_else(|| self.pointer_size());
        self.pop_into(operand, size)
    }

    fn pop_into(&mut self, operand: &Operand, size: u32) -> Result<()> {
        let top = self.stack_top(size);
        let value = self.read_place(top);

        let sp = self.model().stack_pointer();
        self.emit(
            OpCode::IntAdd,
            Some(sp),
            vec![sp, Varnode::constant(u64::from(size), sp.size())],
        );
        self.shift_stack(i64::from(size));

        let place = self.place(operand, size)?;
        self.store(place, value);
        Ok(())
    }

    fn leave(&mut self) -> Result<()> {
        let fp = self
            .model()
            .frame_pointer()
            .ok_or_else(|| self.invalid("model has no frame pointer"))?;
        let sp = self.model().stack_pointer();

        self.emit(OpCode::Copy, Some(sp), vec![fp]);
        self.translator.stack.sp = self.translator.stack.fp;
        self.sp_tracked = true;

        let name = self
            .model()
            .register_name(&fp)
            .ok_or_else(|| self.invalid("unnamed frame pointer"))?;
        self.pop_into(&Operand::Register(name), fp.size())
    }

    // Integer arithmetic

    fn binary(&mut self, opcode: OpCode, effect: FlagEffect) -> Result<()> {
        let (dst, lhs, rhs) = self.binary_operands()?;
        let size = self.common_size(&[dst, lhs, rhs]);

        if matches!(opcode, OpCode::IntXor)
            && matches!(dst, Operand::Register(_))
            && dst == lhs
            && lhs == rhs
        {
            let place = self.place(dst, size)?;
            let zero = self.assign(place, OpCode::Copy, vec![Varnode::constant(0, place.size())]);
            if effect != FlagEffect::None {
                self.clear_flag(Flag::Carry);
                self.clear_flag(Flag::Overflow);
                self.result_flags(zero);
            }
            return Ok(());
        }

        if self.is_stack_pointer(dst) && self.is_stack_pointer(lhs) {
            if let Operand::Immediate(amount) = rhs {
                match opcode {
                    OpCode::IntAdd => self.shift_stack(*amount),
                    OpCode::IntSub => self.shift_stack(amount.wrapping_neg()),
                    _ => {}
                }
            }
        }

        let place = self.place(dst, size)?;
        let a = if lhs == dst {
            self.read_place(place)
        } else {
            self.read(lhs, size)?
        };
        let rhs_size = if effect == FlagEffect::Shift { 1 } else { a.size() };
        let b = self.read(rhs, rhs_size)?;

        match effect {
            FlagEffect::Add => {
                self.set_flag(Flag::Carry, OpCode::IntCarry, vec![a, b]);
                self.set_flag(Flag::Overflow, OpCode::IntSCarry, vec![a, b]);
            }
            FlagEffect::Sub => {
                self.set_flag(Flag::Carry, OpCode::IntLess, vec![a, b]);
                self.set_flag(Flag::Overflow, OpCode::IntSBorrow, vec![a, b]);
            }
            FlagEffect::Logic => {
                self.clear_flag(Flag::Carry);
                self.clear_flag(Flag::Overflow);
            }
            FlagEffect::Shift | FlagEffect::None => {}
        }

        let result = self.assign(place, opcode, vec![a, b]);
        if effect != FlagEffect::None {
            self.result_flags(result);
        }
        Ok(())
    }

    fn add_with_carry(&mut self, opcode: OpCode) -> Result<()> {
        let layout = self
            .model()
            .flags()
            .ok_or_else(|| self.invalid("model has no carry flag"))?;
        let (dst, lhs, rhs) = self.binary_operands()?;
        let size = self.common_size(&[dst, lhs, rhs]);

        let place = self.place(dst, size)?;
        let a = if lhs == dst {
            self.read_place(place)
        } else {
            self.read(lhs, size)?
        };
        let b = self.read(rhs, a.size())?;
        let carry = if a.size() == 1 {
            layout.carry
        } else {
            self.compute(OpCode::IntZExt, a.size(), vec![layout.carry])
        };

        let (carry_op, overflow_op) = match opcode {
            OpCode::IntSub => (OpCode::IntLess, OpCode::IntSBorrow),
            _ => (OpCode::IntCarry, OpCode::IntSCarry),
        };
        let partial = self.compute(opcode, a.size(), vec![a, b]);
        self.set_flag(Flag::Carry, carry_op, vec![a, b]);
        self.set_flag(Flag::Overflow, overflow_op, vec![a, b]);
        let result = self.assign(place, opcode, vec![partial, carry]);
        self.result_flags(result);
        Ok(())
    }

    fn unary(&mut self, mnemonic: &str) -> Result<()> {
        let dst = self.operand(0)?;
        let size = self.common_size(&[dst]);
        let place = self.place(dst, size)?;
        let a = self.read_place(place);
        let one = Varnode::constant(1, a.size());
        let zero = Varnode::constant(0, a.size());

        let result = match mnemonic {
            "inc" => {
                self.set_flag(Flag::Overflow, OpCode::IntSCarry, vec![a, one]);
                self.assign(place, OpCode::IntAdd, vec![a, one])
            }
            "dec" => {
                self.set_flag(Flag::Overflow, OpCode::IntSBorrow, vec![a, one]);
                self.assign(place, OpCode::IntSub, vec![a, one])
            }
            "neg" => {
                self.set_flag(Flag::Carry, OpCode::IntNotEqual, vec![a, zero]);
                self.set_flag(Flag::Overflow, OpCode::IntSBorrow, vec![zero, a]);
                self.assign(place, OpCode::Int2Comp, vec![a])
            }
            _ => {
                self.assign(place, OpCode::IntNegate, vec![a]);
                return Ok(());
            }
        };
        self.result_flags(result);
        Ok(())
    }

    /// `rdx:rax`-style register pair holding a double-width product or dividend.
    fn accumulator(&self, size: u32) -> Result<(Varnode, Option<Varnode>)> {
        let (low, high) = match size {
            8 => ("rax", Some("rdx")),
            4 => ("eax", Some("edx")),
            2 => ("ax", Some("dx")),
            1 => ("al", None),
            _ => return Err(self.invalid(&format!("no {size}-byte accumulator"))),
        };
        let high = match high {
            Some(name) => Some(self.register(name)?),
            None => None,
        };
        Ok((self.register(low)?, high))
    }

    fn widening_multiply(&mut self, signed: bool) -> Result<()> {
        let src = self.operand(0)?;
        let size = self
            .operand_size(src)
            .ok_or_else(|| self.invalid("operand size unknown"))?;
        let (low, high) = self.accumulator(size)?;
        let b = self.read(src, size)?;

        let extend = if signed { OpCode::IntSExt } else { OpCode::IntZExt };
        let wide = size * 2;
        let wa = self.compute(extend, wide, vec![low]);
        let wb = self.compute(extend, wide, vec![b]);

        match high {
            Some(high) => {
                let product = self.compute(OpCode::IntMult, wide, vec![wa, wb]);
                let offset = Varnode::constant(u64::from(size), 4);
                self.assign(
                    Place::Direct(low),
                    OpCode::SubPiece,
                    vec![product, Varnode::constant(0, 4)],
                );
                self.assign(Place::Direct(high), OpCode::SubPiece, vec![product, offset]);
            }
            None => {
                let ax = self.register("ax")?;
                self.assign(Place::Direct(ax), OpCode::IntMult, vec![wa, wb]);
            }
        }
        Ok(())
    }

    fn divide(&mut self, signed: bool) -> Result<()> {
        let src = self.operand(0)?;
        let size = self
            .operand_size(src)
            .ok_or_else(|| self.invalid("operand size unknown"))?;
        let (low, high) = self.accumulator(size)?;
        let divisor = self.read(src, size)?;
        let wide = size * 2;

        let (extend, div, rem) = if signed {
            (OpCode::IntSExt, OpCode::IntSDiv, OpCode::IntSRem)
        } else {
            (OpCode::IntZExt, OpCode::IntDiv, OpCode::IntRem)
        };

        let dividend = match high {
            Some(high) => self.compute(OpCode::Piece, wide, vec![high, low]),
            None => self.register("ax")?,
        };
        let divisor = self.compute(extend, wide, vec![divisor]);
        let quotient = self.compute(div, wide, vec![dividend, divisor]);
        let remainder = self.compute(rem, wide, vec![dividend, divisor]);

        let remainder_register = match high {
            Some(high) => high,
            None => self.register("ah")?,
        };
        let low_byte = Varnode::constant(0, 4);
        self.assign(Place::Direct(low), OpCode::SubPiece, vec![quotient, low_byte]);
        self.assign(
            Place::Direct(remainder_register),
            OpCode::SubPiece,
            vec![remainder, low_byte],
        );
        Ok(())
    }

    fn sign_extend_accumulator(&mut self, from: &str, to: &str) -> Result<()> {
        let source = self.register(from)?;
        let target = self.register(to)?;
        self.assign(Place::Direct(target), OpCode::IntSExt, vec![source]);
        Ok(())
    }

    /// `cdq`/`cqo`: fill `high` with the sign bit of `low`.
    fn sign_fill(&mut self, low: &str, high: &str) -> Result<()> {
        let low = self.register(low)?;
        let high = self.register(high)?;
        let bits = Varnode::constant(u64::from(low.size() * 8 - 1), 1);
        self.assign(Place::Direct(high), OpCode::IntSRight, vec![low, bits]);
        Ok(())
    }

    fn compare(&mut self) -> Result<()> {
        let lhs = self.operand(0)?;
        let rhs = self.operand(1)?;
        let size = self.common_size(&[lhs, rhs]);
        let a = self.read(lhs, size)?;
        let b = self.read(rhs, a.size())?;

        if self.model().flags().is_some() {
            self.set_flag(Flag::Carry, OpCode::IntLess, vec![a, b]);
            self.set_flag(Flag::Overflow, OpCode::IntSBorrow, vec![a, b]);
            self.set_flag(Flag::Zero, OpCode::IntEqual, vec![a, b]);
            let difference = self.compute(OpCode::IntSub, a.size(), vec![a, b]);
            let zero = Varnode::constant(0, a.size());
            self.set_flag(Flag::Sign, OpCode::IntSLess, vec![difference, zero]);
        }
        self.record_compare(CompareKind::Subtract, a, b);
        Ok(())
    }

    fn test(&mut self) -> Result<()> {
        let lhs = self.operand(0)?;
        let rhs = self.operand(1)?;
        let size = self.common_size(&[lhs, rhs]);
        let a = self.read(lhs, size)?;
        let b = self.read(rhs, a.size())?;

        let masked = if a == b {
            a
        } else {
            self.compute(OpCode::IntAnd, a.size(), vec![a, b])
        };
        self.clear_flag(Flag::Carry);
        self.clear_flag(Flag::Overflow);
        self.result_flags(masked);
        self.record_compare(CompareKind::BitTest, masked, Varnode::constant(0, a.size()));
        Ok(())
    }

    // Control flow

    fn code_target(&self, operand: &Operand) -> Option<Varnode> {
        match operand {
            Operand::Immediate(address) => {
                Some(Varnode::ram(*address as u64, self.pointer_size()))
            }
            _ => None,
        }
    }

    fn jump(&mut self) -> Result<()> {
        let target = self.operand(0)?;
        match self.code_target(target) {
            Some(target) => self.emit(OpCode::Branch, None, vec![target]),
            None => {
                let size = self.pointer_size();
                let target = self.read(target, size)?;
                self.emit(OpCode::BranchInd, None, vec![target]);
            }
        }
        Ok(())
    }

    fn call(&mut self) -> Result<()> {
        let target = self.operand(0)?;
        match self.code_target(target) {
            Some(target) => self.emit(OpCode::Call, None, vec![target]),
            None => {
                let size = self.pointer_size();
                let target = self.read(target, size)?;
                self.emit(OpCode::CallInd, None, vec![target]);
            }
        }
        Ok(())
    }

    fn ret(&mut self) -> Result<()> {
        if self.model().return_linkage() == ReturnLinkage::Stack {
            let popped = match self.insn.operands.first() {
                Some(Operand::Immediate(extra)) => *extra,
                _ => 0,
            };
            let amount = i64::from(self.pointer_size()) + popped;
            let sp = self.model().stack_pointer();
            self.emit(
                OpCode::IntAdd,
                Some(sp),
                vec![sp, Self::constant(amount, sp.size())],
            );
            self.shift_stack(amount);
        }
        self.emit(OpCode::Return, None, vec![]);
        Ok(())
    }

    fn jcc(&mut self, condition: Condition) -> Result<()> {
        let target = self.operand(0)?;
        let target = self
            .code_target(target)
            .ok_or_else(|| self.invalid("conditional branch needs a direct target"))?;
        let value = self.condition_value(condition)?;
        self.emit(OpCode::CBranch, None, vec![target, value]);
        Ok(())
    }

    /// `beq a, b, target` and `beqz a, target`.
    fn compare_branch(&mut self, condition: Condition, against_zero: bool) -> Result<()> {
        let lhs = self.operand(0)?;
        let (rhs, target) = if against_zero {
            (None, self.operand(1)?)
        } else {
            (Some(self.operand(1)?), self.operand(2)?)
        };
        let target = self
            .code_target(target)
            .ok_or_else(|| self.invalid("branch needs a direct target"))?;

        let size = match rhs {
            Some(rhs) => self.common_size(&[lhs, rhs]),
            None => self.common_size(&[lhs]),
        };
        let a = self.read(lhs, size)?;
        let b = match rhs {
            Some(rhs) => self.read(rhs, a.size())?,
            None => Varnode::constant(0, a.size()),
        };

        let (opcode, swapped) = condition
            .direct_compare(CompareKind::Subtract)
            .ok_or_else(|| malformed_error!("no direct compare for '{}'", condition))?;
        let inputs = if swapped { vec![b, a] } else { vec![a, b] };
        let value = self.compute(opcode, 1, inputs);
        self.emit(OpCode::CBranch, None, vec![target, value]);
        Ok(())
    }

    fn setcc(&mut self, condition: Condition) -> Result<()> {
        let dst = self.operand(0)?;
        let value = self.condition_value(condition)?;
        let place = self.place(dst, 1)?;
        if place.size() == 1 {
            self.store_value(place, value);
        } else {
            self.assign(place, OpCode::IntZExt, vec![value]);
        }
        Ok(())
    }

    /// `cmovcc dst, src` as the branch-free select `(src & m) | (dst & !m)`.
    fn cmov(&mut self, condition: Condition) -> Result<()> {
        let dst = self.operand(0)?;
        let src = self.operand(1)?;
        let size = self.common_size(&[dst, src]);

        let value = self.condition_value(condition)?;
        let place = self.place(dst, size)?;
        let current = self.read_place(place);
        let size = current.size();
        let source = self.read(src, size)?;

        let flag = if size > 1 {
            self.compute(OpCode::IntZExt, size, vec![value])
        } else {
            value
        };
        let select = self.compute(OpCode::Int2Comp, size, vec![flag]);
        let keep = self.compute(OpCode::IntNegate, size, vec![select]);
        let taken = self.compute(OpCode::IntAnd, size, vec![source, select]);
        let kept = self.compute(OpCode::IntAnd, size, vec![current, keep]);
        self.assign(place, OpCode::IntOr, vec![taken, kept]);
        Ok(())
    }

    // Scalar floating point

    fn float_move(&mut self, size: u32) -> Result<()> {
        let dst = self.operand(0)?;
        let src = self.operand(1)?;
        let value = self.read_scalar(src, size)?;
        let place = self.scalar_place(dst, size)?;
        self.store_value(place, value);
        Ok(())
    }

    fn float_binary(&mut self, opcode: OpCode, size: u32) -> Result<()> {
        let (dst, lhs, rhs) = self.binary_operands()?;
        let place = self.scalar_place(dst, size)?;
        let a = if lhs == dst {
            self.read_place(place)
        } else {
            self.read_scalar(lhs, size)?
        };
        let b = self.read_scalar(rhs, size)?;
        self.assign(place, opcode, vec![a, b]);
        Ok(())
    }

    fn float_unary(&mut self, opcode: OpCode, in_size: u32, out_size: u32) -> Result<()> {
        let dst = self.operand(0)?;
        let src = self.operand(1)?;
        let value = self.read_scalar(src, in_size)?;
        let place = self.scalar_place(dst, out_size)?;
        self.assign(place, opcode, vec![value]);
        Ok(())
    }

    fn int_to_float(&mut self, out_size: u32) -> Result<()> {
        let dst = self.operand(0)?;
        let src = self.operand(1)?;
        let in_size = self.operand_size(src).unwrap_or(4);
        let value = self.read(src, in_size)?;
        let place = self.scalar_place(dst, out_size)?;
        self.assign(place, OpCode::FloatInt2Float, vec![value]);
        Ok(())
    }

    fn float_to_int(&mut self, in_size: u32) -> Result<()> {
        let dst = self.operand(0)?;
        let src = self.operand(1)?;
        let out_size = self.operand_size(dst).unwrap_or(4);
        let value = self.read_scalar(src, in_size)?;
        let place = self.place(dst, out_size)?;
        self.assign(place, OpCode::FloatTrunc, vec![value]);
        Ok(())
    }

    fn float_compare(&mut self, size: u32) -> Result<()> {
        let lhs = self.operand(0)?;
        let rhs = self.operand(1)?;
        let a = self.read_scalar(lhs, size)?;
        let b = self.read_scalar(rhs, size)?;

        if self.model().flags().is_some() {
            self.set_flag(Flag::Zero, OpCode::FloatEqual, vec![a, b]);
            self.set_flag(Flag::Carry, OpCode::FloatLess, vec![a, b]);
            let a_nan = self.compute(OpCode::FloatNan, 1, vec![a]);
            let b_nan = self.compute(OpCode::FloatNan, 1, vec![b]);
            self.set_flag(Flag::Parity, OpCode::BoolOr, vec![a_nan, b_nan]);
            self.clear_flag(Flag::Overflow);
            self.clear_flag(Flag::Sign);
        }
        self.record_compare(CompareKind::Float, a, b);
        Ok(())
    }

    // String moves without a repeat prefix

    fn advance(&mut self, register: &str, size: u32) -> Result<Varnode> {
        let register = self.register(register)?;
        self.emit(
            OpCode::IntAdd,
            Some(register),
            vec![register, Varnode::constant(u64::from(size), register.size())],
        );
        Ok(register)
    }

    fn store_string(&mut self, size: u32) -> Result<()> {
        let (value, _) = self.accumulator(size)?;
        let destination = self.register("rdi")?;
        self.emit(OpCode::Store, None, vec![destination, value]);
        self.advance("rdi", size)?;
        Ok(())
    }

    fn load_string(&mut self, size: u32) -> Result<()> {
        let (target, _) = self.accumulator(size)?;
        let source = self.register("rsi")?;
        self.assign(Place::Direct(target), OpCode::Load, vec![source]);
        self.advance("rsi", size)?;
        Ok(())
    }

    fn move_string(&mut self, size: u32) -> Result<()> {
        let source = self.register("rsi")?;
        let destination = self.register("rdi")?;
        let value = self.compute(OpCode::Load, size, vec![source]);
        self.emit(OpCode::Store, None, vec![destination, value]);
        self.advance("rsi", size)?;
        self.advance("rdi", size)?;
        Ok(())
    }

    fn system(&mut self) -> Result<()> {
        let insn = self.insn;
        let index = self.translator.user_op(&insn.mnemonic);
        let size = self.pointer_size();

        let mut inputs = vec![Varnode::constant(index, 4)];
        for operand in &insn.operands {
            inputs.push(self.read(operand, size)?);
        }
        self.emit(OpCode::CallOther, None, inputs);
        Ok(())
    }
}

/// Element width of a string mnemonic from its suffix.
fn string_width(mnemonic: &str) -> u32 {
    match mnemonic.as_bytes().last() {
        Some(b'w') => 2,
        Some(b'd') => 4,
        Some(b'q') => 8,
        _ => 1,
    }
}
