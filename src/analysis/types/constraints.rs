//! Constraint collection.
//!
//! Every operation contributes two kinds of facts:
//!
//! - [`Candidate`]s: a type some value must have, with the operation that implies it
//! - [`Link`]s: dataflow relations whose types are resolved together
//!
//! Constants never receive candidates and never take part in links; a literal's
//! type is whatever its use implies.

use std::{collections::BTreeMap, fmt};

use crate::{
    analysis::{
        ssa::{SsaFunction, SsaValue},
        types::Type,
    },
    ir::{OpCode, PcodeOp, Varnode},
};

/// Anything inference can assign a type to.
pub trait TypeKey: Copy + Ord + fmt::Debug + fmt::Display {
    /// The storage the key lives in.
    fn storage(&self) -> Varnode;
}

impl TypeKey for SsaValue {
    fn storage(&self) -> Varnode {
        self.varnode()
    }
}

impl TypeKey for Varnode {
    fn storage(&self) -> Varnode {
        *self
    }
}

/// The operation a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reason {
    /// Implying operator
    pub opcode: OpCode,
    /// Address of the implying instruction
    pub address: u64,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at 0x{:x}", self.opcode, self.address)
    }
}

/// A type a value must have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The implied type
    pub ty: Type,
    /// Where it came from
    pub reason: Reason,
}

/// A dataflow relation between values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link<K> {
    /// Both values have the same type
    Same(K, K),
    /// `result` has the join of the input types
    PhiJoin {
        /// The merged value
        result: K,
        /// The merged inputs
        inputs: Vec<K>,
    },
    /// `pointer` points to a value of `value`'s type
    PointsTo {
        /// The address operand
        pointer: K,
        /// The loaded or stored value
        value: K,
    },
    /// `result` is `base` moved by some offset and keeps its pointee
    PointerArith {
        /// The computed address
        result: K,
        /// The base address
        base: K,
    },
}

impl<K: TypeKey> Link<K> {
    /// Every key the link mentions.
    pub fn keys(&self) -> Vec<K> {
        match self {
            Link::Same(a, b) => vec![*a, *b],
            Link::PhiJoin { result, inputs } => {
                std::iter::once(*result).chain(inputs.iter().copied()).collect()
            }
            Link::PointsTo { pointer, value } => vec![*pointer, *value],
            Link::PointerArith { result, base } => vec![*result, *base],
        }
    }
}

/// Candidates and links collected from a function.
#[derive(Debug, Clone)]
pub struct ConstraintSet<K> {
    candidates: BTreeMap<K, Vec<Candidate>>,
    links: Vec<Link<K>>,
    pointer_size: u32,
}

impl<K: TypeKey> ConstraintSet<K> {
    /// An empty set for a target with `pointer_size`-byte pointers.
    #[must_use]
    pub fn new(pointer_size: u32) -> Self {
        Self {
            candidates: BTreeMap::new(),
            links: Vec::new(),
            pointer_size,
        }
    }

    /// Every value mentioned by an operation, with its candidates.
    pub fn candidates(&self) -> &BTreeMap<K, Vec<Candidate>> {
        &self.candidates
    }

    /// Candidates of one value.
    pub fn candidates_of(&self, key: &K) -> &[Candidate] {
        self.candidates.get(key).map_or(&[], Vec::as_slice)
    }

    /// The collected links.
    pub fn links(&self) -> &[Link<K>] {
        &self.links
    }

    /// Registers `key` without constraining it.
    pub fn mention(&mut self, key: K) {
        if !key.storage().is_constant() {
            self.candidates.entry(key).or_default();
        }
    }

    /// Adds a candidate type for `key`.
    pub fn add_candidate(&mut self, key: K, ty: Type, reason: Reason) {
        if key.storage().is_constant() {
            return;
        }
        self.candidates
            .entry(key)
            .or_default()
            .push(Candidate { ty, reason });
    }

    /// Adds a link, dropping constants from it.
    pub fn add_link(&mut self, link: Link<K>) {
        let keep = |k: &K| !k.storage().is_constant();
        let link = match link {
            Link::Same(a, b) if keep(&a) && keep(&b) => Link::Same(a, b),
            Link::PhiJoin { result, inputs } if keep(&result) => Link::PhiJoin {
                result,
                inputs: inputs.into_iter().filter(|k| keep(k)).collect(),
            },
            Link::PointsTo { pointer, value } if keep(&pointer) && keep(&value) => {
                Link::PointsTo { pointer, value }
            }
            Link::PointerArith { result, base } if keep(&result) && keep(&base) => {
                Link::PointerArith { result, base }
            }
            _ => return,
        };
        for key in link.keys() {
            self.mention(key);
        }
        self.links.push(link);
    }

    /// Collects the facts implied by one operation.
    pub fn add_op(&mut self, opcode: OpCode, output: Option<K>, inputs: &[K], address: u64) {
        use OpCode::*;

        let reason = Reason { opcode, address };
        let int = |k: &K| Type::int(k.storage().size());

        if let Some(out) = output {
            self.mention(out);
        }
        // Direct branch and call targets are code addresses, not data
        let data_inputs = match opcode {
            Branch | CBranch | Call => inputs.get(1..).unwrap_or(&[]),
            _ => inputs,
        };
        for &input in data_inputs {
            self.mention(input);
        }

        let all = || output.iter().chain(inputs).copied().collect::<Vec<K>>();

        match opcode {
            Copy | Indirect => {
                if let (Some(out), Some(&src)) = (output, inputs.first()) {
                    self.add_link(Link::Same(out, src));
                }
            }

            Load => {
                if let (Some(out), Some(&pointer)) = (output, inputs.first()) {
                    self.add_candidate(pointer, Type::pointer_to(Type::Unknown), reason);
                    self.add_link(Link::PointsTo {
                        pointer,
                        value: out,
                    });
                }
            }
            Store => {
                if let [pointer, value, ..] = inputs {
                    self.add_candidate(*pointer, Type::pointer_to(Type::Unknown), reason);
                    self.add_link(Link::PointsTo {
                        pointer: *pointer,
                        value: *value,
                    });
                }
            }

            CBranch => {
                if let Some(&condition) = inputs.get(1) {
                    self.add_candidate(condition, Type::Bool, reason);
                }
            }
            CallInd => {
                if let Some(&target) = inputs.first() {
                    let signature = Type::Function {
                        params: Vec::new(),
                        ret: Box::new(Type::Unknown),
                    };
                    self.add_candidate(target, Type::pointer_to(signature), reason);
                }
            }
            MultiEqual => {
                if let Some(out) = output {
                    self.add_link(Link::PhiJoin {
                        result: out,
                        inputs: inputs.to_vec(),
                    });
                }
            }
            Branch | BranchInd | Call | CallOther | Return => {}

            IntEqual | IntNotEqual => {
                self.compare(output, inputs, None, reason);
            }
            IntSLess | IntSLessEqual => {
                self.compare(output, inputs, Some(Type::signed), reason);
            }
            IntLess | IntLessEqual => {
                self.compare(output, inputs, Some(Type::unsigned), reason);
            }
            IntCarry => {
                for &input in inputs {
                    self.add_candidate(input, int(&input), reason);
                }
                self.boolean_output(output, reason);
            }
            IntSCarry | IntSBorrow => {
                for &input in inputs {
                    self.add_candidate(input, Type::signed(input.storage().size()), reason);
                }
                self.boolean_output(output, reason);
            }

            IntAdd | IntSub => {
                for key in all() {
                    self.add_candidate(key, int(&key), reason);
                }
                if let (Some(out), Some(&base)) = (output, inputs.first()) {
                    if inputs.get(1).is_some_and(|k| k.storage().is_constant()) {
                        self.add_link(Link::PointerArith { result: out, base });
                    }
                }
            }
            IntMult | Int2Comp | IntAnd | IntOr | IntXor | IntNegate | IntLeft => {
                for key in all() {
                    self.add_candidate(key, int(&key), reason);
                }
            }
            IntDiv | IntRem | IntRight => {
                self.typed_arith(output, inputs, Type::unsigned, reason);
            }
            IntSDiv | IntSRem | IntSRight => {
                self.typed_arith(output, inputs, Type::signed, reason);
            }

            IntZExt => {
                if let Some(&src) = inputs.first() {
                    self.add_candidate(src, Type::unsigned(src.storage().size()), reason);
                }
                if let Some(out) = output {
                    self.add_candidate(out, int(&out), reason);
                }
            }
            IntSExt => {
                for key in all() {
                    self.add_candidate(key, Type::signed(key.storage().size()), reason);
                }
            }

            BoolNegate | BoolXor | BoolAnd | BoolOr => {
                for key in all() {
                    self.add_candidate(key, Type::Bool, reason);
                }
            }

            FloatEqual | FloatNotEqual | FloatLess | FloatLessEqual | FloatNan => {
                for &input in inputs {
                    self.add_candidate(input, Type::float(input.storage().size()), reason);
                }
                if let [a, b] = inputs {
                    self.add_link(Link::Same(*a, *b));
                }
                self.boolean_output(output, reason);
            }
            FloatAdd | FloatSub | FloatMult | FloatDiv | FloatNeg | FloatAbs | FloatSqrt
            | FloatCeil | FloatFloor | FloatRound | FloatFloat2Float => {
                for key in all() {
                    self.add_candidate(key, Type::float(key.storage().size()), reason);
                }
            }
            FloatInt2Float => {
                if let Some(&src) = inputs.first() {
                    self.add_candidate(src, Type::signed(src.storage().size()), reason);
                }
                if let Some(out) = output {
                    self.add_candidate(out, Type::float(out.storage().size()), reason);
                }
            }
            FloatTrunc => {
                if let Some(&src) = inputs.first() {
                    self.add_candidate(src, Type::float(src.storage().size()), reason);
                }
                if let Some(out) = output {
                    self.add_candidate(out, Type::signed(out.storage().size()), reason);
                }
            }

            PtrAdd => {
                if let Some(&base) = inputs.first() {
                    self.add_candidate(base, Type::pointer_to(Type::Unknown), reason);
                    if let Some(out) = output {
                        self.add_link(Link::PointerArith { result: out, base });
                    }
                }
                for &index in inputs.iter().skip(1) {
                    self.add_candidate(index, int(&index), reason);
                }
            }
            PtrSub => {
                if let Some(&base) = inputs.first() {
                    self.add_candidate(base, Type::pointer_to(Type::Unknown), reason);
                }
                if let Some(out) = output {
                    self.add_candidate(out, Type::pointer_to(Type::Unknown), reason);
                }
            }

            Piece | SubPiece | Insert | Extract | PopCount | LzCount => {
                if let Some(out) = output {
                    self.add_candidate(out, int(&out), reason);
                }
            }
            Cast => {}
        }
    }

    fn compare(
        &mut self,
        output: Option<K>,
        inputs: &[K],
        operand_type: Option<fn(u32) -> Type>,
        reason: Reason,
    ) {
        if let Some(make) = operand_type {
            for &input in inputs {
                self.add_candidate(input, make(input.storage().size()), reason);
            }
        }
        if let [a, b] = inputs {
            self.add_link(Link::Same(*a, *b));
        }
        self.boolean_output(output, reason);
    }

    fn typed_arith(
        &mut self,
        output: Option<K>,
        inputs: &[K],
        make: fn(u32) -> Type,
        reason: Reason,
    ) {
        if let Some(out) = output {
            self.add_candidate(out, make(out.storage().size()), reason);
        }
        if let Some(&first) = inputs.first() {
            self.add_candidate(first, make(first.storage().size()), reason);
        }
        for &other in inputs.iter().skip(1) {
            self.add_candidate(other, Type::int(other.storage().size()), reason);
        }
    }

    fn boolean_output(&mut self, output: Option<K>, reason: Reason) {
        if let Some(out) = output {
            self.add_candidate(out, Type::Bool, reason);
        }
    }

    /// Width in bits of an integer a pointer may stand in for.
    pub fn pointer_bits(&self) -> u32 {
        self.pointer_size * 8
    }
}

impl ConstraintSet<SsaValue> {
    /// Collects constraints from every phi and operation of `ssa`.
    #[must_use]
    pub fn from_ssa(ssa: &SsaFunction, pointer_size: u32) -> Self {
        let mut set = Self::new(pointer_size);
        for (_, block) in ssa.blocks() {
            for phi in block.phis() {
                set.add_link(Link::PhiJoin {
                    result: phi.result(),
                    inputs: phi.operands().iter().map(|o| o.value).collect(),
                });
            }
            for op in block.ops() {
                set.add_op(op.opcode, op.output, &op.inputs, op.address);
            }
        }
        set
    }
}

impl ConstraintSet<Varnode> {
    /// Collects constraints from plain operations, keyed by varnode.
    #[must_use]
    pub fn from_ops(ops: &[PcodeOp], pointer_size: u32) -> Self {
        let mut set = Self::new(pointer_size);
        for op in ops {
            set.add_op(op.opcode, op.output, &op.inputs, op.address);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_division() {
        let r1 = Varnode::register(0, 4);
        let r2 = Varnode::register(8, 4);
        let mut set = ConstraintSet::new(8);
        set.add_op(OpCode::IntSDiv, Some(r1), &[r1, r2], 0x1000);

        assert_eq!(set.candidates_of(&r1)[0].ty, Type::signed(4));
        assert_eq!(set.candidates_of(&r2)[0].ty, Type::int(4));
        assert_eq!(
            set.candidates_of(&r1)[0].reason.to_string(),
            "INT_SDIV at 0x1000"
        );
    }

    #[test]
    fn test_constants_are_not_typed() {
        let r1 = Varnode::register(0, 8);
        let c = Varnode::constant(4, 8);
        let mut set = ConstraintSet::new(8);
        set.add_op(OpCode::Copy, Some(r1), &[c], 0x1000);
        set.add_op(OpCode::IntAdd, Some(r1), &[r1, c], 0x1004);

        assert!(set.candidates_of(&c).is_empty());
        assert!(!set.candidates().contains_key(&c));
        assert!(set.links().iter().all(|l| !l.keys().contains(&c)));
        // Constant offsets still relate the result to its base
        assert_eq!(
            set.links(),
            &[Link::PointerArith {
                result: r1,
                base: r1
            }]
        );
    }

    #[test]
    fn test_memory_access_links() {
        let address = Varnode::register(0, 8);
        let value = Varnode::register(8, 4);
        let mut set = ConstraintSet::new(8);
        set.add_op(OpCode::Load, Some(value), &[address], 0x1000);

        assert_eq!(
            set.candidates_of(&address)[0].ty,
            Type::pointer_to(Type::Unknown)
        );
        assert_eq!(
            set.links(),
            &[Link::PointsTo {
                pointer: address,
                value
            }]
        );
    }

    #[test]
    fn test_branch_targets_are_ignored() {
        let target = Varnode::ram(0x2000, 8);
        let condition = Varnode::unique(0x1_0000, 1);
        let mut set = ConstraintSet::new(8);
        set.add_op(OpCode::CBranch, None, &[target, condition], 0x1000);

        assert!(!set.candidates().contains_key(&target));
        assert_eq!(set.candidates_of(&condition)[0].ty, Type::Bool);
    }
}
