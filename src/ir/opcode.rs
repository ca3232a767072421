//! The operator catalog.
//!
//! Every operator declares its input arity, whether it writes an output, which
//! size relation holds between its varnodes, and a set of behavioral flags. The
//! catalog is closed: adding an operator means adding a variant here and a row to
//! each of the tables below.

use std::fmt;

use bitflags::bitflags;
use strum::{Display, EnumIter};

bitflags! {
    /// Behavioral properties of an operator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpFlags: u16 {
        /// Transfers control to an explicit target
        const BRANCH = 0x0001;
        /// Calls a subroutine and resumes at the next instruction
        const CALL = 0x0002;
        /// Ends a basic block
        const TERMINATOR = 0x0004;
        /// Inputs may be swapped
        const COMMUTATIVE = 0x0008;
        /// Output is a one-byte boolean
        const BOOLEAN_OUTPUT = 0x0010;
        /// Operates on floating point values
        const FLOAT = 0x0020;
        /// Only appears after SSA construction
        const SSA_ONLY = 0x0040;
        /// Reads or writes memory
        const MEMORY = 0x0080;
    }
}

/// How many inputs an operator takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many inputs
    Fixed(usize),
    /// At least this many inputs
    AtLeast(usize),
}

impl Arity {
    /// Returns `true` if `count` inputs satisfy this arity.
    #[must_use]
    pub const fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// Whether an operator writes an output varnode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRule {
    /// An output is mandatory
    Required,
    /// An output is not allowed
    Forbidden,
    /// An output may be present (calls with a return value)
    Optional,
}

/// Size relation between an operator's inputs and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
    /// All inputs and the output have one common size
    SameAsInputs,
    /// Output is one byte; paired inputs share a size
    Boolean,
    /// Output is strictly larger than the input
    Extend,
    /// Output is not larger than the input
    Truncate,
    /// Output has the size of the first input; the shift amount is free
    Shift,
    /// No size relation is enforced
    Free,
}

/// Operator of a [`PcodeOp`](crate::ir::PcodeOp).
///
/// Display names are the uppercase P-code mnemonics.
///
/// # Examples
///
/// ```rust
/// use irscope::ir::{Arity, OpCode, OpFlags};
///
/// assert_eq!(OpCode::IntSLessEqual.to_string(), "INT_SLESSEQUAL");
/// assert_eq!(OpCode::MultiEqual.arity(), Arity::AtLeast(1));
/// assert!(OpCode::CBranch.flags().contains(OpFlags::TERMINATOR));
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum OpCode {
    #[strum(to_string = "COPY")]
    Copy,
    #[strum(to_string = "LOAD")]
    Load,
    #[strum(to_string = "STORE")]
    Store,

    #[strum(to_string = "BRANCH")]
    Branch,
    #[strum(to_string = "CBRANCH")]
    CBranch,
    #[strum(to_string = "BRANCHIND")]
    BranchInd,
    #[strum(to_string = "CALL")]
    Call,
    #[strum(to_string = "CALLIND")]
    CallInd,
    #[strum(to_string = "CALLOTHER")]
    CallOther,
    #[strum(to_string = "RETURN")]
    Return,

    #[strum(to_string = "INT_EQUAL")]
    IntEqual,
    #[strum(to_string = "INT_NOTEQUAL")]
    IntNotEqual,
    #[strum(to_string = "INT_SLESS")]
    IntSLess,
    #[strum(to_string = "INT_SLESSEQUAL")]
    IntSLessEqual,
    #[strum(to_string = "INT_LESS")]
    IntLess,
    #[strum(to_string = "INT_LESSEQUAL")]
    IntLessEqual,

    #[strum(to_string = "INT_ADD")]
    IntAdd,
    #[strum(to_string = "INT_SUB")]
    IntSub,
    #[strum(to_string = "INT_MULT")]
    IntMult,
    #[strum(to_string = "INT_DIV")]
    IntDiv,
    #[strum(to_string = "INT_SDIV")]
    IntSDiv,
    #[strum(to_string = "INT_REM")]
    IntRem,
    #[strum(to_string = "INT_SREM")]
    IntSRem,
    #[strum(to_string = "INT_2COMP")]
    Int2Comp,

    #[strum(to_string = "INT_AND")]
    IntAnd,
    #[strum(to_string = "INT_OR")]
    IntOr,
    #[strum(to_string = "INT_XOR")]
    IntXor,
    #[strum(to_string = "INT_NEGATE")]
    IntNegate,
    #[strum(to_string = "INT_LEFT")]
    IntLeft,
    #[strum(to_string = "INT_RIGHT")]
    IntRight,
    #[strum(to_string = "INT_SRIGHT")]
    IntSRight,

    #[strum(to_string = "INT_ZEXT")]
    IntZExt,
    #[strum(to_string = "INT_SEXT")]
    IntSExt,

    #[strum(to_string = "INT_CARRY")]
    IntCarry,
    #[strum(to_string = "INT_SCARRY")]
    IntSCarry,
    #[strum(to_string = "INT_SBORROW")]
    IntSBorrow,

    #[strum(to_string = "BOOL_NEGATE")]
    BoolNegate,
    #[strum(to_string = "BOOL_XOR")]
    BoolXor,
    #[strum(to_string = "BOOL_AND")]
    BoolAnd,
    #[strum(to_string = "BOOL_OR")]
    BoolOr,

    #[strum(to_string = "FLOAT_EQUAL")]
    FloatEqual,
    #[strum(to_string = "FLOAT_NOTEQUAL")]
    FloatNotEqual,
    #[strum(to_string = "FLOAT_LESS")]
    FloatLess,
    #[strum(to_string = "FLOAT_LESSEQUAL")]
    FloatLessEqual,
    #[strum(to_string = "FLOAT_NAN")]
    FloatNan,
    #[strum(to_string = "FLOAT_ADD")]
    FloatAdd,
    #[strum(to_string = "FLOAT_SUB")]
    FloatSub,
    #[strum(to_string = "FLOAT_MULT")]
    FloatMult,
    #[strum(to_string = "FLOAT_DIV")]
    FloatDiv,
    #[strum(to_string = "FLOAT_NEG")]
    FloatNeg,
    #[strum(to_string = "FLOAT_ABS")]
    FloatAbs,
    #[strum(to_string = "FLOAT_SQRT")]
    FloatSqrt,
    #[strum(to_string = "FLOAT_CEIL")]
    FloatCeil,
    #[strum(to_string = "FLOAT_FLOOR")]
    FloatFloor,
    #[strum(to_string = "FLOAT_ROUND")]
    FloatRound,
    #[strum(to_string = "FLOAT_INT2FLOAT")]
    FloatInt2Float,
    #[strum(to_string = "FLOAT_FLOAT2FLOAT")]
    FloatFloat2Float,
    #[strum(to_string = "FLOAT_TRUNC")]
    FloatTrunc,

    #[strum(to_string = "MULTIEQUAL")]
    MultiEqual,
    #[strum(to_string = "INDIRECT")]
    Indirect,

    #[strum(to_string = "PIECE")]
    Piece,
    #[strum(to_string = "SUBPIECE")]
    SubPiece,
    #[strum(to_string = "CAST")]
    Cast,
    #[strum(to_string = "PTRADD")]
    PtrAdd,
    #[strum(to_string = "PTRSUB")]
    PtrSub,
    #[strum(to_string = "INSERT")]
    Insert,
    #[strum(to_string = "EXTRACT")]
    Extract,
    #[strum(to_string = "POPCOUNT")]
    PopCount,
    #[strum(to_string = "LZCOUNT")]
    LzCount,
}

impl OpCode {
    /// Input arity.
    #[must_use]
    pub const fn arity(self) -> Arity {
        use OpCode::*;
        match self {
            MultiEqual => Arity::AtLeast(1),
            Call | CallInd | CallOther => Arity::AtLeast(1),
            Return => Arity::AtLeast(0),

            Copy | Load | Branch | BranchInd | Int2Comp | IntNegate | IntZExt | IntSExt
            | BoolNegate | FloatNan | FloatNeg | FloatAbs | FloatSqrt | FloatCeil
            | FloatFloor | FloatRound | FloatInt2Float | FloatFloat2Float | FloatTrunc | Cast
            | PopCount | LzCount => Arity::Fixed(1),

            PtrAdd | Extract => Arity::Fixed(3),
            Insert => Arity::Fixed(4),

            Store | CBranch | IntEqual | IntNotEqual | IntSLess | IntSLessEqual | IntLess
            | IntLessEqual | IntAdd | IntSub | IntMult | IntDiv | IntSDiv | IntRem | IntSRem
            | IntAnd | IntOr | IntXor | IntLeft | IntRight | IntSRight | IntCarry | IntSCarry
            | IntSBorrow | BoolXor | BoolAnd | BoolOr | FloatEqual | FloatNotEqual
            | FloatLess | FloatLessEqual | FloatAdd | FloatSub | FloatMult | FloatDiv
            | Indirect | Piece | SubPiece | PtrSub => Arity::Fixed(2),
        }
    }

    /// Output presence.
    #[must_use]
    pub const fn output(self) -> OutputRule {
        use OpCode::*;
        match self {
            Store | Branch | CBranch | BranchInd | Return => OutputRule::Forbidden,
            Call | CallInd | CallOther => OutputRule::Optional,
            _ => OutputRule::Required,
        }
    }

    /// Size relation between inputs and output.
    #[must_use]
    pub const fn size_rule(self) -> SizeRule {
        use OpCode::*;
        match self {
            Copy | IntAdd | IntSub | IntMult | IntDiv | IntSDiv | IntRem | IntSRem | Int2Comp
            | IntAnd | IntOr | IntXor | IntNegate | FloatAdd | FloatSub | FloatMult | FloatDiv
            | FloatNeg | FloatAbs | FloatSqrt | FloatCeil | FloatFloor | FloatRound
            | MultiEqual => SizeRule::SameAsInputs,

            IntEqual | IntNotEqual | IntSLess | IntSLessEqual | IntLess | IntLessEqual
            | IntCarry | IntSCarry | IntSBorrow | BoolNegate | BoolXor | BoolAnd | BoolOr
            | FloatEqual | FloatNotEqual | FloatLess | FloatLessEqual | FloatNan => {
                SizeRule::Boolean
            }

            IntZExt | IntSExt => SizeRule::Extend,
            SubPiece => SizeRule::Truncate,
            IntLeft | IntRight | IntSRight => SizeRule::Shift,

            Load | Store | Branch | CBranch | BranchInd | Call | CallInd | CallOther | Return
            | FloatInt2Float | FloatFloat2Float | FloatTrunc | Indirect | Piece | Cast
            | PtrAdd | PtrSub | Insert | Extract | PopCount | LzCount => SizeRule::Free,
        }
    }

    /// Behavioral flags.
    #[must_use]
    pub const fn flags(self) -> OpFlags {
        use OpCode::*;
        match self {
            Branch | CBranch | BranchInd => OpFlags::BRANCH.union(OpFlags::TERMINATOR),
            Return => OpFlags::TERMINATOR,
            Call | CallInd => OpFlags::CALL,
            Load | Store => OpFlags::MEMORY,

            IntEqual | IntNotEqual => OpFlags::BOOLEAN_OUTPUT.union(OpFlags::COMMUTATIVE),
            IntSLess | IntSLessEqual | IntLess | IntLessEqual | IntSBorrow | BoolNegate => {
                OpFlags::BOOLEAN_OUTPUT
            }
            IntCarry | IntSCarry | BoolXor | BoolAnd | BoolOr => {
                OpFlags::BOOLEAN_OUTPUT.union(OpFlags::COMMUTATIVE)
            }

            IntAdd | IntMult | IntAnd | IntOr | IntXor => OpFlags::COMMUTATIVE,

            FloatEqual | FloatNotEqual => OpFlags::FLOAT
                .union(OpFlags::BOOLEAN_OUTPUT)
                .union(OpFlags::COMMUTATIVE),
            FloatLess | FloatLessEqual | FloatNan => {
                OpFlags::FLOAT.union(OpFlags::BOOLEAN_OUTPUT)
            }
            FloatAdd | FloatMult => OpFlags::FLOAT.union(OpFlags::COMMUTATIVE),
            FloatSub | FloatDiv | FloatNeg | FloatAbs | FloatSqrt | FloatCeil | FloatFloor
            | FloatRound | FloatInt2Float | FloatFloat2Float | FloatTrunc => OpFlags::FLOAT,

            MultiEqual | Indirect => OpFlags::SSA_ONLY,

            Copy | CallOther | IntSub | IntDiv | IntSDiv | IntRem | IntSRem | Int2Comp
            | IntNegate | IntLeft | IntRight | IntSRight | IntZExt | IntSExt | Piece
            | SubPiece | Cast | PtrAdd | PtrSub | Insert | Extract | PopCount | LzCount => {
                OpFlags::empty()
            }
        }
    }

    /// Returns `true` if this operator ends a basic block.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        self.flags().contains(OpFlags::TERMINATOR)
    }

    /// Returns `true` for integer and float comparisons.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            IntEqual
                | IntNotEqual
                | IntSLess
                | IntSLessEqual
                | IntLess
                | IntLessEqual
                | FloatEqual
                | FloatNotEqual
                | FloatLess
                | FloatLessEqual
        )
    }
}
