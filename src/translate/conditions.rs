//! Condition codes of flag consumers (`jcc`, `setcc`, `cmovcc`) and
//! compare-and-branch mnemonics.

use strum::{Display, EnumIter};

use crate::{
    ir::{OpCode, Varnode},
    translate::FlagLayout,
};

/// A branch condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Condition {
    /// `OF`
    Overflow,
    /// `!OF`
    NotOverflow,
    /// `CF` (unsigned less)
    Below,
    /// `!CF`
    AboveEqual,
    /// `ZF`
    Equal,
    /// `!ZF`
    NotEqual,
    /// `CF | ZF`
    BelowEqual,
    /// `!CF & !ZF`
    Above,
    /// `SF`
    Sign,
    /// `!SF`
    NotSign,
    /// `PF`
    Parity,
    /// `!PF`
    NotParity,
    /// `SF != OF`
    Less,
    /// `SF == OF`
    GreaterEqual,
    /// `ZF | SF != OF`
    LessEqual,
    /// `!ZF & SF == OF`
    Greater,
}

/// One of the five modeled flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flag {
    Carry,
    Parity,
    Zero,
    Sign,
    Overflow,
}

impl Flag {
    pub(crate) fn select(self, layout: &FlagLayout) -> Varnode {
        match self {
            Flag::Carry => layout.carry,
            Flag::Parity => layout.parity,
            Flag::Zero => layout.zero,
            Flag::Sign => layout.sign,
            Flag::Overflow => layout.overflow,
        }
    }
}

/// How a condition reads the flags, before an optional final negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlagTest {
    /// A single flag
    Flag(Flag),
    /// `a | b`
    Either(Flag, Flag),
    /// `SF ^ OF`
    SignedLess,
    /// `ZF | (SF ^ OF)`
    SignedLessEqual,
}

/// What the most recent flag-setting compare computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareKind {
    /// `cmp a, b`: flags of `a - b`
    Subtract,
    /// `test a, b` lowered as a compare of `a & b` against zero
    BitTest,
    /// `ucomiss` / `ucomisd`
    Float,
}

/// Operands of the compare that last set the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlagProducer {
    pub kind: CompareKind,
    pub lhs: Varnode,
    pub rhs: Varnode,
    /// Address of the instruction immediately following the compare
    pub next: u64,
}

/// Tracks the last compare so an adjacent flag consumer can test its operands
/// directly instead of reassembling the condition from flags.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlagState {
    producer: Option<FlagProducer>,
}

impl FlagState {
    pub(crate) fn set_compare(&mut self, kind: CompareKind, lhs: Varnode, rhs: Varnode, next: u64) {
        self.producer = Some(FlagProducer {
            kind,
            lhs,
            rhs,
            next,
        });
    }

    pub(crate) fn clear(&mut self) {
        self.producer = None;
    }

    /// Takes the producer if the instruction at `address` directly follows it.
    /// The state is cleared either way.
    pub(crate) fn take_for(&mut self, address: u64) -> Option<FlagProducer> {
        self.producer.take().filter(|producer| producer.next == address)
    }
}

impl Condition {
    /// Parses a condition suffix (`e`, `nz`, `ge`, `nbe`, ...).
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Condition> {
        use Condition::*;
        let condition = match suffix {
            "o" => Overflow,
            "no" => NotOverflow,
            "b" | "c" | "nae" => Below,
            "ae" | "nb" | "nc" => AboveEqual,
            "e" | "z" => Equal,
            "ne" | "nz" => NotEqual,
            "be" | "na" => BelowEqual,
            "a" | "nbe" => Above,
            "s" => Sign,
            "ns" => NotSign,
            "p" | "pe" => Parity,
            "np" | "po" => NotParity,
            "l" | "nge" => Less,
            "ge" | "nl" => GreaterEqual,
            "le" | "ng" => LessEqual,
            "g" | "nle" => Greater,
            _ => return None,
        };
        Some(condition)
    }

    /// Condition of a flag-less compare-and-branch mnemonic (`beq`, `bltu`, ...).
    #[must_use]
    pub fn from_compare_branch(mnemonic: &str) -> Option<Condition> {
        use Condition::*;
        let condition = match mnemonic {
            "beq" | "beqz" => Equal,
            "bne" | "bnez" => NotEqual,
            "blt" => Less,
            "bge" => GreaterEqual,
            "bltu" => Below,
            "bgeu" => AboveEqual,
            _ => return None,
        };
        Some(condition)
    }

    /// The opposite condition.
    #[must_use]
    pub const fn negate(self) -> Condition {
        use Condition::*;
        match self {
            Overflow => NotOverflow,
            NotOverflow => Overflow,
            Below => AboveEqual,
            AboveEqual => Below,
            Equal => NotEqual,
            NotEqual => Equal,
            BelowEqual => Above,
            Above => BelowEqual,
            Sign => NotSign,
            NotSign => Sign,
            Parity => NotParity,
            NotParity => Parity,
            Less => GreaterEqual,
            GreaterEqual => Less,
            LessEqual => Greater,
            Greater => LessEqual,
        }
    }

    /// The flag test and whether its result is negated.
    pub(crate) const fn flag_test(self) -> (FlagTest, bool) {
        use Condition::*;
        match self {
            Overflow => (FlagTest::Flag(Flag::Overflow), false),
            NotOverflow => (FlagTest::Flag(Flag::Overflow), true),
            Below => (FlagTest::Flag(Flag::Carry), false),
            AboveEqual => (FlagTest::Flag(Flag::Carry), true),
            Equal => (FlagTest::Flag(Flag::Zero), false),
            NotEqual => (FlagTest::Flag(Flag::Zero), true),
            BelowEqual => (FlagTest::Either(Flag::Carry, Flag::Zero), false),
            Above => (FlagTest::Either(Flag::Carry, Flag::Zero), true),
            Sign => (FlagTest::Flag(Flag::Sign), false),
            NotSign => (FlagTest::Flag(Flag::Sign), true),
            Parity => (FlagTest::Flag(Flag::Parity), false),
            NotParity => (FlagTest::Flag(Flag::Parity), true),
            Less => (FlagTest::SignedLess, false),
            GreaterEqual => (FlagTest::SignedLess, true),
            LessEqual => (FlagTest::SignedLessEqual, false),
            Greater => (FlagTest::SignedLessEqual, true),
        }
    }

    /// A single comparison equivalent to this condition after a compare of
    /// `lhs` and `rhs`.
    ///
    /// Returns the operator and whether its operands are swapped (`rhs, lhs`),
    /// or `None` when the condition needs the flags themselves.
    pub(crate) const fn direct_compare(self, kind: CompareKind) -> Option<(OpCode, bool)> {
        use Condition::*;
        match kind {
            CompareKind::Subtract | CompareKind::BitTest => match self {
                Equal => Some((OpCode::IntEqual, false)),
                NotEqual => Some((OpCode::IntNotEqual, false)),
                Less => Some((OpCode::IntSLess, false)),
                GreaterEqual => Some((OpCode::IntSLessEqual, true)),
                LessEqual => Some((OpCode::IntSLessEqual, false)),
                Greater => Some((OpCode::IntSLess, true)),
                Below => Some((OpCode::IntLess, false)),
                AboveEqual => Some((OpCode::IntLessEqual, true)),
                BelowEqual => Some((OpCode::IntLessEqual, false)),
                Above => Some((OpCode::IntLess, true)),
                // With a zero right-hand side the sign of the difference is the
                // sign of the left operand.
                Sign if matches!(kind, CompareKind::BitTest) => Some((OpCode::IntSLess, false)),
                NotSign if matches!(kind, CompareKind::BitTest) => {
                    Some((OpCode::IntSLessEqual, true))
                }
                _ => None,
            },
            CompareKind::Float => match self {
                Equal => Some((OpCode::FloatEqual, false)),
                NotEqual => Some((OpCode::FloatNotEqual, false)),
                Below => Some((OpCode::FloatLess, false)),
                AboveEqual => Some((OpCode::FloatLessEqual, true)),
                BelowEqual => Some((OpCode::FloatLessEqual, false)),
                Above => Some((OpCode::FloatLess, true)),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_suffix_aliases() {
        assert_eq!(Condition::from_suffix("z"), Some(Condition::Equal));
        assert_eq!(Condition::from_suffix("nae"), Some(Condition::Below));
        assert_eq!(Condition::from_suffix("nle"), Some(Condition::Greater));
        assert_eq!(Condition::from_suffix("po"), Some(Condition::NotParity));
        assert_eq!(Condition::from_suffix("mp"), None);
    }

    #[test]
    fn test_negate_is_involution() {
        for condition in Condition::iter() {
            assert_ne!(condition.negate(), condition);
            assert_eq!(condition.negate().negate(), condition);

            let (test, negated) = condition.flag_test();
            let (other_test, other_negated) = condition.negate().flag_test();
            assert_eq!(test, other_test);
            assert_ne!(negated, other_negated);
        }
    }

    #[test]
    fn test_direct_compare() {
        assert_eq!(
            Condition::Less.direct_compare(CompareKind::Subtract),
            Some((OpCode::IntSLess, false))
        );
        assert_eq!(
            Condition::Above.direct_compare(CompareKind::Subtract),
            Some((OpCode::IntLess, true))
        );
        assert_eq!(Condition::Sign.direct_compare(CompareKind::Subtract), None);
        assert_eq!(
            Condition::Sign.direct_compare(CompareKind::BitTest),
            Some((OpCode::IntSLess, false))
        );
        assert_eq!(Condition::Parity.direct_compare(CompareKind::Float), None);
    }

    #[test]
    fn test_flag_state_requires_adjacency() {
        let a = Varnode::register(0, 8);
        let b = Varnode::constant(10, 8);

        let mut state = FlagState::default();
        state.set_compare(CompareKind::Subtract, a, b, 0x1004);
        assert!(state.take_for(0x1008).is_none());
        assert!(state.take_for(0x1004).is_none());

        state.set_compare(CompareKind::Subtract, a, b, 0x1004);
        let producer = state.take_for(0x1004).unwrap();
        assert_eq!((producer.lhs, producer.rhs), (a, b));
        assert!(state.take_for(0x1004).is_none());
    }

    #[test]
    fn test_compare_branch_mnemonics() {
        assert_eq!(Condition::from_compare_branch("bgeu"), Some(Condition::AboveEqual));
        assert_eq!(Condition::from_compare_branch("bnez"), Some(Condition::NotEqual));
        assert_eq!(Condition::from_compare_branch("b"), None);
    }
}
