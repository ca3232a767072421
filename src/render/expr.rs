//! C-like expressions with precedence-aware printing.

use std::fmt;

/// Binary operators, with C precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    /// Binding strength; larger binds tighter.
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 12,
            BinaryOp::Add | BinaryOp::Sub => 11,
            BinaryOp::Shl | BinaryOp::Shr => 10,
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => 9,
            BinaryOp::Equal | BinaryOp::NotEqual => 8,
            BinaryOp::BitAnd => 7,
            BinaryOp::BitXor => 6,
            BinaryOp::BitOr => 5,
            BinaryOp::LogicalAnd => 4,
            BinaryOp::LogicalOr => 3,
        }
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }

    /// The same comparison with its operands swapped.
    pub const fn mirror(self) -> BinaryOp {
        match self {
            BinaryOp::Less => BinaryOp::Greater,
            BinaryOp::LessEqual => BinaryOp::GreaterEqual,
            BinaryOp::Greater => BinaryOp::Less,
            BinaryOp::GreaterEqual => BinaryOp::LessEqual,
            other => other,
        }
    }

    /// The comparison that holds exactly when this one does not.
    pub const fn inverse(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Less => Some(BinaryOp::GreaterEqual),
            BinaryOp::LessEqual => Some(BinaryOp::Greater),
            BinaryOp::Greater => Some(BinaryOp::LessEqual),
            BinaryOp::GreaterEqual => Some(BinaryOp::Less),
            BinaryOp::Equal => Some(BinaryOp::NotEqual),
            BinaryOp::NotEqual => Some(BinaryOp::Equal),
            _ => None,
        }
    }
}

const UNARY_PRECEDENCE: u8 = 14;
const POSTFIX_PRECEDENCE: u8 = 15;

/// An expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A name or literal
    Atom(String),
    /// Prefix operator: `-`, `~`, `!`
    Unary {
        op: &'static str,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `(type)operand`
    Cast {
        ty: String,
        operand: Box<Expr>,
    },
    /// `*(type *)address`
    Deref {
        ty: String,
        address: Box<Expr>,
    },
    /// `name(args)`
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn atom(text: impl Into<String>) -> Expr {
        Expr::Atom(text.into())
    }

    /// An integer literal: small values in decimal, others in hex.
    pub fn literal(value: u64) -> Expr {
        if value < 10 {
            Expr::Atom(value.to_string())
        } else {
            Expr::Atom(format!("0x{value:x}"))
        }
    }

    pub fn unary(op: &'static str, operand: Expr) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn cast(ty: impl Into<String>, operand: Expr) -> Expr {
        Expr::Cast {
            ty: ty.into(),
            operand: Box::new(operand),
        }
    }

    pub fn deref(ty: impl Into<String>, address: Expr) -> Expr {
        Expr::Deref {
            ty: ty.into(),
            address: Box::new(address),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    /// Logical negation, folding into comparisons and double negations.
    #[must_use]
    pub fn negate(self) -> Expr {
        match self {
            Expr::Binary { op, lhs, rhs } => match op.inverse() {
                Some(inverse) => Expr::Binary {
                    op: inverse,
                    lhs,
                    rhs,
                },
                None => Expr::unary("!", Expr::Binary { op, lhs, rhs }),
            },
            Expr::Unary { op: "!", operand } => *operand,
            other => Expr::unary("!", other),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Atom(_) | Expr::Call { .. } => POSTFIX_PRECEDENCE,
            Expr::Unary { .. } | Expr::Cast { .. } | Expr::Deref { .. } => UNARY_PRECEDENCE,
            Expr::Binary { op, .. } => op.precedence(),
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Atom(text) => write!(f, "{text}"),
            Expr::Unary { op, operand } => {
                write!(f, "{op}")?;
                operand.write_operand(f, UNARY_PRECEDENCE)
            }
            Expr::Binary { op, lhs, rhs } => {
                // Left associative: the right operand needs parentheses at equal precedence
                lhs.write_operand(f, op.precedence())?;
                write!(f, " {} ", op.symbol())?;
                rhs.write_operand(f, op.precedence() + 1)
            }
            Expr::Cast { ty, operand } => {
                write!(f, "({ty})")?;
                operand.write_operand(f, UNARY_PRECEDENCE)
            }
            Expr::Deref { ty, address } => {
                write!(f, "*({ty} *)")?;
                address.write_operand(f, UNARY_PRECEDENCE)
            }
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::atom(name)
    }

    #[test]
    fn test_minimal_parentheses() {
        let sum = Expr::binary(BinaryOp::Add, var("a"), var("b"));
        let product = Expr::binary(BinaryOp::Mul, sum.clone(), var("c"));
        assert_eq!(product.to_string(), "(a + b) * c");

        let chained = Expr::binary(BinaryOp::Add, sum.clone(), var("c"));
        assert_eq!(chained.to_string(), "a + b + c");

        let right = Expr::binary(BinaryOp::Sub, var("c"), sum);
        assert_eq!(right.to_string(), "c - (a + b)");
    }

    #[test]
    fn test_negate_comparison() {
        let less = Expr::binary(BinaryOp::Less, var("a"), Expr::literal(10));
        assert_eq!(less.clone().negate().to_string(), "a >= 0xa");
        assert_eq!(less.negate().negate().to_string(), "a < 0xa");

        assert_eq!(BinaryOp::LessEqual.mirror(), BinaryOp::GreaterEqual);
        assert_eq!(BinaryOp::Equal.mirror(), BinaryOp::Equal);

        let flag = var("ZF");
        assert_eq!(flag.clone().negate().to_string(), "!ZF");
        assert_eq!(flag.negate().negate().to_string(), "ZF");
    }

    #[test]
    fn test_deref_and_cast() {
        let address = Expr::binary(BinaryOp::Add, var("rbx"), Expr::literal(8));
        assert_eq!(Expr::deref("int32", address).to_string(), "*(int32 *)(rbx + 8)");
        assert_eq!(Expr::cast("int64", var("eax")).to_string(), "(int64)eax");
        assert_eq!(
            Expr::call("CONCAT", vec![var("edx"), var("eax")]).to_string(),
            "CONCAT(edx, eax)"
        );
    }
}
