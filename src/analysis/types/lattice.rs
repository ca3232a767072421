//! The type lattice.
//!
//! [`Type::Unknown`] is the bottom element: nothing is known about the value. Every
//! other variant is concrete. Inference moves a value upward with
//! [`Type::refine`], which keeps the more specific of two compatible types and
//! fails on incompatible ones; control flow merges use [`Type::join`], which keeps
//! only what both inputs agree on.
//!
//! Integers carry a [`Signedness`]. `Unspecified` is the generic fixed-width
//! integer and is less specific than either `Signed` or `Unsigned`; a pointer is
//! more specific than an unspecified integer of pointer width, and [`Type::Bool`]
//! is more specific than an unspecified byte.

use std::fmt;

use strum::Display;

/// Sign interpretation of an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Signedness {
    /// Two's complement signed
    Signed,
    /// Unsigned
    Unsigned,
    /// Used only with sign-agnostic operations
    Unspecified,
}

/// A named member of a [`Type::Struct`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Byte offset from the start of the record
    pub offset: u64,
    /// Field type
    pub ty: Type,
}

/// An inferred type.
///
/// # Examples
///
/// ```rust
/// use irscope::analysis::{Signedness, Type};
///
/// let generic = Type::int(4);
/// let signed = Type::Int { bits: 32, signedness: Signedness::Signed };
/// assert_eq!(generic.to_string(), "int32");
/// assert_eq!(generic.refine(&signed, 64), Some(signed.clone()));
/// assert_eq!(signed.join(&Type::Unknown, 64), signed);
/// assert_eq!(Type::Float { bits: 64 }.refine(&signed, 64), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Type {
    /// Nothing is known
    #[default]
    Unknown,
    /// No value
    Void,
    /// The 1-byte result of a comparison
    Bool,
    /// Fixed-width integer
    Int {
        /// Width in bits
        bits: u32,
        /// Sign interpretation
        signedness: Signedness,
    },
    /// IEEE floating point
    Float {
        /// Width in bits
        bits: u32,
    },
    /// Pointer to the inner type
    Pointer(Box<Type>),
    /// Fixed-length array
    Array(Box<Type>, u64),
    /// Record of named fields
    Struct(Vec<Field>),
    /// Function signature
    Function {
        /// Parameter types in order
        params: Vec<Type>,
        /// Return type
        ret: Box<Type>,
    },
}

impl Type {
    /// The generic integer of `size` bytes.
    #[must_use]
    pub const fn int(size: u32) -> Type {
        Type::Int {
            bits: size * 8,
            signedness: Signedness::Unspecified,
        }
    }

    /// A signed integer of `size` bytes.
    #[must_use]
    pub const fn signed(size: u32) -> Type {
        Type::Int {
            bits: size * 8,
            signedness: Signedness::Signed,
        }
    }

    /// An unsigned integer of `size` bytes.
    #[must_use]
    pub const fn unsigned(size: u32) -> Type {
        Type::Int {
            bits: size * 8,
            signedness: Signedness::Unsigned,
        }
    }

    /// A float of `size` bytes.
    #[must_use]
    pub const fn float(size: u32) -> Type {
        Type::Float { bits: size * 8 }
    }

    /// A pointer to `inner`.
    #[must_use]
    pub fn pointer_to(inner: Type) -> Type {
        Type::Pointer(Box::new(inner))
    }

    /// Returns `true` for everything except [`Type::Unknown`].
    #[must_use]
    pub const fn is_concrete(&self) -> bool {
        !matches!(self, Type::Unknown)
    }

    /// Returns `true` for pointers.
    #[must_use]
    pub const fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// The pointee of a pointer.
    #[must_use]
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// Number of directly nested pointer levels.
    #[must_use]
    pub fn pointer_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Type::Pointer(inner) = current {
            depth += 1;
            current = inner;
        }
        depth
    }

    /// Replaces everything below `max_depth` pointer levels with `Unknown`.
    #[must_use]
    pub fn truncate_pointers(&self, max_depth: usize) -> Type {
        match self {
            Type::Pointer(_) if max_depth == 0 => Type::Unknown,
            Type::Pointer(inner) => Type::pointer_to(inner.truncate_pointers(max_depth - 1)),
            other => other.clone(),
        }
    }

    /// Combines two candidates for the same value, keeping the more specific.
    ///
    /// Returns `None` when the candidates are incompatible. `pointer_bits` is the
    /// width of an integer a pointer may stand in for.
    #[must_use]
    pub fn refine(&self, other: &Type, pointer_bits: u32) -> Option<Type> {
        use Type::*;
        match (self, other) {
            (a, b) if a == b => Some(a.clone()),
            (Unknown, t) | (t, Unknown) => Some(t.clone()),

            (
                Int {
                    bits: a,
                    signedness: sa,
                },
                Int {
                    bits: b,
                    signedness: sb,
                },
            ) if a == b => match (sa, sb) {
                (Signedness::Unspecified, s) | (s, Signedness::Unspecified) => Some(Int {
                    bits: *a,
                    signedness: *s,
                }),
                _ => None,
            },

            (Bool, Int { bits: 8, signedness })
            | (Int { bits: 8, signedness }, Bool)
                if *signedness == Signedness::Unspecified =>
            {
                Some(Bool)
            }

            (Pointer(p), Int { bits, signedness }) | (Int { bits, signedness }, Pointer(p))
                if *bits == pointer_bits && *signedness == Signedness::Unspecified =>
            {
                Some(Pointer(p.clone()))
            }

            (Pointer(a), Pointer(b)) => Some(Type::pointer_to(a.refine(b, pointer_bits)?)),

            (Array(a, n), Array(b, m)) if n == m => {
                Some(Array(Box::new(a.refine(b, pointer_bits)?), *n))
            }

            (Struct(a), Struct(b)) if same_layout(a, b) => {
                let fields = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| {
                        Some(Field {
                            name: x.name.clone(),
                            offset: x.offset,
                            ty: x.ty.refine(&y.ty, pointer_bits)?,
                        })
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(Struct(fields))
            }

            (
                Function {
                    params: pa,
                    ret: ra,
                },
                Function {
                    params: pb,
                    ret: rb,
                },
            ) if pa.len() == pb.len() => {
                let params = pa
                    .iter()
                    .zip(pb)
                    .map(|(x, y)| x.refine(y, pointer_bits))
                    .collect::<Option<Vec<_>>>()?;
                Some(Function {
                    params,
                    ret: Box::new(ra.refine(rb, pointer_bits)?),
                })
            }

            _ => None,
        }
    }

    /// The most specific common supertype of two types merged at a join.
    ///
    /// `Unknown` on either side contributes nothing. Incompatible types join to
    /// `Unknown`.
    #[must_use]
    pub fn join(&self, other: &Type, pointer_bits: u32) -> Type {
        use Type::*;
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (Unknown, t) | (t, Unknown) => t.clone(),

            (Int { bits: a, .. }, Int { bits: b, .. }) if a == b => Type::int(a / 8),

            (Bool, Int { bits: 8, .. }) | (Int { bits: 8, .. }, Bool) => Type::int(1),

            (Pointer(_), Int { bits, .. }) | (Int { bits, .. }, Pointer(_))
                if *bits == pointer_bits =>
            {
                Type::int(pointer_bits / 8)
            }

            (Pointer(a), Pointer(b)) => Type::pointer_to(a.join(b, pointer_bits)),

            (Array(a, n), Array(b, m)) if n == m => Array(Box::new(a.join(b, pointer_bits)), *n),

            _ => Unknown,
        }
    }
}

fn same_layout(a: &[Field], b: &[Field]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.offset == y.offset && x.name == y.name)
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unknown => write!(f, "unknown"),
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Int {
                bits,
                signedness: Signedness::Unspecified,
            } => write!(f, "int{bits}"),
            Type::Int {
                bits,
                signedness: Signedness::Signed,
            } => write!(f, "sint{bits}"),
            Type::Int {
                bits,
                signedness: Signedness::Unsigned,
            } => write!(f, "uint{bits}"),
            Type::Float { bits } => write!(f, "float{bits}"),
            Type::Pointer(inner) => write!(f, "{inner}*"),
            Type::Array(elem, len) => write!(f, "{elem}[{len}]"),
            Type::Struct(fields) => {
                write!(f, "struct {{")?;
                for field in fields {
                    write!(f, " {} {} @{:#x};", field.ty, field.name, field.offset)?;
                }
                write!(f, " }}")
            }
            Type::Function { params, ret } => {
                write!(f, "{ret} (")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refine_integers() {
        assert_eq!(Type::int(4).refine(&Type::signed(4), 64), Some(Type::signed(4)));
        assert_eq!(Type::unsigned(4).refine(&Type::int(4), 64), Some(Type::unsigned(4)));
        assert_eq!(Type::signed(4).refine(&Type::unsigned(4), 64), None);
        assert_eq!(Type::int(4).refine(&Type::int(8), 64), None);
        assert_eq!(Type::Bool.refine(&Type::int(1), 64), Some(Type::Bool));
        assert_eq!(Type::Bool.refine(&Type::signed(1), 64), None);
    }

    #[test]
    fn test_pointer_refines_pointer_sized_int() {
        let ptr = Type::pointer_to(Type::signed(4));
        assert_eq!(Type::int(8).refine(&ptr, 64), Some(ptr.clone()));
        assert_eq!(Type::int(4).refine(&ptr, 64), None);
        assert_eq!(Type::unsigned(8).refine(&ptr, 64), None);
        assert_eq!(
            Type::pointer_to(Type::Unknown).refine(&ptr, 64),
            Some(ptr.clone())
        );
        assert_eq!(
            Type::pointer_to(Type::float(4)).refine(&ptr, 64),
            None
        );
    }

    #[test]
    fn test_join() {
        assert_eq!(Type::signed(4).join(&Type::unsigned(4), 64), Type::int(4));
        assert_eq!(Type::signed(4).join(&Type::signed(4), 64), Type::signed(4));
        assert_eq!(Type::Unknown.join(&Type::float(8), 64), Type::float(8));
        assert_eq!(Type::float(8).join(&Type::int(8), 64), Type::Unknown);
        assert_eq!(
            Type::pointer_to(Type::Bool).join(&Type::int(8), 64),
            Type::int(8)
        );
    }

    #[test]
    fn test_composites() {
        let a = Type::Array(Box::new(Type::int(4)), 4);
        let b = Type::Array(Box::new(Type::signed(4)), 4);
        assert_eq!(a.refine(&b, 64), Some(b.clone()));
        assert_eq!(a.refine(&Type::Array(Box::new(Type::int(4)), 5), 64), None);

        let record = |ty: Type| {
            Type::Struct(vec![Field {
                name: "count".into(),
                offset: 0,
                ty,
            }])
        };
        assert_eq!(
            record(Type::int(4)).refine(&record(Type::unsigned(4)), 64),
            Some(record(Type::unsigned(4)))
        );

        let callee = Type::Function {
            params: vec![Type::int(8)],
            ret: Box::new(Type::Unknown),
        };
        let known = Type::Function {
            params: vec![Type::pointer_to(Type::Unknown)],
            ret: Box::new(Type::Void),
        };
        assert_eq!(callee.refine(&known, 64), Some(known.clone()));
    }

    #[test]
    fn test_pointer_depth() {
        let deep = Type::pointer_to(Type::pointer_to(Type::pointer_to(Type::int(1))));
        assert_eq!(deep.pointer_depth(), 3);
        assert_eq!(
            deep.truncate_pointers(2),
            Type::pointer_to(Type::pointer_to(Type::Unknown))
        );
        assert_eq!(deep.truncate_pointers(5), deep);
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::int(8).to_string(), "int64");
        assert_eq!(Type::signed(4).to_string(), "sint32");
        assert_eq!(Type::pointer_to(Type::unsigned(1)).to_string(), "uint8*");
        assert_eq!(Type::Array(Box::new(Type::float(4)), 3).to_string(), "float32[3]");
        assert_eq!(
            Type::Function {
                params: vec![Type::int(8), Type::Bool],
                ret: Box::new(Type::Void)
            }
            .to_string(),
            "void (int64, bool)"
        );
    }
}
