//! Type inference.
//!
//! Types are recovered from how values are used: an operand of `INT_SDIV` is a
//! signed integer, the address operand of a `LOAD` is a pointer to whatever is
//! loaded, a `CBRANCH` condition is a boolean. Inference runs in two steps:
//!
//! 1. [`ConstraintSet`] collects [`Candidate`] types and dataflow [`Link`]s from
//!    every operation and phi
//! 2. [`TypeInference`] resolves them to a [`TypeMap`] over the [`Type`] lattice
//!
//! Both steps are generic over the [`TypeKey`]: SSA values when SSA form is
//! available, plain varnodes when it is not.
//!
//! Conflicting evidence never fails inference. The value resolves to
//! [`Type::Unknown`] and a `TypeConflict` diagnostic names both sides.

mod constraints;
mod inference;
mod lattice;

pub use constraints::{Candidate, ConstraintSet, Link, Reason, TypeKey};
pub use inference::{TypeInference, TypeMap};
pub use lattice::{Field, Signedness, Type};
