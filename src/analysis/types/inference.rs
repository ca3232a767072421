//! Constraint resolution.
//!
//! Resolution is a worklist fixed point over the links of a [`ConstraintSet`]:
//!
//! 1. Every value starts from the refinement of its candidates (or from its
//!    baseline type, see [`TypeInference::with_baseline`])
//! 2. A link is re-evaluated whenever one of its values changes, refining the
//!    other side
//! 3. When the queue drains (or the round budget runs out) unconstrained values
//!    become the generic integer of their width and conflicted values `Unknown`
//!
//! Types only ever move up the lattice, so the fixed point is reached in a number
//! of steps bounded by the lattice height, which the pointer depth cap keeps finite.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use crate::{
    analysis::{
        ssa::{SsaFunction, SsaValue},
        types::{ConstraintSet, Link, Reason, Type, TypeKey},
    },
    config::TypeConfig,
    ir::{PcodeOp, Varnode},
    DiagnosticCategory, Diagnostics,
};

/// Resolved types, keyed by SSA value or by varnode.
#[derive(Debug, Clone)]
pub struct TypeMap<K> {
    types: BTreeMap<K, Type>,
    conflicts: BTreeSet<K>,
    pointer_bits: u32,
}

impl<K: TypeKey> TypeMap<K> {
    /// The type of `key`, if inference saw it.
    pub fn get(&self, key: &K) -> Option<&Type> {
        self.types.get(key)
    }

    /// Iterates `(key, type)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Type)> {
        self.types.iter()
    }

    /// Number of typed values.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if nothing was typed.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Values whose constraints disagreed.
    pub fn conflicts(&self) -> &BTreeSet<K> {
        &self.conflicts
    }

    /// Returns `true` if `key` resolved to `Unknown` because of a conflict.
    pub fn is_conflicted(&self, key: &K) -> bool {
        self.conflicts.contains(key)
    }

    /// One type per storage location, joining every value stored there.
    pub fn by_storage(&self) -> BTreeMap<Varnode, Type> {
        let mut folded: BTreeMap<Varnode, Type> = BTreeMap::new();
        for (key, ty) in &self.types {
            folded
                .entry(key.storage())
                .and_modify(|current| *current = current.join(ty, self.pointer_bits))
                .or_insert_with(|| ty.clone());
        }
        folded
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    ty: Type,
    conflict: bool,
    pinned: bool,
}

/// Type inference over a function.
///
/// # Examples
///
/// ```rust
/// use irscope::{
///     analysis::{Type, TypeInference},
///     config::TypeConfig,
///     ir::{OpCode, PcodeOp, Varnode},
///     Diagnostics,
/// };
///
/// let r1 = Varnode::register(0, 4);
/// let r2 = Varnode::register(8, 4);
/// let ops = vec![PcodeOp::new(OpCode::IntSDiv, Some(r1), vec![r1, r2], 0x1000)];
///
/// let types = TypeInference::new(&TypeConfig::default()).infer_ops(&ops, &Diagnostics::new());
/// assert_eq!(types.get(&r1), Some(&Type::signed(4)));
/// assert_eq!(types.get(&r2), Some(&Type::int(4)));
/// ```
#[derive(Debug, Clone)]
pub struct TypeInference<'a, K = SsaValue> {
    config: TypeConfig,
    baseline: Option<&'a TypeMap<K>>,
}

impl<'a, K: TypeKey> TypeInference<'a, K> {
    /// Creates an inference run.
    #[must_use]
    pub fn new(config: &TypeConfig) -> Self {
        Self {
            config: config.clone(),
            baseline: None,
        }
    }

    /// Keeps every concrete type of `previous`.
    ///
    /// Evidence contradicting a baseline type is reported but never replaces it.
    #[must_use]
    pub fn with_baseline(mut self, previous: &'a TypeMap<K>) -> Self {
        self.baseline = Some(previous);
        self
    }

    /// Resolves a collected constraint set.
    pub fn infer(&self, constraints: &ConstraintSet<K>, diagnostics: &Diagnostics) -> TypeMap<K> {
        let mut solver = Solver {
            pointer_bits: constraints.pointer_bits(),
            max_depth: self.config.max_pointer_depth,
            slots: BTreeMap::new(),
            reported: BTreeSet::new(),
            diagnostics,
        };

        if let Some(baseline) = self.baseline {
            for (key, ty) in baseline.iter().filter(|(_, ty)| ty.is_concrete()) {
                solver.slots.insert(
                    *key,
                    Slot {
                        ty: ty.clone(),
                        conflict: false,
                        pinned: true,
                    },
                );
            }
        }

        for (key, candidates) in constraints.candidates() {
            solver.slots.entry(*key).or_default();
            for candidate in candidates {
                solver.refine(*key, &candidate.ty, Some(candidate.reason));
            }
        }

        let evaluations = solver.solve(constraints.links(), self.config.max_iterations);
        let map = solver.finish();
        debug!(
            "inferred {} types ({} conflicts) in {} link evaluations",
            map.len(),
            map.conflicts.len(),
            evaluations
        );
        map
    }
}

impl<'a> TypeInference<'a, SsaValue> {
    /// Infers a type per SSA value.
    pub fn infer_ssa(&self, ssa: &SsaFunction, diagnostics: &Diagnostics) -> TypeMap<SsaValue> {
        let constraints = ConstraintSet::from_ssa(ssa, self.config.pointer_size);
        self.infer(&constraints, diagnostics)
    }
}

impl<'a> TypeInference<'a, Varnode> {
    /// Infers a type per varnode directly from IR, without SSA.
    ///
    /// Every write to a varnode shares one type, so reused registers conflict more
    /// often than under [`TypeInference::infer_ssa`].
    pub fn infer_ops(&self, ops: &[PcodeOp], diagnostics: &Diagnostics) -> TypeMap<Varnode> {
        let constraints = ConstraintSet::from_ops(ops, self.config.pointer_size);
        self.infer(&constraints, diagnostics)
    }
}

struct Solver<'d, K> {
    pointer_bits: u32,
    max_depth: usize,
    slots: BTreeMap<K, Slot>,
    reported: BTreeSet<K>,
    diagnostics: &'d Diagnostics,
}

impl<K: TypeKey> Solver<'_, K> {
    fn type_of(&self, key: &K) -> Type {
        self.slots
            .get(key)
            .map(|slot| slot.ty.clone())
            .unwrap_or_default()
    }

    /// Refines `key` with `ty`. Returns `true` if the slot changed.
    fn refine(&mut self, key: K, ty: &Type, reason: Option<Reason>) -> bool {
        let pointer_bits = self.pointer_bits;
        let max_depth = self.max_depth;
        let slot = self.slots.entry(key).or_default();
        if slot.conflict {
            return false;
        }

        match slot.ty.refine(ty, pointer_bits) {
            Some(refined) => {
                let refined = refined.truncate_pointers(max_depth);
                if refined == slot.ty {
                    false
                } else {
                    slot.ty = refined;
                    true
                }
            }
            None => {
                let previous = slot.ty.clone();
                let changed = if slot.pinned {
                    false
                } else {
                    slot.conflict = true;
                    slot.ty = Type::Unknown;
                    true
                };
                self.report(key, &previous, ty, reason);
                changed
            }
        }
    }

    fn mark_conflict(&mut self, key: K, message: String) -> bool {
        let slot = self.slots.entry(key).or_default();
        let changed = !slot.conflict && !slot.pinned;
        if changed {
            slot.conflict = true;
            slot.ty = Type::Unknown;
        }
        if self.reported.insert(key) {
            warn!("type conflict on {key}: {message}");
            self.diagnostics
                .warning(DiagnosticCategory::TypeConflict, format!("{key}: {message}"));
        }
        changed
    }

    fn report(&mut self, key: K, previous: &Type, incoming: &Type, reason: Option<Reason>) {
        if !self.reported.insert(key) {
            return;
        }
        let message = match reason {
            Some(reason) => format!("{key}: {previous} conflicts with {incoming} from {reason}"),
            None => format!("{key}: {previous} conflicts with {incoming}"),
        };
        warn!("type conflict on {message}");
        match reason {
            Some(reason) => self.diagnostics.warning_at(
                DiagnosticCategory::TypeConflict,
                message,
                reason.address,
            ),
            None => self
                .diagnostics
                .warning(DiagnosticCategory::TypeConflict, message),
        }
    }

    /// Runs the worklist. Returns the number of link evaluations.
    fn solve(&mut self, links: &[Link<K>], max_iterations: usize) -> usize {
        let mut by_key: BTreeMap<K, Vec<usize>> = BTreeMap::new();
        for (index, link) in links.iter().enumerate() {
            for key in link.keys() {
                by_key.entry(key).or_default().push(index);
            }
        }

        let mut worklist: VecDeque<usize> = (0..links.len()).collect();
        let mut queued = vec![true; links.len()];
        let budget = max_iterations.saturating_mul(links.len().max(1));
        let mut evaluations = 0;

        while let Some(index) = worklist.pop_front() {
            queued[index] = false;
            if evaluations >= budget {
                debug!("type inference stopped after {evaluations} link evaluations");
                break;
            }
            evaluations += 1;

            for key in self.apply(&links[index]) {
                for &dependent in by_key.get(&key).map_or(&[][..], Vec::as_slice) {
                    if !queued[dependent] {
                        queued[dependent] = true;
                        worklist.push_back(dependent);
                    }
                }
            }
        }

        evaluations
    }

    /// Evaluates one link. Returns the keys whose types changed.
    fn apply(&mut self, link: &Link<K>) -> Vec<K> {
        let mut changed = Vec::new();
        match link {
            Link::Same(a, b) => {
                let (ta, tb) = (self.type_of(a), self.type_of(b));
                if tb.is_concrete() && self.refine(*a, &tb, None) {
                    changed.push(*a);
                }
                if ta.is_concrete() && self.refine(*b, &ta, None) {
                    changed.push(*b);
                }
            }

            Link::PhiJoin { result, inputs } => {
                let mut joined = Type::Unknown;
                let mut disagreement = None;
                for input in inputs {
                    let ty = self.type_of(input);
                    let next = joined.join(&ty, self.pointer_bits);
                    if joined.is_concrete() && ty.is_concrete() && !next.is_concrete() {
                        disagreement = Some((joined.clone(), ty));
                        break;
                    }
                    joined = next;
                }
                let updated = match disagreement {
                    Some((a, b)) => {
                        self.mark_conflict(*result, format!("merges {a} with {b}"))
                    }
                    None => joined.is_concrete() && self.refine(*result, &joined, None),
                };
                if updated {
                    changed.push(*result);
                }
            }

            Link::PointsTo { pointer, value } => {
                let tv = self.type_of(value);
                if tv.is_concrete() && self.refine(*pointer, &Type::pointer_to(tv), None) {
                    changed.push(*pointer);
                }
                if let Some(pointee) = self.type_of(pointer).pointee() {
                    if pointee.is_concrete() && self.refine(*value, pointee, None) {
                        changed.push(*value);
                    }
                }
            }

            Link::PointerArith { result, base } => {
                let tb = self.type_of(base);
                if tb.is_pointer() && self.refine(*result, &tb, None) {
                    changed.push(*result);
                }
            }
        }
        changed
    }

    fn finish(self) -> TypeMap<K> {
        let mut types = BTreeMap::new();
        let mut conflicts = BTreeSet::new();
        for (key, slot) in self.slots {
            let ty = if slot.conflict {
                conflicts.insert(key);
                Type::Unknown
            } else if slot.ty.is_concrete() {
                slot.ty
            } else {
                Type::int(key.storage().size())
            };
            types.insert(key, ty);
        }
        TypeMap {
            types,
            conflicts,
            pointer_bits: self.pointer_bits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::OpCode;

    fn infer(ops: &[PcodeOp]) -> (TypeMap<Varnode>, Diagnostics) {
        let diagnostics = Diagnostics::new();
        let types = TypeInference::new(&TypeConfig::default()).infer_ops(ops, &diagnostics);
        (types, diagnostics)
    }

    #[test]
    fn test_unconstrained_values_are_generic_ints() {
        let r1 = Varnode::register(8, 8);
        let (types, diagnostics) = infer(&[PcodeOp::new(
            OpCode::Copy,
            Some(r1),
            vec![Varnode::constant(0, 8)],
            0x1000,
        )]);
        assert_eq!(types.get(&r1), Some(&Type::int(8)));
        assert_eq!(types.get(&Varnode::constant(0, 8)), None);
        assert!(!diagnostics.has_any());
    }

    #[test]
    fn test_load_makes_pointer() {
        let address = Varnode::register(0, 8);
        let value = Varnode::register(8, 4);
        let (types, _) = infer(&[
            PcodeOp::new(OpCode::Load, Some(value), vec![address], 0x1000),
            PcodeOp::new(OpCode::IntSExt, Some(Varnode::register(16, 8)), vec![value], 0x1004),
        ]);
        assert_eq!(types.get(&value), Some(&Type::signed(4)));
        assert_eq!(
            types.get(&address),
            Some(&Type::pointer_to(Type::signed(4)))
        );
    }

    #[test]
    fn test_store_through_pointer_types_value() {
        let address = Varnode::register(0, 8);
        let value = Varnode::register(8, 4);
        let loaded = Varnode::register(16, 4);
        let (types, _) = infer(&[
            PcodeOp::new(OpCode::Store, None, vec![address, value], 0x1000),
            PcodeOp::new(OpCode::Load, Some(loaded), vec![address], 0x1004),
            PcodeOp::new(OpCode::FloatAdd, Some(loaded), vec![loaded, loaded], 0x1008),
        ]);
        assert_eq!(types.get(&value), Some(&Type::float(4)));
    }

    #[test]
    fn test_conflict_resolves_to_unknown() {
        let r1 = Varnode::register(0, 8);
        let (types, diagnostics) = infer(&[
            PcodeOp::new(OpCode::Load, Some(Varnode::register(8, 8)), vec![r1], 0x1000),
            PcodeOp::new(OpCode::FloatAdd, Some(r1), vec![r1, r1], 0x1004),
        ]);
        assert_eq!(types.get(&r1), Some(&Type::Unknown));
        assert!(types.is_conflicted(&r1));
        let conflicts = diagnostics.by_category(DiagnosticCategory::TypeConflict);
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn test_baseline_is_kept() {
        let r1 = Varnode::register(0, 8);
        let first = [PcodeOp::new(OpCode::FloatAdd, Some(r1), vec![r1, r1], 0x1000)];
        let config = TypeConfig::default();
        let diagnostics = Diagnostics::new();
        let baseline = TypeInference::new(&config).infer_ops(&first, &diagnostics);
        assert_eq!(baseline.get(&r1), Some(&Type::float(8)));

        let mut more = first.to_vec();
        more.push(PcodeOp::new(OpCode::Load, Some(Varnode::register(8, 8)), vec![r1], 0x1004));
        let types = TypeInference::new(&config)
            .with_baseline(&baseline)
            .infer_ops(&more, &diagnostics);

        assert_eq!(types.get(&r1), Some(&Type::float(8)));
        assert!(!types.is_conflicted(&r1));
        assert_eq!(
            diagnostics
                .by_category(DiagnosticCategory::TypeConflict)
                .len(),
            1
        );
    }

    #[test]
    fn test_pointer_depth_is_capped() {
        let config = TypeConfig {
            max_pointer_depth: 2,
            ..TypeConfig::default()
        };
        let p0 = Varnode::register(0, 8);
        let p1 = Varnode::register(8, 8);
        let p2 = Varnode::register(16, 8);
        let v = Varnode::register(24, 4);
        let ops = [
            PcodeOp::new(OpCode::Load, Some(p1), vec![p0], 0x1000),
            PcodeOp::new(OpCode::Load, Some(p2), vec![p1], 0x1004),
            PcodeOp::new(OpCode::Load, Some(v), vec![p2], 0x1008),
            PcodeOp::new(OpCode::IntSExt, Some(Varnode::register(32, 8)), vec![v], 0x100c),
        ];
        let types = TypeInference::new(&config).infer_ops(&ops, &Diagnostics::new());
        assert_eq!(
            types.get(&p2),
            Some(&Type::pointer_to(Type::signed(4)))
        );
        assert!(types.get(&p0).is_some_and(|t| t.pointer_depth() <= 2));
    }

    #[test]
    fn test_by_storage_joins_generations() {
        let r1 = Varnode::register(0, 4);
        let mut constraints = ConstraintSet::new(8);
        let reason = Reason {
            opcode: OpCode::IntSDiv,
            address: 0x1000,
        };
        constraints.add_candidate(SsaValue::new(r1, 1), Type::signed(4), reason);
        constraints.add_candidate(SsaValue::new(r1, 2), Type::unsigned(4), reason);
        let types = TypeInference::new(&TypeConfig::default())
            .infer(&constraints, &Diagnostics::new());

        assert_eq!(types.by_storage().get(&r1), Some(&Type::int(4)));
    }
}
