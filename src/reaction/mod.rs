//! Reaction descriptors.
//!
//! A [`Reaction`] is an immutable record: input patterns (with per-molecule
//! conditions folded in), declared output patterns with their surrounding
//! environments, an optional static guard, cross-molecule guards, a body,
//! and flags. Input patterns are plain data interpreted by the matching
//! engine; nothing here depends on host-language pattern matching.
//!
//! Guards arrive already decomposed: the static part carries no input
//! variables, per-molecule conditions live inside the input patterns, and
//! every cross-molecule guard names the sorted input indices it reads.
//!
//! [`Reaction`]: struct.Reaction.html
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::errors::Result;
use crate::molecule::{Inputs, MolHandle, MoleculeRef, Payload};
use crate::pool::Pool;

mod search;
mod shrink;

pub(crate) use search::{build_program, independent_inputs, SearchOp};
pub(crate) use shrink::shrink_outputs;

/// Erased per-molecule predicate.
pub(crate) type PredFn = Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>;
/// Erased cross-molecule predicate over the chosen value tuple.
pub(crate) type CrossPredFn = Arc<dyn Fn(&[&dyn Any]) -> bool + Send + Sync>;
/// Static guard: no input variables.
pub(crate) type GuardFn = Arc<dyn Fn() -> bool + Send + Sync>;
/// Reaction body.
pub(crate) type BodyFn = Arc<dyn Fn(&Inputs) -> Result<()> + Send + Sync>;

// -----------------------------------------------------------------------------
//              - Constants -
// -----------------------------------------------------------------------------
/// A constant input/output value with its matcher and rendering. Two
/// constants are the same iff one's matcher accepts the other's value.
pub struct ConstMatcher {
    value: Arc<dyn Any + Send + Sync>,
    matches: PredFn,
    shows: String,
}

impl ConstMatcher {
    pub(crate) fn of<T: Payload>(value: T) -> Self {
        let shows = format!("{:?}", value);
        let held = Arc::new(value);
        let cmp = held.clone();
        ConstMatcher {
            value: held,
            matches: Arc::new(move |v: &dyn Any| {
                v.downcast_ref::<T>().map_or(false, |x| x == &*cmp)
            }),
            shows,
        }
    }

    pub(crate) fn admits(&self, v: &dyn Any) -> bool {
        (self.matches)(v)
    }

    pub(crate) fn same(&self, other: &ConstMatcher) -> bool {
        (self.matches)(other.value.as_ref())
    }

    pub(crate) fn value(&self) -> &dyn Any {
        self.value.as_ref()
    }

    pub(crate) fn pred(&self) -> PredFn {
        self.matches.clone()
    }

    pub(crate) fn show(&self) -> &str {
        &self.shows
    }
}

impl Clone for ConstMatcher {
    fn clone(&self) -> Self {
        ConstMatcher {
            value: self.value.clone(),
            matches: self.matches.clone(),
            shows: self.shows.clone(),
        }
    }
}

// -----------------------------------------------------------------------------
//              - Input patterns -
// -----------------------------------------------------------------------------
pub(crate) enum InputPattern {
    /// Ignores the value.
    Wildcard,
    /// Binds the value unconditionally.
    Capture,
    /// Matches one constant value.
    Constant(ConstMatcher),
    /// Binds the value subject to a per-molecule condition.
    Conditional(PredFn),
    /// Arbitrary matcher; `irrefutable` declares it accepts everything.
    Other { pred: PredFn, irrefutable: bool },
}

impl InputPattern {
    pub(crate) fn admits(&self, v: &dyn Any) -> bool {
        match self {
            InputPattern::Wildcard | InputPattern::Capture => true,
            InputPattern::Constant(c) => c.admits(v),
            InputPattern::Conditional(p) => p(v),
            InputPattern::Other { pred, .. } => pred(v),
        }
    }

    pub(crate) fn is_refutable(&self) -> bool {
        match self {
            InputPattern::Wildcard | InputPattern::Capture => false,
            InputPattern::Constant(_) | InputPattern::Conditional(_) => true,
            InputPattern::Other { irrefutable, .. } => !irrefutable,
        }
    }

    /// Precedence used for the stable rendering order.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            InputPattern::Wildcard => 0,
            InputPattern::Capture => 1,
            InputPattern::Constant(_) => 2,
            InputPattern::Conditional(_) => 3,
            InputPattern::Other { .. } => 4,
        }
    }

    pub(crate) fn show(&self) -> String {
        match self {
            InputPattern::Wildcard => "_".to_string(),
            InputPattern::Capture => "x".to_string(),
            InputPattern::Constant(c) => format!("={}", c.show()),
            InputPattern::Conditional(_) => "x if ?".to_string(),
            InputPattern::Other { irrefutable, .. } => {
                if *irrefutable {
                    "*".to_string()
                } else {
                    "*?".to_string()
                }
            }
        }
    }

    /// The weaker-than relation: `self` is weaker than `other` iff every
    /// value `other` matches, `self` matches too. Unknown comparisons are
    /// treated as not-weaker.
    pub(crate) fn is_weaker_or_equal(&self, other: &InputPattern) -> bool {
        if !self.is_refutable() {
            return true;
        }
        match (self, other) {
            (InputPattern::Constant(a), InputPattern::Constant(b)) => a.same(b),
            (InputPattern::Conditional(p), InputPattern::Constant(c)) => p(c.value()),
            (InputPattern::Other { pred, .. }, InputPattern::Constant(c)) => pred(c.value()),
            _ => false,
        }
    }

    /// The per-molecule admission condition this pattern contributes to a
    /// pipelined molecule; `None` admits everything.
    pub(crate) fn admission_pred(&self) -> Option<PredFn> {
        match self {
            InputPattern::Wildcard | InputPattern::Capture => None,
            InputPattern::Constant(c) => Some(c.pred()),
            InputPattern::Conditional(p) => Some(p.clone()),
            InputPattern::Other { pred, irrefutable } => {
                if *irrefutable {
                    None
                } else {
                    Some(pred.clone())
                }
            }
        }
    }
}

/// One input of a reaction: a molecule plus its match rule.
pub struct InputDef {
    pub(crate) mol: MoleculeRef,
    pub(crate) pattern: InputPattern,
}

impl InputDef {
    pub(crate) fn new(mol: MoleculeRef, pattern: InputPattern) -> Self {
        Self { mol, pattern }
    }

    fn show(&self) -> String {
        let tag = if self.mol.h.is_blocking() { "/B" } else { "" };
        format!("{}{}({})", self.mol.name(), tag, self.pattern.show())
    }
}

// -----------------------------------------------------------------------------
//              - Output patterns -
// -----------------------------------------------------------------------------
#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) enum OutputEnv {
    /// Clause `clause` of `total` in the chooser block `id`: the emission
    /// happens in exactly one of the clauses.
    ChooserClause { id: usize, clause: usize, total: usize },
    /// Inside a function call: may not happen.
    FuncCall,
    /// Inside a deferred closure: may not happen.
    Lambda,
    /// Inside a loop running at least once: guaranteed.
    AtLeastOnce,
}

pub(crate) enum OutputPattern {
    Constant(ConstMatcher),
    Other,
}

/// One declared output of a reaction: a molecule, what is known about the
/// emitted value, and the environments surrounding the emission.
pub struct OutputDef {
    pub(crate) mol: MoleculeRef,
    pub(crate) pattern: OutputPattern,
    pub(crate) envs: Vec<OutputEnv>,
}

impl OutputDef {
    pub(crate) fn new(mol: MoleculeRef, pattern: OutputPattern) -> Self {
        Self {
            mol,
            pattern,
            envs: Vec::new(),
        }
    }

    /// Mark the emission as happening in clause `clause` (0-based) of a
    /// chooser block with `total` clauses.
    pub fn in_clause(mut self, id: usize, clause: usize, total: usize) -> Self {
        self.envs.push(OutputEnv::ChooserClause { id, clause, total });
        self
    }

    /// Mark the emission as happening inside a function call.
    pub fn in_call(mut self) -> Self {
        self.envs.push(OutputEnv::FuncCall);
        self
    }

    /// Mark the emission as happening inside a deferred closure.
    pub fn in_lambda(mut self) -> Self {
        self.envs.push(OutputEnv::Lambda);
        self
    }

    /// Mark the emission as happening inside a loop that runs at least
    /// once.
    pub fn in_loop(mut self) -> Self {
        self.envs.push(OutputEnv::AtLeastOnce);
        self
    }

    /// True when nothing surrounds the emission that could prevent it.
    pub(crate) fn is_guaranteed(&self) -> bool {
        self.envs
            .iter()
            .all(|e| matches!(e, OutputEnv::AtLeastOnce))
    }

    fn show(&self) -> String {
        match &self.pattern {
            OutputPattern::Constant(c) => format!("{}(={})", self.mol.name(), c.show()),
            OutputPattern::Other => format!("{}(*)", self.mol.name()),
        }
    }
}

impl Clone for OutputDef {
    fn clone(&self) -> Self {
        OutputDef {
            mol: self.mol.clone(),
            pattern: match &self.pattern {
                OutputPattern::Constant(c) => OutputPattern::Constant(c.clone()),
                OutputPattern::Other => OutputPattern::Other,
            },
            envs: self.envs.clone(),
        }
    }
}

// -----------------------------------------------------------------------------
//              - Cross-molecule guards -
// -----------------------------------------------------------------------------
/// A predicate over the values of two or more inputs of one reaction.
pub struct CrossGuard {
    /// Sorted indices of the inputs the guard reads.
    pub(crate) indices: Vec<usize>,
    pub(crate) pred: CrossPredFn,
}

/// Cross guard over two inputs.
pub fn cross2<A: Payload, B: Payload>(
    i: usize,
    j: usize,
    pred: impl Fn(&A, &B) -> bool + Send + Sync + 'static,
) -> CrossGuard {
    let mut indices = vec![i, j];
    indices.sort_unstable();
    let swapped = indices != [i, j];
    CrossGuard {
        indices,
        pred: Arc::new(move |vals: &[&dyn Any]| {
            let (a, b) = if swapped { (vals[1], vals[0]) } else { (vals[0], vals[1]) };
            match (a.downcast_ref::<A>(), b.downcast_ref::<B>()) {
                (Some(a), Some(b)) => pred(a, b),
                _ => false,
            }
        }),
    }
}

/// Cross guard over three inputs. The predicate receives the values in
/// the order given by `(i, j, k)`.
pub fn cross3<A: Payload, B: Payload, C: Payload>(
    i: usize,
    j: usize,
    k: usize,
    pred: impl Fn(&A, &B, &C) -> bool + Send + Sync + 'static,
) -> CrossGuard {
    let given = vec![i, j, k];
    let mut indices = given.clone();
    indices.sort_unstable();
    let slot: Vec<usize> = given
        .iter()
        .map(|ix| indices.iter().position(|s| s == ix).unwrap())
        .collect();
    CrossGuard {
        indices,
        pred: Arc::new(move |vals: &[&dyn Any]| {
            match (
                vals[slot[0]].downcast_ref::<A>(),
                vals[slot[1]].downcast_ref::<B>(),
                vals[slot[2]].downcast_ref::<C>(),
            ) {
                (Some(a), Some(b), Some(c)) => pred(a, b, c),
                _ => false,
            }
        }),
    }
}

// -----------------------------------------------------------------------------
//              - Reaction -
// -----------------------------------------------------------------------------
/// An immutable reaction descriptor. Build with [`reaction`], refine with
/// the builder methods, install with `site`.
///
/// [`reaction`]: fn.reaction.html
pub struct Reaction {
    pub(crate) inputs: Vec<InputDef>,
    pub(crate) outputs: Vec<OutputDef>,
    pub(crate) static_guard: Option<GuardFn>,
    pub(crate) cross_guards: Vec<CrossGuard>,
    pub(crate) body: BodyFn,
    pub(crate) retry: bool,
    pub(crate) pool: Option<Pool>,
}

/// Declare a reaction consuming `inputs` and running `body`.
pub fn reaction<F>(inputs: Vec<InputDef>, body: F) -> Reaction
where
    F: Fn(&Inputs) -> Result<()> + Send + Sync + 'static,
{
    Reaction {
        inputs,
        outputs: Vec::new(),
        static_guard: None,
        cross_guards: Vec::new(),
        body: Arc::new(body),
        retry: false,
        pool: None,
    }
}

impl Reaction {
    /// Declare the outputs the body may emit; used by output shrinking,
    /// livelock detection and static-molecule validation.
    pub fn with_outputs(mut self, outputs: Vec<OutputDef>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Attach a guard with no input variables, evaluated before any
    /// molecule search.
    pub fn with_static_guard(mut self, guard: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.static_guard = Some(Arc::new(guard));
        self
    }

    /// Attach a cross-molecule guard.
    pub fn with_cross_guard(mut self, guard: CrossGuard) -> Self {
        self.cross_guards.push(guard);
        self
    }

    /// Re-inject the inputs and reschedule when the body fails.
    pub fn with_retry(mut self) -> Self {
        self.retry = true;
        self
    }

    /// Run the body on `pool` instead of the site's pool.
    pub fn on_pool(mut self, pool: &Pool) -> Self {
        self.pool = Some(pool.clone());
        self
    }

    /// Stable rendering order of the inputs: by molecule name, then
    /// pattern precedence, then rendered pattern.
    pub(crate) fn sorted_input_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.inputs.len()).collect();
        order.sort_by(|&a, &b| {
            let ia = &self.inputs[a];
            let ib = &self.inputs[b];
            ia.mol
                .name()
                .cmp(ib.mol.name())
                .then(ia.pattern.rank().cmp(&ib.pattern.rank()))
                .then(ia.pattern.show().cmp(&ib.pattern.show()))
        });
        order
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ins: Vec<String> = self
            .sorted_input_order()
            .into_iter()
            .map(|ix| self.inputs[ix].show())
            .collect();
        let outs = if self.outputs.is_empty() {
            "?".to_string()
        } else {
            let parts: Vec<String> = self.outputs.iter().map(|o| o.show()).collect();
            parts.join(" + ")
        };
        write!(f, "{} → {}", ins.join(" + "), outs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::Molecule;

    fn ok_body(_: &Inputs) -> Result<()> {
        Ok(())
    }

    #[test]
    fn weaker_than_table() {
        let wild = InputPattern::Wildcard;
        let cap = InputPattern::Capture;
        let one = InputPattern::Constant(ConstMatcher::of(1));
        let one_too = InputPattern::Constant(ConstMatcher::of(1));
        let two = InputPattern::Constant(ConstMatcher::of(2));
        let pos = InputPattern::Conditional(Arc::new(|v: &dyn std::any::Any| {
            v.downcast_ref::<i32>().map_or(false, |x| *x > 0)
        }));

        assert!(wild.is_weaker_or_equal(&one));
        assert!(cap.is_weaker_or_equal(&pos));
        assert!(one.is_weaker_or_equal(&one_too));
        assert!(!one.is_weaker_or_equal(&two));
        // x > 0 admits 1, so the conditional is weaker than =1 ...
        assert!(pos.is_weaker_or_equal(&one));
        // ... but not weaker than =2 compared against -2.
        let neg = InputPattern::Constant(ConstMatcher::of(-2));
        assert!(!pos.is_weaker_or_equal(&neg));
        // Conditionals against conditionals are unknown: not weaker.
        let also_pos = InputPattern::Conditional(Arc::new(|v: &dyn std::any::Any| {
            v.downcast_ref::<i32>().map_or(false, |x| *x > 0)
        }));
        assert!(!pos.is_weaker_or_equal(&also_pos));
    }

    #[test]
    fn display_order_is_stable() {
        let a = Molecule::<i32>::new("a");
        let b = Molecule::<i32>::new("b");
        // Same reaction declared with inputs in two different orders.
        let r1 = reaction(vec![b.capture(), a.equals(1), a.wildcard()], ok_body);
        let r2 = reaction(vec![a.wildcard(), b.capture(), a.equals(1)], ok_body);
        assert_eq!(r1.to_string(), r2.to_string());
        assert_eq!(r1.to_string(), "a(_) + a(=1) + b(x) → ?");
    }

    #[test]
    fn outputs_render() {
        let a = Molecule::<i32>::new("a");
        let c = Molecule::<i32>::new("c");
        let r = reaction(vec![a.capture()], ok_body).with_outputs(vec![c.emits_value(3)]);
        assert_eq!(r.to_string(), "a(x) → c(=3)");
    }
}
