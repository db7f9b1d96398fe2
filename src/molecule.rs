//! Molecule emitters.
//!
//! An emitter is the user's handle to one molecule kind: it emits values
//! into the soup of the reaction site the molecule is bound to. Emitters
//! are created unbound; installing a reaction site binds every molecule
//! appearing in the site's reaction inputs exactly once.
//!
//! Two flavors exist: [`Molecule`] (fire and forget) and
//! [`BlockingMolecule`] (the emitter waits on a reply channel served by a
//! reaction body). Both also construct the input/output pattern data used
//! to declare reactions.
//!
//! [`Molecule`]: struct.Molecule.html
//! [`BlockingMolecule`]: struct.BlockingMolecule.html
use std::any::Any;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::bag::{Bag, CountedBag, MolValue, QueueBag};
use crate::errors::{Error, Result};
use crate::pool::{self, Pool};
use crate::reaction::{ConstMatcher, InputDef, InputPattern, OutputDef, OutputPattern, PredFn};
use crate::reply::{ReplyCore, ReplyFuture, ReplySlot, Signal};
use crate::site::SiteCore;

/// Bounds every molecule payload satisfies. Blanket-implemented; users
/// never implement it by hand.
pub trait Payload: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Debug + Send + Sync + 'static> Payload for T {}

static NEXT_UID: AtomicUsize = AtomicUsize::new(0);

// -----------------------------------------------------------------------------
//              - Binding -
// -----------------------------------------------------------------------------
/// The site a molecule belongs to, and its index there. Set exactly once.
#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) site: Arc<SiteCore>,
    pub(crate) index: usize,
}

// -----------------------------------------------------------------------------
//              - Shared emitter core -
// -----------------------------------------------------------------------------
struct MolCore<T> {
    uid: usize,
    name: String,
    blocking: bool,
    bag_factory: Box<dyn Fn() -> Box<dyn Bag> + Send + Sync>,
    binding: RwLock<Option<Binding>>,
    /// Last emitted value of a static molecule, readable while the single
    /// copy is inside a running reaction.
    volatile: Mutex<Option<T>>,
}

impl<T: Payload> MolCore<T> {
    fn new(
        name: &str,
        blocking: bool,
        bag_factory: Box<dyn Fn() -> Box<dyn Bag> + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            blocking,
            bag_factory,
            binding: RwLock::new(None),
            volatile: Mutex::new(None),
        })
    }

    fn require_binding(&self) -> Result<Binding> {
        self.binding
            .read()
            .clone()
            .ok_or_else(|| Error::Unbound(self.name.clone()))
    }

    fn emit_value(&self, value: T, mut mv_for: impl FnMut(Box<dyn Any + Send>) -> MolValue) -> Result<()> {
        let b = self.require_binding()?;
        let is_static = b.site.is_static(b.index);
        SiteCore::emit(&b.site, b.index, mv_for(Box::new(value.clone())))?;
        if is_static {
            *self.volatile.lock() = Some(value);
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
//              - Erased handle -
// -----------------------------------------------------------------------------
/// What a reaction site needs to know about a molecule, with the payload
/// type erased.
pub(crate) trait MolHandle: Send + Sync {
    fn uid(&self) -> usize;
    fn name(&self) -> &str;
    fn is_blocking(&self) -> bool;
    fn make_bag(&self) -> Box<dyn Bag>;
    fn bind(&self, binding: Binding) -> Result<()>;
    fn binding(&self) -> Option<Binding>;
    fn fmt_value(&self, v: &dyn Any) -> String;
}

impl<T: Payload> MolHandle for MolCore<T> {
    fn uid(&self) -> usize {
        self.uid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn make_bag(&self) -> Box<dyn Bag> {
        (self.bag_factory)()
    }

    fn bind(&self, binding: Binding) -> Result<()> {
        let mut slot = self.binding.write();
        if let Some(existing) = &*slot {
            return Err(Error::AlreadyBound {
                molecule: self.name.clone(),
                site: existing.site.name().to_string(),
            });
        }
        *slot = Some(binding);
        Ok(())
    }

    fn binding(&self) -> Option<Binding> {
        self.binding.read().clone()
    }

    fn fmt_value(&self, v: &dyn Any) -> String {
        match v.downcast_ref::<T>() {
            Some(t) => format!("{:?}", t),
            None => "<?>".to_string(),
        }
    }
}

/// An opaque, clonable reference to a molecule of any payload type.
pub struct MoleculeRef {
    pub(crate) h: Arc<dyn MolHandle>,
}

impl MoleculeRef {
    /// Molecule name.
    pub fn name(&self) -> &str {
        self.h.name()
    }

    pub(crate) fn uid(&self) -> usize {
        self.h.uid()
    }
}

impl Clone for MoleculeRef {
    fn clone(&self) -> Self {
        MoleculeRef { h: self.h.clone() }
    }
}

impl PartialEq for MoleculeRef {
    fn eq(&self, other: &Self) -> bool {
        self.h.uid() == other.h.uid()
    }
}

impl Debug for MoleculeRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.h.name())
    }
}

fn erase_pred<T: Payload>(pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> PredFn {
    Arc::new(move |v: &dyn Any| v.downcast_ref::<T>().map_or(false, &pred))
}

// -----------------------------------------------------------------------------
//              - Non-blocking emitter -
// -----------------------------------------------------------------------------
/// Handle to a non-blocking molecule carrying values of type `T`.
pub struct Molecule<T: Payload> {
    core: Arc<MolCore<T>>,
}

impl<T: Payload> Clone for Molecule<T> {
    fn clone(&self) -> Self {
        Molecule {
            core: self.core.clone(),
        }
    }
}

impl<T: Payload> Molecule<T> {
    /// Create an unbound molecule backed by an ordered queue bag.
    pub fn new(name: &str) -> Self {
        Molecule {
            core: MolCore::new(name, false, Box::new(QueueBag::<T>::boxed)),
        }
    }

    /// Create an unbound molecule with a *simple* payload, backed by a
    /// counted bag. Use for unit, small scalars, symbols and the like.
    pub fn simple(name: &str) -> Self
    where
        T: Eq + Hash,
    {
        Molecule {
            core: MolCore::new(name, false, Box::new(CountedBag::<T>::boxed)),
        }
    }

    /// Molecule name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// True once a reaction site consuming this molecule was installed.
    pub fn is_bound(&self) -> bool {
        self.core.binding.read().is_some()
    }

    /// True when site activation classified the molecule as pipelined.
    pub fn is_pipelined(&self) -> bool {
        match self.core.binding.read().as_ref() {
            Some(b) => b.site.is_pipelined(b.index),
            None => false,
        }
    }

    /// True when the molecule is a static molecule of its site.
    pub fn is_static(&self) -> bool {
        match self.core.binding.read().as_ref() {
            Some(b) => b.site.is_static(b.index),
            None => false,
        }
    }

    /// Emit one value into the soup.
    pub fn emit(&self, value: T) -> Result<()> {
        self.core.emit_value(value, MolValue::plain)
    }

    /// Read the last emitted value of a static molecule without consuming
    /// it.
    pub fn volatile_value(&self) -> Result<T> {
        let b = self.core.require_binding()?;
        if !b.site.is_static(b.index) {
            return Err(Error::NotStatic(self.core.name.clone()));
        }
        self.core.volatile.lock().clone().ok_or_else(|| Error::StaticMisuse {
            molecule: self.core.name.clone(),
            detail: "no value emitted yet".to_string(),
        })
    }

    /// Debug dump of the owning site's soup. Forbidden from reaction
    /// threads, where it returns a sentinel string instead.
    pub fn log_soup(&self) -> String {
        log_soup_for(&self.core.name, self.core.binding.read().as_ref())
    }

    /// Observation future: fires at the next emission of this molecule.
    pub fn when_emitted(&self) -> Result<Signal<()>> {
        let b = self.core.require_binding()?;
        Ok(b.site.when_emitted(b.index))
    }

    /// Observation future: fires after the next scheduling attempt
    /// triggered by this molecule, with the molecule name on success and
    /// `None` when no reaction could be matched.
    pub fn when_scheduled(&self) -> Result<Signal<Option<String>>> {
        let b = self.core.require_binding()?;
        Ok(b.site.when_scheduled(b.index))
    }

    /// Emit one value and receive an observation future that fires when a
    /// reaction consumes that copy.
    pub fn emit_until_consumed(&self, value: T) -> Result<Signal<()>> {
        let (sig, hook) = Signal::pair();
        self.core.emit_value(value, move |v| MolValue {
            value: v,
            reply: None,
            on_consumed: Some(hook.clone()),
        })?;
        Ok(sig)
    }

    // --- patterns ---

    /// Input pattern ignoring the value.
    pub fn wildcard(&self) -> InputDef {
        InputDef::new(self.as_ref(), InputPattern::Wildcard)
    }

    /// Input pattern binding the value unconditionally.
    pub fn capture(&self) -> InputDef {
        InputDef::new(self.as_ref(), InputPattern::Capture)
    }

    /// Input pattern matching one constant value.
    pub fn equals(&self, value: T) -> InputDef {
        InputDef::new(self.as_ref(), InputPattern::Constant(ConstMatcher::of(value)))
    }

    /// Input pattern with a per-molecule condition.
    pub fn when(&self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> InputDef {
        InputDef::new(self.as_ref(), InputPattern::Conditional(erase_pred(pred)))
    }

    /// Input pattern with an arbitrary matcher. `irrefutable` declares
    /// that the matcher accepts every value.
    pub fn matching(
        &self,
        pred: impl Fn(&T) -> bool + Send + Sync + 'static,
        irrefutable: bool,
    ) -> InputDef {
        InputDef::new(
            self.as_ref(),
            InputPattern::Other {
                pred: erase_pred(pred),
                irrefutable,
            },
        )
    }

    // --- output declarations ---

    /// Output pattern: this molecule is emitted with a value not known
    /// statically.
    pub fn emits(&self) -> OutputDef {
        OutputDef::new(self.as_ref(), OutputPattern::Other)
    }

    /// Output pattern: this molecule is emitted with a constant value.
    pub fn emits_value(&self, value: T) -> OutputDef {
        OutputDef::new(self.as_ref(), OutputPattern::Constant(ConstMatcher::of(value)))
    }

    /// Erased reference for static declarations and identity checks.
    pub fn as_ref(&self) -> MoleculeRef {
        MoleculeRef {
            h: self.core.clone(),
        }
    }
}

impl<T: Payload> Debug for Molecule<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.core.name)
    }
}

// -----------------------------------------------------------------------------
//              - Blocking emitter -
// -----------------------------------------------------------------------------
/// Handle to a blocking molecule: emitting a value of type `T` suspends
/// the caller until a reaction replies with an `R`.
pub struct BlockingMolecule<T: Payload, R: Send + 'static> {
    core: Arc<MolCore<T>>,
    _reply: PhantomData<fn() -> R>,
}

impl<T: Payload, R: Send + 'static> Clone for BlockingMolecule<T, R> {
    fn clone(&self) -> Self {
        BlockingMolecule {
            core: self.core.clone(),
            _reply: PhantomData,
        }
    }
}

impl<T: Payload, R: Send + 'static> BlockingMolecule<T, R> {
    /// Create an unbound blocking molecule. Blocking molecules always use
    /// queue bags: every emitted copy owns a distinct reply channel.
    pub fn new(name: &str) -> Self {
        BlockingMolecule {
            core: MolCore::new(name, true, Box::new(QueueBag::<T>::boxed)),
            _reply: PhantomData,
        }
    }

    /// Molecule name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// True once a reaction site consuming this molecule was installed.
    pub fn is_bound(&self) -> bool {
        self.core.binding.read().is_some()
    }

    fn emit_value(&self, value: T) -> Result<(Arc<ReplyCore<R>>, Binding)> {
        let b = self.core.require_binding()?;
        let reply = ReplyCore::<R>::new();
        let slot: Arc<dyn ReplySlot> = reply.clone();
        SiteCore::emit(&b.site, b.index, MolValue::blocking(Box::new(value), slot))?;
        Ok((reply, b))
    }

    /// Emit and wait indefinitely for the reply.
    pub fn emit(&self, value: T) -> Result<R> {
        let (reply, b) = self.emit_value(value)?;
        let announce = announcement(&b);
        if let Some((pool, selfb)) = &announce {
            pool.started_blocking_call(*selfb);
        }
        let res = reply.wait();
        if let Some((pool, selfb)) = &announce {
            pool.finished_blocking_call(*selfb);
        }
        res.map_err(|cause| Error::NoReply {
            molecule: self.core.name.clone(),
            cause,
        })
    }

    /// Emit and wait up to `timeout`; `Ok(None)` when no reply arrived in
    /// time. A reply losing the race against the timeout is discarded.
    pub fn emit_timeout(&self, value: T, timeout: Duration) -> Result<Option<R>> {
        let (reply, b) = self.emit_value(value)?;
        let announce = announcement(&b);
        if let Some((pool, selfb)) = &announce {
            pool.started_blocking_call(*selfb);
        }
        let res = reply.wait_timeout(timeout);
        if let Some((pool, selfb)) = &announce {
            pool.finished_blocking_call(*selfb);
        }
        res.map_err(|cause| Error::NoReply {
            molecule: self.core.name.clone(),
            cause,
        })
    }

    /// Emit and return the future end of the reply channel without
    /// blocking.
    pub fn emit_future(&self, value: T) -> Result<ReplyFuture<R>> {
        let (reply, _) = self.emit_value(value)?;
        Ok(ReplyFuture::new(reply, self.core.name.clone()))
    }

    /// Observation future: fires at the next emission of this molecule.
    pub fn when_emitted(&self) -> Result<Signal<()>> {
        let b = self.core.require_binding()?;
        Ok(b.site.when_emitted(b.index))
    }

    /// Debug dump of the owning site's soup. Forbidden from reaction
    /// threads, where it returns a sentinel string instead.
    pub fn log_soup(&self) -> String {
        log_soup_for(&self.core.name, self.core.binding.read().as_ref())
    }

    // --- patterns ---

    /// Input pattern ignoring the value.
    pub fn wildcard(&self) -> InputDef {
        InputDef::new(self.as_ref(), InputPattern::Wildcard)
    }

    /// Input pattern binding the value unconditionally.
    pub fn capture(&self) -> InputDef {
        InputDef::new(self.as_ref(), InputPattern::Capture)
    }

    /// Input pattern matching one constant value.
    pub fn equals(&self, value: T) -> InputDef {
        InputDef::new(self.as_ref(), InputPattern::Constant(ConstMatcher::of(value)))
    }

    /// Input pattern with a per-molecule condition.
    pub fn when(&self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> InputDef {
        InputDef::new(self.as_ref(), InputPattern::Conditional(erase_pred(pred)))
    }

    /// Erased reference for identity checks.
    pub fn as_ref(&self) -> MoleculeRef {
        MoleculeRef {
            h: self.core.clone(),
        }
    }
}

impl<T: Payload, R: Send + 'static> Debug for BlockingMolecule<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/B", self.core.name)
    }
}

/// Which pool to announce a blocking wait on, and whether the wait is
/// self-blocking (the consuming reactions run on the announcing pool).
fn announcement(b: &Binding) -> Option<(Pool, bool)> {
    Pool::current().map(|p| {
        let selfb = b.site.pool().same_pool(&p);
        (p, selfb)
    })
}

fn log_soup_for(name: &str, binding: Option<&Binding>) -> String {
    if pool::in_reaction_thread() {
        return "<soup unavailable inside a reaction>".to_string();
    }
    match binding {
        Some(b) => b.site.render_soup(),
        None => format!("{}: unbound", name),
    }
}

// -----------------------------------------------------------------------------
//              - Staged inputs -
// -----------------------------------------------------------------------------
pub(crate) struct StagedValue {
    pub(crate) molecule: String,
    pub(crate) mol_ix: usize,
    pub(crate) mv: MolValue,
}

/// The input values a reaction body receives: clones of the consumed
/// molecule values, in input-pattern order, plus the reply handles of
/// blocking inputs. Bag state during the body cannot affect this array.
pub struct Inputs {
    staged: Vec<StagedValue>,
}

impl Inputs {
    pub(crate) fn new(staged: Vec<StagedValue>) -> Self {
        Self { staged }
    }

    pub(crate) fn staged(&self) -> &[StagedValue] {
        &self.staged
    }

    pub(crate) fn into_staged(self) -> Vec<StagedValue> {
        self.staged
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// True for a reaction with no inputs (never the case at a site).
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// The value of input `ix`.
    ///
    /// Panics when `ix` is out of range or `T` is not the payload type of
    /// that input; both are programming errors in the reaction body.
    pub fn get<T: Payload>(&self, ix: usize) -> T {
        let s = &self.staged[ix];
        s.mv
            .value
            .downcast_ref::<T>()
            .unwrap_or_else(|| {
                panic!(
                    "input {} ({}) does not carry a {}",
                    ix,
                    s.molecule,
                    std::any::type_name::<T>()
                )
            })
            .clone()
    }

    /// Reply to the blocking input `ix`. Returns `true` iff this was the
    /// first reply and the emitter was still waiting.
    ///
    /// Panics when the input is not blocking or `R` is not its reply
    /// type.
    pub fn reply<R: Send + 'static>(&self, ix: usize, value: R) -> bool {
        let s = &self.staged[ix];
        match &s.mv.reply {
            Some(slot) => match slot.as_any().downcast_ref::<ReplyCore<R>>() {
                Some(core) => core.complete(value),
                None => panic!(
                    "input {} ({}) does not reply with {}",
                    ix,
                    s.molecule,
                    std::any::type_name::<R>()
                ),
            },
            None => panic!("input {} ({}) is not a blocking molecule", ix, s.molecule),
        }
    }
}
