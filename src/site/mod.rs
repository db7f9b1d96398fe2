//! Reaction sites.
//!
//! A site owns the bags for every molecule appearing in the inputs of its
//! reactions, and everything that happens to them: emission (with the
//! pipelined admission rule and the static-molecule discipline), scheduling
//! attempts on the pool's scheduler thread, atomic consumption of matched
//! inputs, dispatch of reaction bodies to worker pools, and the
//! observation futures used by tests.
//!
//! Installing a site runs the static analysis: binding checks, shadowing
//! and indeterminism detection, pipelineability classification, admission
//! predicates, match plans with their search programs, and livelock
//! detection.
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::bag::{Bag, MolValue};
use crate::errors::{Error, Result};
use crate::molecule::{Binding, Inputs, MolHandle, MoleculeRef, StagedValue};
use crate::pool::{self, Pool, ReactionContext};
use crate::reaction::{shrink_outputs, InputPattern, PredFn, Reaction};
use crate::reply::{ReplyCore, Signal};
use crate::reporter::{LogReporter, ReportEvent, Reporter};

mod matching;

use matching::MatchPlan;

// -----------------------------------------------------------------------------
//              - Per-molecule site data -
// -----------------------------------------------------------------------------
enum Admission {
    /// Some consuming pattern is irrefutable: everything is admitted.
    Always,
    /// Admit a value iff at least one condition accepts it.
    Any(Vec<PredFn>),
}

struct SiteMeta {
    handle: Arc<dyn MolHandle>,
    name: String,
    is_static: bool,
    pipelined: bool,
    admission: Admission,
}

struct RxRuntime {
    rx: Reaction,
    plan: MatchPlan,
    label: String,
    /// Site molecule indices of the static inputs.
    consumed_statics: Vec<usize>,
}

struct SiteState {
    bags: Vec<Box<dyn Bag>>,
    when_emitted: Vec<Vec<Arc<ReplyCore<()>>>>,
    when_scheduled: Vec<Vec<Arc<ReplyCore<Option<String>>>>>,
}

struct Dispatch {
    rr: Arc<RxRuntime>,
    staged: Vec<StagedValue>,
}

// -----------------------------------------------------------------------------
//              - Site core -
// -----------------------------------------------------------------------------
pub(crate) struct SiteCore {
    name: String,
    pool: Pool,
    reporter: Arc<dyn Reporter>,
    mols: Vec<SiteMeta>,
    pipelined_flags: Vec<bool>,
    reactions: Vec<Arc<RxRuntime>>,
    state: Mutex<SiteState>,
    rng: Mutex<StdRng>,
}

impl SiteCore {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    pub(crate) fn is_static(&self, index: usize) -> bool {
        self.mols[index].is_static
    }

    pub(crate) fn is_pipelined(&self, index: usize) -> bool {
        self.mols[index].pipelined
    }

    pub(crate) fn when_emitted(&self, index: usize) -> Signal<()> {
        let (sig, core) = Signal::pair();
        self.state.lock().when_emitted[index].push(core);
        sig
    }

    pub(crate) fn when_scheduled(&self, index: usize) -> Signal<Option<String>> {
        let (sig, core) = Signal::pair();
        self.state.lock().when_scheduled[index].push(core);
        sig
    }

    pub(crate) fn render_soup(&self) -> String {
        let st = self.state.lock();
        let mut parts = Vec::new();
        for (ix, meta) in self.mols.iter().enumerate() {
            let values = st.bags[ix].render();
            if !values.is_empty() {
                parts.push(format!("{}: {}", meta.name, values));
            }
        }
        format!("{} soup [{}]", self.name, parts.join("; "))
    }

    /// Add a value to the soup and schedule a matching attempt. Called
    /// from emitters on arbitrary threads.
    pub(crate) fn emit(site: &Arc<SiteCore>, index: usize, mv: MolValue) -> Result<()> {
        if !site.pool.is_active() {
            return Err(Error::Inactive(site.pool.name().to_string()));
        }
        let meta = &site.mols[index];
        if meta.is_static {
            // Only a thread whose running reaction consumed this static
            // (or the site init block) may emit it, once.
            let verdict = pool::with_reaction_context(|ctx| match ctx {
                Some(ctx) => match ctx.statics.get_mut(&meta.handle.uid()) {
                    Some(budget) if *budget > 0 => {
                        *budget -= 1;
                        Ok(())
                    }
                    _ => Err(format!(
                        "emitted by {{{}}}, which did not consume it or already re-emitted it",
                        ctx.reaction
                    )),
                },
                None => Err("emitted outside a reaction that consumed it".to_string()),
            });
            if let Err(detail) = verdict {
                return Err(Error::StaticMisuse {
                    molecule: meta.name.clone(),
                    detail,
                });
            }
        }
        {
            let mut st = site.state.lock();
            if meta.pipelined {
                if let Admission::Any(conditions) = &meta.admission {
                    if !conditions.iter().any(|p| p(mv.value.as_ref())) {
                        let value = meta.handle.fmt_value(mv.value.as_ref());
                        drop(st);
                        site.reporter.report(ReportEvent::PipelinedRefused {
                            molecule: meta.name.clone(),
                            value,
                        });
                        return Ok(());
                    }
                }
            }
            st.bags[index].add(mv);
            for hook in st.when_emitted[index].drain(..) {
                hook.complete(());
            }
        }
        Self::schedule(site, Some(index));
        Ok(())
    }

    fn schedule(site: &Arc<SiteCore>, trigger: Option<usize>) {
        let me = site.clone();
        if site
            .pool
            .run_scheduler(move || SiteCore::scheduling_attempt(&me, trigger))
            .is_err()
        {
            debug!("{}: scheduling attempt dropped, pool shut down", site.name);
        }
    }

    /// One scheduling attempt: drop stale blocking values, then keep
    /// matching and dispatching until no reaction is runnable, then
    /// resolve when-scheduled watchers.
    fn scheduling_attempt(site: &Arc<SiteCore>, trigger: Option<usize>) {
        Self::sweep_stale(site);
        let mut dispatched = false;
        while let Some(found) = Self::find_and_consume(site) {
            dispatched = true;
            Self::dispatch(site, found);
        }
        if let Some(trigger) = trigger {
            let hooks: Vec<Arc<ReplyCore<Option<String>>>> = {
                let mut st = site.state.lock();
                st.when_scheduled[trigger].drain(..).collect()
            };
            if !hooks.is_empty() {
                let outcome = if dispatched {
                    Some(site.mols[trigger].name.clone())
                } else {
                    None
                };
                for hook in hooks {
                    hook.complete(outcome.clone());
                }
            }
        }
    }

    /// Remove blocking values whose emitters stopped waiting. Match
    /// search skips them anyway; this keeps them from piling up.
    fn sweep_stale(site: &Arc<SiteCore>) {
        let mut st = site.state.lock();
        for bag in st.bags.iter_mut() {
            let stale: Vec<usize> = (0..bag.count())
                .filter(|&ix| bag.probe(ix).map_or(false, |p| p.stale))
                .collect();
            if !stale.is_empty() {
                bag.remove_picks(&stale);
            }
        }
    }

    /// Find one runnable reaction and atomically remove its inputs.
    /// Reactions are tried in random order: every runnable reaction has
    /// the same chance of being picked.
    fn find_and_consume(site: &Arc<SiteCore>) -> Option<Dispatch> {
        let mut st = site.state.lock();
        let mut order: Vec<usize> = (0..site.reactions.len()).collect();
        order.shuffle(&mut *site.rng.lock());
        for rix in order {
            let rr = &site.reactions[rix];
            if let Some(guard) = &rr.rx.static_guard {
                if !guard() {
                    continue;
                }
            }
            let picks = match matching::try_match(&rr.rx, &rr.plan, &st.bags, &site.pipelined_flags)
            {
                Some(picks) => picks,
                None => continue,
            };

            // Remove every chosen value, grouped per bag so multi-input
            // removal stays atomic with respect to index shift.
            let mut per_mol: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
            for (input_ix, &bag_ix) in picks.iter().enumerate() {
                per_mol
                    .entry(rr.plan.mol_of_input[input_ix])
                    .or_default()
                    .push((input_ix, bag_ix));
            }
            let mut staged: Vec<Option<StagedValue>> = picks.iter().map(|_| None).collect();
            for (mol, entries) in per_mol {
                let bag_ixs: Vec<usize> = entries.iter().map(|&(_, bag_ix)| bag_ix).collect();
                let removed = st.bags[mol].remove_picks(&bag_ixs);
                for ((input_ix, _), mv) in entries.into_iter().zip(removed) {
                    staged[input_ix] = Some(StagedValue {
                        molecule: site.mols[mol].name.clone(),
                        mol_ix: mol,
                        mv,
                    });
                }
            }
            return Some(Dispatch {
                rr: rr.clone(),
                staged: staged.into_iter().map(|s| s.unwrap()).collect(),
            });
        }
        None
    }

    fn dispatch(site: &Arc<SiteCore>, found: Dispatch) {
        let Dispatch { rr, staged } = found;
        site.reporter.report(ReportEvent::ReactionScheduled {
            site: site.name.clone(),
            reaction: rr.label.clone(),
        });
        let pool = match &rr.rx.pool {
            Some(pool) => pool.clone(),
            None => site.pool.clone(),
        };
        let me = site.clone();
        let label = rr.label.clone();
        if pool
            .run_reaction(label, move || SiteCore::run_body(&me, &rr, staged))
            .is_err()
        {
            debug!("{}: dispatch dropped, pool shut down", site.name);
        }
    }

    fn run_body(site: &Arc<SiteCore>, rr: &Arc<RxRuntime>, staged: Vec<StagedValue>) {
        let mut statics: HashMap<usize, usize> = HashMap::new();
        for &mol in &rr.consumed_statics {
            *statics.entry(site.mols[mol].handle.uid()).or_insert(0) += 1;
        }
        let previous = pool::swap_reaction_context(Some(ReactionContext {
            reaction: rr.label.clone(),
            statics,
        }));
        site.reporter.report(ReportEvent::ReactionStarted {
            reaction: rr.label.clone(),
        });

        let inputs = Inputs::new(staged);
        let outcome: Result<()> = match catch_unwind(AssertUnwindSafe(|| (rr.rx.body)(&inputs))) {
            Ok(result) => result,
            Err(panic) => Err(Error::ReactionFailed(panic_message(panic))),
        };

        let context = pool::swap_reaction_context(previous);
        let retrying = outcome.is_err() && rr.rx.retry;

        if retrying {
            // Replies stay pending: the rerun may still serve them. A
            // static the body already re-emitted must not come back twice.
            if let Err(error) = &outcome {
                site.reporter.report(ReportEvent::ReactionFailed {
                    reaction: rr.label.clone(),
                    error: error.to_string(),
                    retried: true,
                });
            }
            let unspent_statics: HashSet<usize> = context
                .map(|c| {
                    c.statics
                        .into_iter()
                        .filter(|&(_, owed)| owed > 0)
                        .map(|(uid, _)| uid)
                        .collect()
                })
                .unwrap_or_default();
            Self::reinject(site, inputs.into_staged(), &unspent_statics);
            return;
        }

        let cause = outcome.as_ref().err().map(|e| e.to_string());
        for staged in inputs.staged() {
            if let Some(slot) = &staged.mv.reply {
                if slot.unreplied() {
                    site.reporter.report(ReportEvent::ReplyNeverSent {
                        reaction: rr.label.clone(),
                        molecule: staged.molecule.clone(),
                    });
                    slot.close_no_reply(cause.clone());
                }
            }
        }
        if let Some(context) = context {
            for (uid, owed) in context.statics {
                if owed != 0 {
                    let name = site
                        .mols
                        .iter()
                        .find(|m| m.handle.uid() == uid)
                        .map(|m| m.name.clone())
                        .unwrap_or_default();
                    site.reporter.report(ReportEvent::StaticMisused {
                        molecule: name,
                        detail: format!("consumed by {{{}}} but not re-emitted", rr.label),
                    });
                }
            }
        }
        match outcome {
            Ok(()) => site.reporter.report(ReportEvent::ReactionFinished {
                reaction: rr.label.clone(),
            }),
            Err(error) => site.reporter.report(ReportEvent::ReactionFailed {
                reaction: rr.label.clone(),
                error: error.to_string(),
                retried: false,
            }),
        }
    }

    /// Put staged inputs back into their bags after a failed body with
    /// the retry flag. Blocking values whose emitter is gone are dropped,
    /// as are statics the body managed to re-emit before failing.
    fn reinject(site: &Arc<SiteCore>, staged: Vec<StagedValue>, unspent_statics: &HashSet<usize>) {
        {
            let mut st = site.state.lock();
            for s in staged {
                let meta = &site.mols[s.mol_ix];
                if meta.is_static && !unspent_statics.contains(&meta.handle.uid()) {
                    continue;
                }
                let keep = match &s.mv.reply {
                    Some(slot) => slot.unreplied(),
                    None => true,
                };
                if keep {
                    st.bags[s.mol_ix].add(s.mv);
                }
            }
        }
        Self::schedule(site, None);
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "reaction body panicked".to_string()
    }
}

// -----------------------------------------------------------------------------
//              - Public handle and builder -
// -----------------------------------------------------------------------------
/// An installed reaction site.
pub struct Site {
    core: Arc<SiteCore>,
}

impl Site {
    /// Start building a site bound to `pool`.
    pub fn builder(pool: &Pool) -> SiteBuilder {
        SiteBuilder {
            pool: pool.clone(),
            name: None,
            reactions: Vec::new(),
            statics: Vec::new(),
            init: None,
            reporter: Arc::new(LogReporter),
            seed: None,
        }
    }

    /// Site name.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Debug dump of the soup.
    pub fn log_soup(&self) -> String {
        if pool::in_reaction_thread() {
            return "<soup unavailable inside a reaction>".to_string();
        }
        self.core.render_soup()
    }
}

/// Install a reaction site on `pool`. Shorthand for the builder without
/// statics or overrides.
pub fn site(pool: &Pool, reactions: Vec<Reaction>) -> Result<Site> {
    Site::builder(pool).reactions(reactions).install()
}

/// Builder for a reaction site.
pub struct SiteBuilder {
    pool: Pool,
    name: Option<String>,
    reactions: Vec<Reaction>,
    statics: Vec<MoleculeRef>,
    init: Option<Box<dyn FnOnce() -> Result<()> + Send>>,
    reporter: Arc<dyn Reporter>,
    seed: Option<u64>,
}

impl SiteBuilder {
    /// Override the derived site name.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Add one reaction.
    pub fn reaction(mut self, rx: Reaction) -> Self {
        self.reactions.push(rx);
        self
    }

    /// Add several reactions.
    pub fn reactions(mut self, rxs: Vec<Reaction>) -> Self {
        self.reactions.extend(rxs);
        self
    }

    /// Declare a static molecule: present in exactly one copy, emitted
    /// once by the init block, re-emitted only by reactions consuming it.
    pub fn with_static(mut self, molecule: MoleculeRef) -> Self {
        self.statics.push(molecule);
        self
    }

    /// The init block: runs once at install and must emit each declared
    /// static exactly once.
    pub fn init(mut self, f: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        self.init = Some(Box::new(f));
        self
    }

    /// Replace the default log reporter.
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Seed the site RNG for deterministic tests. The API still promises
    /// no ordering.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the reaction set, bind the molecules and activate the
    /// site.
    pub fn install(self) -> Result<Site> {
        let SiteBuilder {
            pool,
            name,
            reactions,
            statics,
            init,
            reporter,
            seed,
        } = self;

        // Index the input molecules in first-appearance order.
        let mut mol_index_of: HashMap<usize, usize> = HashMap::new();
        let mut handles: Vec<Arc<dyn MolHandle>> = Vec::new();
        for rx in &reactions {
            for input in &rx.inputs {
                let uid = input.mol.uid();
                if !mol_index_of.contains_key(&uid) {
                    mol_index_of.insert(uid, handles.len());
                    handles.push(input.mol.h.clone());
                }
            }
        }

        let site_name = name.unwrap_or_else(|| {
            let names: Vec<&str> = handles.iter().map(|h| h.name()).collect();
            format!("Site{{{}}}", names.join(","))
        });

        for handle in &handles {
            if let Some(existing) = handle.binding() {
                return Err(Error::AlreadyBound {
                    molecule: handle.name().to_string(),
                    site: existing.site.name().to_string(),
                });
            }
        }

        let static_uids: HashSet<usize> = statics.iter().map(|m| m.uid()).collect();
        for m in &statics {
            if !mol_index_of.contains_key(&m.uid()) {
                return Err(Error::StaticMisuse {
                    molecule: m.name().to_string(),
                    detail: "not consumed by any reaction of this site".to_string(),
                });
            }
            if m.h.is_blocking() {
                return Err(Error::StaticMisuse {
                    molecule: m.name().to_string(),
                    detail: "blocking molecules cannot be static".to_string(),
                });
            }
        }
        if init.is_none() && !static_uids.is_empty() {
            return Err(Error::StaticMisuse {
                molecule: statics[0].name().to_string(),
                detail: "statics declared without an init block".to_string(),
            });
        }

        check_shadowing(&site_name, &reactions)?;
        check_static_outputs(&reactions, &static_uids)?;

        // Pipelineability and the emit-time admission conditions.
        let mut pipelined_flags = vec![false; handles.len()];
        let mut admissions: Vec<Admission> = Vec::new();
        for (mol_ix, handle) in handles.iter().enumerate() {
            let uid = handle.uid();
            let pipelined = !static_uids.contains(&uid) && is_pipelined(uid, &reactions);
            pipelined_flags[mol_ix] = pipelined;
            admissions.push(if pipelined {
                admission_for(uid, &reactions)
            } else {
                Admission::Always
            });
        }

        let mut runtimes: Vec<Arc<RxRuntime>> = Vec::new();
        for rx in reactions {
            let plan = MatchPlan::build(&rx, &mol_index_of);
            let label = rx.to_string();
            let consumed_statics: Vec<usize> = {
                let mut seen = HashSet::new();
                rx.inputs
                    .iter()
                    .filter(|i| static_uids.contains(&i.mol.uid()))
                    .filter_map(|i| {
                        let ix = mol_index_of[&i.mol.uid()];
                        if seen.insert(ix) {
                            Some(ix)
                        } else {
                            None
                        }
                    })
                    .collect()
            };
            runtimes.push(Arc::new(RxRuntime {
                rx,
                plan,
                label,
                consumed_statics,
            }));
        }

        for rr in &runtimes {
            if looks_like_livelock(&rr.rx) {
                reporter.report(ReportEvent::LivelockDetected {
                    site: site_name.clone(),
                    reaction: rr.label.clone(),
                });
            }
        }

        let mols: Vec<SiteMeta> = handles
            .iter()
            .enumerate()
            .map(|(ix, handle)| SiteMeta {
                handle: handle.clone(),
                name: handle.name().to_string(),
                is_static: static_uids.contains(&handle.uid()),
                pipelined: pipelined_flags[ix],
                admission: std::mem::replace(&mut admissions[ix], Admission::Always),
            })
            .collect();
        let bags: Vec<Box<dyn Bag>> = handles.iter().map(|h| h.make_bag()).collect();
        let mol_count = handles.len();

        let core = Arc::new(SiteCore {
            name: site_name,
            pool,
            reporter,
            mols,
            pipelined_flags,
            reactions: runtimes,
            state: Mutex::new(SiteState {
                bags,
                when_emitted: (0..mol_count).map(|_| Vec::new()).collect(),
                when_scheduled: (0..mol_count).map(|_| Vec::new()).collect(),
            }),
            rng: Mutex::new(match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            }),
        });

        for (index, meta) in core.mols.iter().enumerate() {
            meta.handle.bind(Binding {
                site: core.clone(),
                index,
            })?;
        }

        core.reporter.report(ReportEvent::SchedulerAssigned {
            site: core.name.clone(),
            pool: core.pool.name().to_string(),
        });

        // The init block emits each static exactly once, under a context
        // granting one emission per declared static.
        if let Some(init) = init {
            let budgets: HashMap<usize, usize> =
                static_uids.iter().map(|&uid| (uid, 1)).collect();
            let previous = pool::swap_reaction_context(Some(ReactionContext {
                reaction: "<init>".to_string(),
                statics: budgets,
            }));
            let outcome = init();
            let context = pool::swap_reaction_context(previous);
            outcome?;
            if let Some(context) = context {
                for (uid, owed) in context.statics {
                    if owed != 0 {
                        let molecule = core
                            .mols
                            .iter()
                            .find(|m| m.handle.uid() == uid)
                            .map(|m| m.name.clone())
                            .unwrap_or_default();
                        return Err(Error::StaticMisuse {
                            molecule,
                            detail: "init block did not emit it exactly once".to_string(),
                        });
                    }
                }
            }
        }

        Ok(Site { core })
    }
}

// -----------------------------------------------------------------------------
//              - Install-time analysis -
// -----------------------------------------------------------------------------
fn input_multiset(rx: &Reaction) -> HashMap<usize, usize> {
    let mut counts = HashMap::new();
    for input in &rx.inputs {
        *counts.entry(input.mol.uid()).or_insert(0) += 1;
    }
    counts
}

/// Per-molecule pattern lists in the stable rendering order, so repeated
/// inputs pair up deterministically across two reactions.
fn patterns_by_molecule(rx: &Reaction) -> HashMap<usize, Vec<&InputPattern>> {
    let mut map: HashMap<usize, Vec<&InputPattern>> = HashMap::new();
    for ix in rx.sorted_input_order() {
        let input = &rx.inputs[ix];
        map.entry(input.mol.uid()).or_default().push(&input.pattern);
    }
    map
}

fn all_weaker(a: &HashMap<usize, Vec<&InputPattern>>, b: &HashMap<usize, Vec<&InputPattern>>) -> bool {
    a.iter().all(|(uid, pats_a)| {
        let pats_b = &b[uid];
        pats_a
            .iter()
            .zip(pats_b.iter())
            .all(|(pa, pb)| pa.is_weaker_or_equal(pb))
    })
}

fn check_shadowing(site_name: &str, reactions: &[Reaction]) -> Result<()> {
    for i in 0..reactions.len() {
        for j in (i + 1)..reactions.len() {
            if input_multiset(&reactions[i]) != input_multiset(&reactions[j]) {
                continue;
            }
            let pats_i = patterns_by_molecule(&reactions[i]);
            let pats_j = patterns_by_molecule(&reactions[j]);
            let i_weaker = all_weaker(&pats_i, &pats_j);
            let j_weaker = all_weaker(&pats_j, &pats_i);
            if i_weaker && j_weaker {
                return Err(Error::ShadowedReactions {
                    site: site_name.to_string(),
                    reaction: reactions[i].to_string(),
                });
            }
            if i_weaker || j_weaker {
                let (weaker, stronger) = if i_weaker {
                    (&reactions[i], &reactions[j])
                } else {
                    (&reactions[j], &reactions[i])
                };
                return Err(Error::Indeterminism {
                    site: site_name.to_string(),
                    weaker: weaker.to_string(),
                    stronger: stronger.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// A reaction with declared outputs must re-emit every static it
/// consumes, unconditionally.
fn check_static_outputs(reactions: &[Reaction], static_uids: &HashSet<usize>) -> Result<()> {
    for rx in reactions {
        if rx.outputs.is_empty() {
            continue;
        }
        let guaranteed: HashSet<usize> = shrink_outputs(&rx.outputs)
            .iter()
            .filter(|o| o.is_guaranteed())
            .map(|o| o.mol.uid())
            .collect();
        for input in &rx.inputs {
            let uid = input.mol.uid();
            if static_uids.contains(&uid) && !guaranteed.contains(&uid) {
                return Err(Error::StaticMisuse {
                    molecule: input.mol.name().to_string(),
                    detail: format!("consumed by {{{}}} but not re-emitted", rx),
                });
            }
        }
    }
    Ok(())
}

/// A molecule is pipelined iff, at every reaction consuming it, it stays
/// out of cross guards and is never repeated together with a refutable
/// occurrence. Per-molecule conditions are separable by construction.
fn is_pipelined(uid: usize, reactions: &[Reaction]) -> bool {
    let mut consumed_anywhere = false;
    for rx in reactions {
        let occurrences: Vec<usize> = rx
            .inputs
            .iter()
            .enumerate()
            .filter_map(|(ix, i)| if i.mol.uid() == uid { Some(ix) } else { None })
            .collect();
        if occurrences.is_empty() {
            continue;
        }
        consumed_anywhere = true;
        let in_guard = occurrences
            .iter()
            .any(|ix| rx.cross_guards.iter().any(|g| g.indices.contains(ix)));
        if in_guard {
            return false;
        }
        if occurrences.len() > 1
            && occurrences
                .iter()
                .any(|&ix| rx.inputs[ix].pattern.is_refutable())
        {
            return false;
        }
    }
    consumed_anywhere
}

fn admission_for(uid: usize, reactions: &[Reaction]) -> Admission {
    let mut conditions = Vec::new();
    for rx in reactions {
        for input in rx.inputs.iter().filter(|i| i.mol.uid() == uid) {
            match input.pattern.admission_pred() {
                Some(pred) => conditions.push(pred),
                None => return Admission::Always,
            }
        }
    }
    if conditions.is_empty() {
        Admission::Always
    } else {
        Admission::Any(conditions)
    }
}

/// No guards, nothing refutable, and the shrunken outputs guarantee every
/// input molecule comes straight back.
fn looks_like_livelock(rx: &Reaction) -> bool {
    if rx.static_guard.is_some() || !rx.cross_guards.is_empty() || rx.outputs.is_empty() {
        return false;
    }
    if rx.inputs.iter().any(|i| i.pattern.is_refutable()) {
        return false;
    }
    let guaranteed: HashSet<usize> = shrink_outputs(&rx.outputs)
        .iter()
        .filter(|o| o.is_guaranteed())
        .map(|o| o.mol.uid())
        .collect();
    rx.inputs.iter().all(|i| guaranteed.contains(&i.mol.uid()))
}
