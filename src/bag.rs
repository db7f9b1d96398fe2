//! Molecule bags: per-molecule multisets of emitted values.
//!
//! A reaction site owns one bag per molecule. Two implementations exist,
//! chosen when the site is installed:
//!
//! * [`CountedBag`] — a value→count map for molecules with simple payloads.
//!   Copies of equal values are indistinguishable, so a count is all that
//!   is needed.
//! * [`QueueBag`] — an insertion-ordered multiset for everything else,
//!   including every blocking molecule (each blocking value carries its own
//!   reply slot, so copies are never interchangeable).
//!
//! All operations run under the owning site's lock; bags carry no internal
//! synchronization. Iteration is exposed through stable indices: `probe`
//! never mutates, and `remove_picks` resolves every index before touching
//! the storage, so a multi-value removal is atomic with respect to index
//! shift.
//!
//! [`CountedBag`]: struct.CountedBag.html
//! [`QueueBag`]: struct.QueueBag.html
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::reply::{ReplyCore, ReplySlot};

// -----------------------------------------------------------------------------
//              - Molecule value wrapper -
// -----------------------------------------------------------------------------
/// One datum in the soup: the erased payload, a reply slot for blocking
/// molecules, and an optional consumed-observation hook.
pub(crate) struct MolValue {
    pub(crate) value: Box<dyn Any + Send>,
    pub(crate) reply: Option<Arc<dyn ReplySlot>>,
    pub(crate) on_consumed: Option<Arc<ReplyCore<()>>>,
}

impl MolValue {
    pub(crate) fn plain(value: Box<dyn Any + Send>) -> Self {
        Self {
            value,
            reply: None,
            on_consumed: None,
        }
    }

    pub(crate) fn blocking(value: Box<dyn Any + Send>, reply: Arc<dyn ReplySlot>) -> Self {
        Self {
            value,
            reply: Some(reply),
            on_consumed: None,
        }
    }
}

/// A non-destructive look at the value stored at one index.
pub(crate) struct Probe<'a> {
    pub(crate) value: &'a dyn Any,
    /// True when the value belongs to a blocking emitter that has already
    /// timed out. Stale values are skipped by match search.
    pub(crate) stale: bool,
}

// -----------------------------------------------------------------------------
//              - Bag trait -
// -----------------------------------------------------------------------------
/// Multiset of values for one molecule at one site.
pub(crate) trait Bag: Send {
    /// Number of values present.
    fn count(&self) -> usize;

    /// Add one value.
    fn add(&mut self, v: MolValue);

    /// Look at the value at `ix` (0 ≤ ix < count). Indices are stable
    /// between mutations.
    fn probe(&self, ix: usize) -> Option<Probe<'_>>;

    /// Remove the values at the given indices, returning them in the same
    /// order as `picks`. Indices are interpreted against the pre-removal
    /// state. Fires consumed-observation hooks of the removed values.
    fn remove_picks(&mut self, picks: &[usize]) -> Vec<MolValue>;

    /// Number of copies equal to `v`.
    fn count_of(&self, v: &dyn Any) -> usize;

    /// Debug rendering of the bag contents.
    fn render(&self) -> String;

    /// Attach a consumed-observation hook to one stored copy of `v`.
    fn watch_consumed(&mut self, v: &dyn Any, hook: Arc<ReplyCore<()>>);
}

// -----------------------------------------------------------------------------
//              - Counted bag -
// -----------------------------------------------------------------------------
/// Value→count map for simple payloads.
pub(crate) struct CountedBag<T> {
    counts: HashMap<T, usize>,
    total: usize,
    watchers: Vec<(T, Arc<ReplyCore<()>>)>,
}

impl<T: Eq + Hash + Clone + Debug + Send + 'static> CountedBag<T> {
    pub(crate) fn new() -> Self {
        Self {
            counts: HashMap::new(),
            total: 0,
            watchers: Vec::new(),
        }
    }

    pub(crate) fn boxed() -> Box<dyn Bag> {
        Box::new(Self::new())
    }

    fn key_at(&self, ix: usize) -> Option<&T> {
        let mut seen = 0;
        for (k, c) in self.counts.iter() {
            if ix < seen + c {
                return Some(k);
            }
            seen += c;
        }
        None
    }

    fn downcast(v: MolValue) -> T {
        match v.value.downcast::<T>() {
            Ok(b) => *b,
            Err(_) => panic!("value of the wrong type routed into a counted bag"),
        }
    }
}

impl<T: Eq + Hash + Clone + Debug + Send + 'static> Bag for CountedBag<T> {
    fn count(&self) -> usize {
        self.total
    }

    fn add(&mut self, v: MolValue) {
        if let Some(hook) = &v.on_consumed {
            // Copies are indistinguishable here; park the hook beside the
            // value and resolve it when any equal copy is consumed.
            let hook = hook.clone();
            let key = match v.value.downcast_ref::<T>() {
                Some(t) => t.clone(),
                None => panic!("value of the wrong type routed into a counted bag"),
            };
            self.watchers.push((key, hook));
        }
        let t = Self::downcast(v);
        *self.counts.entry(t).or_insert(0) += 1;
        self.total += 1;
    }

    fn probe(&self, ix: usize) -> Option<Probe<'_>> {
        self.key_at(ix).map(|k| Probe {
            value: k as &dyn Any,
            stale: false,
        })
    }

    fn remove_picks(&mut self, picks: &[usize]) -> Vec<MolValue> {
        // Resolve all indices against the current layout first.
        let keys: Vec<T> = picks
            .iter()
            .map(|&ix| {
                self.key_at(ix)
                    .cloned()
                    .unwrap_or_else(|| panic!("bag index {} out of range", ix))
            })
            .collect();
        for key in &keys {
            let gone = {
                let c = self
                    .counts
                    .get_mut(key)
                    .unwrap_or_else(|| panic!("removing a value that is not present"));
                *c -= 1;
                *c == 0
            };
            if gone {
                self.counts.remove(key);
            }
            self.total -= 1;
            if let Some(pos) = self.watchers.iter().position(|(k, _)| k == key) {
                let (_, hook) = self.watchers.swap_remove(pos);
                hook.complete(());
            }
        }
        keys.into_iter()
            .map(|k| MolValue::plain(Box::new(k)))
            .collect()
    }

    fn count_of(&self, v: &dyn Any) -> usize {
        v.downcast_ref::<T>()
            .and_then(|t| self.counts.get(t).copied())
            .unwrap_or(0)
    }

    fn render(&self) -> String {
        let mut parts: Vec<String> = self
            .counts
            .iter()
            .map(|(k, c)| format!("{:?}/{}", k, c))
            .collect();
        parts.sort();
        parts.join(", ")
    }

    fn watch_consumed(&mut self, v: &dyn Any, hook: Arc<ReplyCore<()>>) {
        if let Some(t) = v.downcast_ref::<T>() {
            self.watchers.push((t.clone(), hook));
        }
    }
}

// -----------------------------------------------------------------------------
//              - Queue bag -
// -----------------------------------------------------------------------------
struct QueueEntry<T> {
    value: T,
    reply: Option<Arc<dyn ReplySlot>>,
    on_consumed: Option<Arc<ReplyCore<()>>>,
}

/// Insertion-ordered multiset for complex and blocking payloads.
pub(crate) struct QueueBag<T> {
    entries: VecDeque<QueueEntry<T>>,
}

impl<T: PartialEq + Debug + Send + 'static> QueueBag<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn boxed() -> Box<dyn Bag> {
        Box::new(Self::new())
    }
}

impl<T: PartialEq + Debug + Send + 'static> Bag for QueueBag<T> {
    fn count(&self) -> usize {
        self.entries.len()
    }

    fn add(&mut self, v: MolValue) {
        let MolValue {
            value,
            reply,
            on_consumed,
        } = v;
        let value = match value.downcast::<T>() {
            Ok(b) => *b,
            Err(_) => panic!("value of the wrong type routed into a queue bag"),
        };
        self.entries.push_back(QueueEntry {
            value,
            reply,
            on_consumed,
        });
    }

    fn probe(&self, ix: usize) -> Option<Probe<'_>> {
        self.entries.get(ix).map(|e| Probe {
            value: &e.value as &dyn Any,
            stale: e.reply.as_ref().map_or(false, |r| r.abandoned()),
        })
    }

    fn remove_picks(&mut self, picks: &[usize]) -> Vec<MolValue> {
        let mut order: Vec<(usize, usize)> = picks.iter().cloned().enumerate().collect();
        // Remove back-to-front so earlier indices stay valid.
        order.sort_by(|a, b| b.1.cmp(&a.1));
        let mut out: Vec<Option<MolValue>> = (0..picks.len()).map(|_| None).collect();
        for (slot, ix) in order {
            let entry = self
                .entries
                .remove(ix)
                .unwrap_or_else(|| panic!("bag index {} out of range", ix));
            if let Some(hook) = &entry.on_consumed {
                hook.complete(());
            }
            out[slot] = Some(MolValue {
                value: Box::new(entry.value),
                reply: entry.reply,
                on_consumed: entry.on_consumed,
            });
        }
        out.into_iter().map(|v| v.unwrap()).collect()
    }

    fn count_of(&self, v: &dyn Any) -> usize {
        match v.downcast_ref::<T>() {
            Some(t) => self.entries.iter().filter(|e| &e.value == t).count(),
            None => 0,
        }
    }

    fn render(&self) -> String {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{:?}", e.value))
            .collect();
        parts.join(", ")
    }

    fn watch_consumed(&mut self, v: &dyn Any, hook: Arc<ReplyCore<()>>) {
        if let Some(t) = v.downcast_ref::<T>() {
            if let Some(e) = self
                .entries
                .iter_mut()
                .rev()
                .find(|e| &e.value == t && e.on_consumed.is_none())
            {
                e.on_consumed = Some(hook);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn probe_values(bag: &dyn Bag) -> Vec<i32> {
        (0..bag.count())
            .map(|ix| *bag.probe(ix).unwrap().value.downcast_ref::<i32>().unwrap())
            .collect()
    }

    #[test]
    fn counted_add_and_count() {
        let mut bag = CountedBag::<i32>::new();
        bag.add(MolValue::plain(Box::new(1)));
        bag.add(MolValue::plain(Box::new(1)));
        bag.add(MolValue::plain(Box::new(2)));
        assert_eq!(bag.count(), 3);
        assert_eq!(bag.count_of(&1), 2);
        assert_eq!(bag.count_of(&2), 1);
        assert_eq!(bag.count_of(&3), 0);
    }

    #[test]
    fn counted_remove_picks_is_atomic() {
        let mut bag = CountedBag::<i32>::new();
        for v in &[5, 5, 7] {
            bag.add(MolValue::plain(Box::new(*v)));
        }
        // Pick two distinct indices in one call; both resolve against the
        // pre-removal layout.
        let removed = bag.remove_picks(&[0, 2]);
        assert_eq!(removed.len(), 2);
        assert_eq!(bag.count(), 1);
    }

    #[test]
    fn counted_probe_covers_multiplicity() {
        let mut bag = CountedBag::<i32>::new();
        bag.add(MolValue::plain(Box::new(4)));
        bag.add(MolValue::plain(Box::new(4)));
        assert_eq!(probe_values(&bag), vec![4, 4]);
        assert!(bag.probe(2).is_none());
    }

    #[test]
    fn queue_preserves_order_and_alignment() {
        let mut bag = QueueBag::<i32>::new();
        for v in &[10, 20, 30, 40] {
            bag.add(MolValue::plain(Box::new(*v)));
        }
        assert_eq!(probe_values(&bag), vec![10, 20, 30, 40]);
        // Results come back aligned with the picks order even though
        // removal happens back-to-front.
        let removed = bag.remove_picks(&[3, 0]);
        let vals: Vec<i32> = removed
            .into_iter()
            .map(|m| *m.value.downcast::<i32>().unwrap())
            .collect();
        assert_eq!(vals, vec![40, 10]);
        assert_eq!(probe_values(&bag), vec![20, 30]);
    }

    #[test]
    fn queue_marks_abandoned_values_stale() {
        let mut bag = QueueBag::<i32>::new();
        let core: Arc<ReplyCore<u8>> = ReplyCore::new();
        assert_eq!(core.wait_timeout(Duration::from_millis(1)), Ok(None));
        bag.add(MolValue::blocking(Box::new(1), core));
        bag.add(MolValue::plain(Box::new(2)));
        assert!(bag.probe(0).unwrap().stale);
        assert!(!bag.probe(1).unwrap().stale);
    }

    #[test]
    fn consumed_hooks_fire_on_removal() {
        let mut bag = QueueBag::<i32>::new();
        bag.add(MolValue::plain(Box::new(1)));
        let (sig, hook) = crate::reply::Signal::pair();
        bag.watch_consumed(&1, hook);
        bag.remove_picks(&[0]);
        assert_eq!(sig.wait_timeout(Duration::from_millis(10)), Some(()));
    }

    #[test]
    fn counted_consumed_hooks_match_by_value() {
        let mut bag = CountedBag::<i32>::new();
        bag.add(MolValue::plain(Box::new(9)));
        let (sig, hook) = crate::reply::Signal::pair();
        bag.watch_consumed(&9, hook);
        bag.remove_picks(&[0]);
        assert_eq!(sig.wait_timeout(Duration::from_millis(10)), Some(()));
    }
}
