//! Derived Atom
//!
//! A derived atom computes its value from other atoms through a reader
//! function. The reader receives a [`Getter`]; every atom read through it
//! becomes a dependency.
//!
//! # How Derived Atoms Work
//!
//! 1. The reader runs once at construction, so the value is available
//!    immediately.
//!
//! 2. After every run, the set of atoms the reader touched is diffed against
//!    the current subscriptions: new dependencies are subscribed, dependencies
//!    that were not read this time are unsubscribed. The subscription set
//!    therefore always equals the reads of the most recent run.
//!
//! 3. When a dependency notifies, the reader re-runs synchronously and the new
//!    value is pushed to this atom's own listeners. Chains of derived atoms
//!    recompute depth-first before the originating `update` returns.
//!
//! # Diamonds
//!
//! There is no scheduler. If `sum` reads `d1` and `d2`, and both read `base`,
//! an update to `base` recomputes `sum` twice: once after `d1` settles (seeing
//! the old `d2`), and once after `d2` settles. The final value is correct; the
//! intermediate one is observable by `sum`'s listeners.
//!
//! # Errors
//!
//! A panicking reader unwinds into whoever triggered the recomputation. Readers
//! that can fail gracefully should use a `Result` as their value type.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::atom::{Atom, AtomCore, AtomId, Dependency};
use super::context::{evaluate, Getter};
use super::subscriber::Unsubscribe;

type Reader<T> = dyn Fn(&Getter) -> T + Send + Sync;

struct DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: AtomCore<T>,

    /// The reader function.
    reader: Box<Reader<T>>,

    /// Live subscriptions, keyed by the dependency they observe.
    /// Rewritten after every run of the reader.
    sources: Mutex<IndexMap<AtomId, Unsubscribe>>,

    /// Number of times the reader has run.
    compute_count: AtomicU64,
}

impl<T> DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Re-run the reader, store the value, resubscribe, notify.
    fn recompute(self: &Arc<Self>) {
        if self.core.is_disposed() {
            return;
        }

        let id = self.core.id();
        trace!(atom = %id, "recomputing derived atom");

        let (value, reads) = evaluate(id, &*self.reader);
        self.compute_count.fetch_add(1, Ordering::Relaxed);

        self.reconcile(reads);
        self.core.replace(value);
    }

    /// Make the subscription set match `reads` exactly.
    fn reconcile(self: &Arc<Self>, reads: IndexMap<AtomId, Arc<dyn Dependency>>) {
        let mut sources = self.sources.lock();

        let before = sources.len();
        sources.retain(|dep_id, unsub| {
            let keep = reads.contains_key(dep_id);
            if !keep {
                unsub.unsubscribe();
            }
            keep
        });
        let dropped = before - sources.len();

        let mut added = 0;
        for (dep_id, dependency) in reads {
            if sources.contains_key(&dep_id) {
                continue;
            }
            let weak: Weak<Self> = Arc::downgrade(self);
            let unsub = dependency.watch(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.recompute();
                }
            }));
            sources.insert(dep_id, unsub);
            added += 1;
        }

        if added > 0 || dropped > 0 {
            debug!(
                atom = %self.core.id(),
                added,
                dropped,
                total = sources.len(),
                "derived atom dependencies changed"
            );
        }
    }

    fn release_sources(&self) {
        let mut sources = self.sources.lock();
        for (_, unsub) in sources.drain(..) {
            unsub.unsubscribe();
        }
    }
}

impl<T> Drop for DerivedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.release_sources();
    }
}

/// An atom whose value is computed from other atoms.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + Send + Sync.
///
/// # Example
///
/// ```rust
/// use nucleus_core::reactive::{Atom, DerivedAtom, ValueAtom};
///
/// let a = ValueAtom::new(10);
/// let b = ValueAtom::new(20);
///
/// let sum = DerivedAtom::new({
///     let (a, b) = (a.clone(), b.clone());
///     move |get| get.get(&a) + get.get(&b)
/// });
/// assert_eq!(sum.get_value(), 30);
///
/// a.update(|v| v + 2);
/// assert_eq!(sum.get_value(), 32);
/// ```
pub struct DerivedAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<DerivedInner<T>>,
}

impl<T> DerivedAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a derived atom and run its reader immediately.
    pub fn new<F>(reader: F) -> Self
    where
        F: Fn(&Getter) -> T + Send + Sync + 'static,
    {
        let id = AtomId::new();
        let reader: Box<Reader<T>> = Box::new(reader);
        let (value, reads) = evaluate(id, &*reader);

        let inner = Arc::new(DerivedInner {
            core: AtomCore::new(id, value),
            reader,
            sources: Mutex::new(IndexMap::new()),
            compute_count: AtomicU64::new(1),
        });
        inner.reconcile(reads);

        Self { inner }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> AtomId {
        self.inner.core.id()
    }

    /// Re-run the reader now and notify listeners with the result.
    pub fn recompute(&self) {
        self.inner.recompute();
    }

    /// Number of atoms this atom is currently subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.inner.sources.lock().len()
    }

    /// IDs of the atoms this atom is currently subscribed to, in first-read order.
    pub fn dependencies(&self) -> Vec<AtomId> {
        self.inner.sources.lock().keys().copied().collect()
    }

    /// Number of times the reader has run, including the initial run.
    pub fn compute_count(&self) -> u64 {
        self.inner.compute_count.load(Ordering::Relaxed)
    }

    /// Get the number of listeners.
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    /// Unsubscribe from every dependency and drop every listener.
    ///
    /// The last value stays readable. Later `subscribe`/`update` calls panic.
    pub fn dispose(&self) {
        debug!(atom = %self.id(), "disposing derived atom");
        self.inner.core.dispose();
        self.inner.release_sources();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.is_disposed()
    }
}

impl<T> Atom for DerivedAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> AtomId {
        self.inner.core.id()
    }

    fn get_value(&self) -> T {
        self.inner.core.get()
    }

    fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.core.subscribe(listener)
    }

    /// Overwrite the computed value and notify listeners.
    ///
    /// The value disagrees with the reader until the next upstream change
    /// triggers a recomputation.
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.inner.core.update(f);
    }
}

impl<T> Clone for DerivedAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for DerivedAtom<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedAtom")
            .field("id", &self.id())
            .field("value", &self.get_value())
            .field("dependency_count", &self.dependency_count())
            .field("compute_count", &self.compute_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ValueAtom;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn derived_computes_on_construction() {
        let a = ValueAtom::new(10);
        let b = ValueAtom::new(20);

        let (a2, b2) = (a.clone(), b.clone());
        let sum = DerivedAtom::new(move |get| get.get(&a2) + get.get(&b2));

        assert_eq!(sum.get_value(), 30);
        assert_eq!(sum.compute_count(), 1);
        assert_eq!(sum.dependencies(), vec![a.id(), b.id()]);
    }

    #[test]
    fn derived_recomputes_on_dependency_update() {
        let a = ValueAtom::new(10);

        let a2 = a.clone();
        let plus_five = DerivedAtom::new(move |get| get.get(&a2) + 5);

        a.update(|v| v + 2);
        assert_eq!(a.get_value(), 12);
        assert_eq!(plus_five.get_value(), 17);
        assert_eq!(plus_five.compute_count(), 2);
    }

    #[test]
    fn derived_notifies_its_own_listeners() {
        let a = ValueAtom::new(10);
        let a2 = a.clone();
        let plus_five = DerivedAtom::new(move |get| get.get(&a2) + 5);

        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();
        let _unsub = plus_five.subscribe(move |v| seen_clone.store(*v, Ordering::SeqCst));

        a.update(|v| v + 5);
        assert_eq!(seen.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn repeated_reads_subscribe_once() {
        let a = ValueAtom::new(3);
        let a2 = a.clone();
        let cubed = DerivedAtom::new(move |get| get.get(&a2) * get.get(&a2) * get.get(&a2));

        assert_eq!(cubed.get_value(), 27);
        assert_eq!(cubed.dependency_count(), 1);
        assert_eq!(a.subscriber_count(), 1);

        a.set(2);
        assert_eq!(cubed.get_value(), 8);
        assert_eq!(cubed.compute_count(), 2);
    }

    #[test]
    fn stale_dependencies_are_dropped() {
        let use_left = ValueAtom::new(true);
        let left = ValueAtom::new(1);
        let right = ValueAtom::new(100);

        let (flag, l, r) = (use_left.clone(), left.clone(), right.clone());
        let pick = DerivedAtom::new(move |get| {
            if get.get(&flag) {
                get.get(&l)
            } else {
                get.get(&r)
            }
        });
        assert_eq!(pick.dependencies(), vec![use_left.id(), left.id()]);

        use_left.set(false);
        assert_eq!(pick.get_value(), 100);
        assert_eq!(pick.dependencies(), vec![use_left.id(), right.id()]);
        assert_eq!(left.subscriber_count(), 0);

        // The old branch no longer triggers recomputation.
        let runs = pick.compute_count();
        left.set(2);
        assert_eq!(pick.compute_count(), runs);

        right.set(200);
        assert_eq!(pick.get_value(), 200);
        assert_eq!(pick.compute_count(), runs + 1);
    }

    #[test]
    fn derived_chain_propagates_depth_first() {
        let base = ValueAtom::new(1);

        let b = base.clone();
        let doubled = DerivedAtom::new(move |get| get.get(&b) * 2);
        let d = doubled.clone();
        let plus_ten = DerivedAtom::new(move |get| get.get(&d) + 10);

        assert_eq!(plus_ten.get_value(), 12);

        base.set(5);
        assert_eq!(doubled.get_value(), 10);
        assert_eq!(plus_ten.get_value(), 20);
    }

    #[test]
    fn update_overwrites_until_next_recompute() {
        let base = ValueAtom::new(1);
        let b = base.clone();
        let doubled = DerivedAtom::new(move |get| get.get(&b) * 2);

        doubled.update(|_| 99);
        assert_eq!(doubled.get_value(), 99);

        base.set(4);
        assert_eq!(doubled.get_value(), 8);
    }

    #[test]
    fn recompute_forces_reader_run() {
        let external = Arc::new(AtomicI32::new(1));
        let ext = external.clone();
        let snapshot = DerivedAtom::new(move |_| ext.load(Ordering::SeqCst));

        external.store(7, Ordering::SeqCst);
        assert_eq!(snapshot.get_value(), 1);

        snapshot.recompute();
        assert_eq!(snapshot.get_value(), 7);
        assert_eq!(snapshot.dependency_count(), 0);
    }

    #[test]
    fn dispose_releases_upstream_subscriptions() {
        let base = ValueAtom::new(1);
        let b = base.clone();
        let doubled = DerivedAtom::new(move |get| get.get(&b) * 2);
        assert_eq!(base.subscriber_count(), 1);

        doubled.dispose();
        assert_eq!(base.subscriber_count(), 0);
        assert_eq!(doubled.dependency_count(), 0);

        base.set(10);
        assert_eq!(doubled.get_value(), 2);
    }

    #[test]
    fn dropped_derived_atom_stops_recomputing() {
        let base = ValueAtom::new(1);
        let runs = Arc::new(AtomicI32::new(0));

        {
            let (b, r) = (base.clone(), runs.clone());
            let _doubled = DerivedAtom::new(move |get| {
                r.fetch_add(1, Ordering::SeqCst);
                get.get(&b) * 2
            });
        }

        assert_eq!(base.subscriber_count(), 0);

        base.set(3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reader_panic_propagates_to_updater() {
        let base = ValueAtom::new(1);
        let b = base.clone();
        let _checked = DerivedAtom::new(move |get| {
            let v = get.get(&b);
            assert!(v < 10, "value too large: {v}");
            v
        });

        let result = panic::catch_unwind(AssertUnwindSafe(|| base.set(50)));
        assert!(result.is_err());
        assert_eq!(base.get_value(), 50);
    }
}
