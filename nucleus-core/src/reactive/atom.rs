//! Atom identity and the capability set shared by value and derived atoms.
//!
//! [`Atom`] is the statically-typed surface callers use. [`Dependency`] is its
//! object-safe shadow: a derived atom stores the atoms it read as
//! `Arc<dyn Dependency>` so it can subscribe to and unsubscribe from them
//! without knowing their value types.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::subscriber::{Subscribers, Unsubscribe};

/// Unique identifier for an atom.
///
/// Clones of an atom handle share the same ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomId(u64);

impl AtomId {
    /// Generate a new unique atom ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for AtomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reactive cell: readable, writable, observable.
///
/// Handles are cheap to clone; every clone refers to the same state block.
pub trait Atom: Clone + Send + Sync + 'static {
    /// The type of value the atom holds.
    type Value: Clone + Send + Sync + 'static;

    /// The atom's identity.
    fn id(&self) -> AtomId;

    /// Current value. Never tracks, never fails.
    fn get_value(&self) -> Self::Value;

    /// Register a listener invoked with every new value.
    fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&Self::Value) + Send + Sync + 'static;

    /// Replace the value with `f(old)` and synchronously notify listeners.
    fn update<F>(&self, f: F)
    where
        F: FnOnce(&Self::Value) -> Self::Value;

    /// Store `value` and notify listeners.
    fn set(&self, value: Self::Value) {
        self.update(move |_| value);
    }
}

/// Type-erased view of an atom, used for dependency bookkeeping.
pub trait Dependency: Send + Sync {
    /// The atom's identity.
    fn atom_id(&self) -> AtomId;

    /// Subscribe a value-agnostic callback.
    fn watch(&self, notify: Arc<dyn Fn() + Send + Sync>) -> Unsubscribe;
}

impl<A: Atom> Dependency for A {
    fn atom_id(&self) -> AtomId {
        Atom::id(self)
    }

    fn watch(&self, notify: Arc<dyn Fn() + Send + Sync>) -> Unsubscribe {
        self.subscribe(move |_| notify())
    }
}

/// State block common to every synchronous atom: value, listeners, liveness.
pub(crate) struct AtomCore<T> {
    id: AtomId,
    value: RwLock<T>,
    subscribers: Subscribers<T>,
    disposed: AtomicBool,
}

impl<T> AtomCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(id: AtomId, value: T) -> Self {
        Self {
            id,
            value: RwLock::new(value),
            subscribers: Subscribers::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> AtomId {
        self.id
    }

    pub(crate) fn get(&self) -> T {
        self.value.read().clone()
    }

    pub(crate) fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.assert_live("subscribe to");
        self.subscribers.subscribe(listener)
    }

    /// Compute the next value from the current one, store it, notify.
    pub(crate) fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.assert_live("update");
        let next = {
            let guard = self.value.read();
            f(&*guard)
        };
        self.replace(next);
    }

    /// Store `next` and notify. Used by recomputation, which has already
    /// produced a fresh value.
    pub(crate) fn replace(&self, next: T) {
        *self.value.write() = next.clone();
        self.subscribers.notify(&next);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.subscribers.clear();
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn assert_live(&self, action: &str) {
        if self.is_disposed() {
            panic!("cannot {action} atom {} after it was disposed", self.id);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomCore")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .field("subscriber_count", &self.subscribers.len())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn atom_ids_are_unique_and_ordered() {
        let a = AtomId::new();
        let b = AtomId::new();

        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(format!("{a}"), format!("#{}", a.raw()));
    }

    #[test]
    fn core_update_notifies_with_new_value() {
        let core = AtomCore::new(AtomId::new(), 1);
        let seen = Arc::new(AtomicI32::new(0));

        let seen_clone = seen.clone();
        let _unsub = core.subscribe(move |v| seen_clone.store(*v, Ordering::SeqCst));

        core.update(|v| v * 10);
        assert_eq!(core.get(), 10);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn dispose_drops_listeners() {
        let core = AtomCore::new(AtomId::new(), 0);
        let _unsub = core.subscribe(|_| {});
        assert_eq!(core.subscriber_count(), 1);

        core.dispose();
        assert!(core.is_disposed());
        assert_eq!(core.subscriber_count(), 0);
    }

    #[test]
    fn debug_reports_listener_count() {
        let core = AtomCore::new(AtomId::new(), "hello");
        let _unsub = core.subscribe(|_| {});

        let text = format!("{core:?}");
        assert!(text.contains("\"hello\""));
        assert!(text.contains("subscriber_count: 1"));
    }

    #[test]
    #[should_panic(expected = "after it was disposed")]
    fn update_after_dispose_panics() {
        let core = AtomCore::new(AtomId::new(), 0);
        core.dispose();
        core.update(|v| v + 1);
    }
}
