//! Subscription registry shared by every atom kind.
//!
//! A registry is an insertion-ordered set of listeners keyed by a
//! per-registration [`ListenerId`]. Each `subscribe` call produces a fresh id,
//! so registering the same closure twice yields two entries, and the
//! [`Unsubscribe`] returned for one of them can never remove the other.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// Unique identifier for a single listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

type Entries<T> = Mutex<IndexMap<ListenerId, Listener<T>>>;

/// Type-erased removal hook held by [`Unsubscribe`].
trait Detach: Send + Sync {
    fn detach(&self, id: ListenerId) -> bool;
}

impl<T: 'static> Detach for Entries<T> {
    fn detach(&self, id: ListenerId) -> bool {
        self.lock().shift_remove(&id).is_some()
    }
}

/// The set of listeners attached to one atom.
pub struct Subscribers<T> {
    entries: Arc<Entries<T>>,
}

impl<T: 'static> Subscribers<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    /// Register a listener and return the capability that removes it.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.entries.lock().insert(id, Arc::new(listener));

        let entries: Arc<dyn Detach> = self.entries.clone();
        Unsubscribe {
            id,
            registry: Arc::downgrade(&entries),
            spent: AtomicBool::new(false),
        }
    }

    /// Invoke every listener registered at the time of the call.
    ///
    /// The listener set is snapshotted before iterating and the lock is
    /// released, so listeners may subscribe or unsubscribe freely. A listener
    /// added during this call is not invoked by it.
    pub fn notify(&self, value: &T) {
        let snapshot: SmallVec<[Listener<T>; 4]> =
            self.entries.lock().values().cloned().collect();

        for listener in snapshot {
            listener(value);
        }
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<T> Subscribers<T> {
    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Clones share the same listener set.
impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

/// Capability removing exactly one listener registration.
///
/// Calling [`Unsubscribe::unsubscribe`] more than once is harmless, and it
/// keeps working (as a no-op) after the atom it came from has been disposed
/// or dropped.
pub struct Unsubscribe {
    id: ListenerId,
    // Weak so an outstanding capability does not keep the atom's listeners alive.
    registry: Weak<dyn Detach>,
    spent: AtomicBool,
}

impl Unsubscribe {
    /// The registration this capability removes.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the registration.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn unsubscribe(&self) -> bool {
        if self.spent.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.registry.upgrade() {
            Some(registry) => registry.detach(self.id),
            None => false,
        }
    }

    /// Whether the registration may still be live.
    pub fn is_active(&self) -> bool {
        !self.spent.load(Ordering::Acquire) && self.registry.strong_count() > 0
    }

    /// Convert into a guard that unsubscribes when dropped.
    pub fn into_guard(self) -> SubscriptionGuard {
        SubscriptionGuard { inner: self }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Handle to a registration that is removed when the guard is dropped.
#[derive(Debug)]
pub struct SubscriptionGuard {
    inner: Unsubscribe,
}

impl SubscriptionGuard {
    pub fn id(&self) -> ListenerId {
        self.inner.id()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.inner.unsubscribe();
    }
}
