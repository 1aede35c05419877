//! Value Atom
//!
//! A value atom is the fundamental reactive primitive. It holds a value and
//! the listeners that want to hear about changes to it.
//!
//! # How Value Atoms Work
//!
//! 1. `get_value` returns a clone of the current value. It never tracks; a
//!    derived atom records the read through its [`Getter`](super::Getter).
//!
//! 2. `update` computes the next value from the current one, stores it, and
//!    synchronously notifies every listener registered at that moment.
//!
//! 3. Derived atoms are themselves listeners, so the notification is what
//!    drives recomputation downstream.

use std::fmt::Debug;
use std::sync::Arc;

use tracing::trace;

use super::atom::{Atom, AtomCore, AtomId};
use super::subscriber::Unsubscribe;

/// A mutable reactive cell holding a value of type T.
///
/// # Example
///
/// ```rust
/// use nucleus_core::reactive::{Atom, ValueAtom};
///
/// let count = ValueAtom::new(0);
/// count.update(|v| v + 5);
/// assert_eq!(count.get_value(), 5);
/// ```
pub struct ValueAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: Arc<AtomCore<T>>,
}

impl<T> ValueAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new atom with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            core: Arc::new(AtomCore::new(AtomId::new(), value)),
        }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> AtomId {
        self.core.id()
    }

    /// Get the number of listeners.
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    /// Drop every listener. Later `subscribe`/`update` calls panic.
    pub fn dispose(&self) {
        trace!(atom = %self.id(), "disposing value atom");
        self.core.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

impl<T> Atom for ValueAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> AtomId {
        self.core.id()
    }

    fn get_value(&self) -> T {
        self.core.get()
    }

    fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.core.subscribe(listener)
    }

    fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        trace!(atom = %self.id(), listeners = self.core.subscriber_count(), "updating value atom");
        self.core.update(f);
    }
}

impl<T> Clone for ValueAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Debug for ValueAtom<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueAtom")
            .field("id", &self.id())
            .field("value", &self.get_value())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
