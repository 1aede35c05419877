//! Reactive Context
//!
//! The reactive context tracks which derived atom is currently running its
//! reader, and the [`Getter`] handed to that reader records every atom it
//! reads.
//!
//! # Implementation
//!
//! A thread-local stack holds the IDs of the readers that are executing.
//! Entering a reader pushes its ID; the returned guard pops it on drop, so the
//! stack stays balanced even if the reader panics. Nested derived atoms (a
//! reader that triggers another atom's recomputation, or constructs a derived
//! atom) simply push on top.
//!
//! The stack is what makes a misplaced tracked read fail loudly: a [`Getter`]
//! only works while its own reader is the innermost frame on the calling
//! thread.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::atom::{Atom, AtomId, Dependency};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<AtomId>> = RefCell::new(Vec::new());
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    owner: AtomId,
}

impl ReactiveContext {
    /// Enter a reactive context for the given derived atom.
    ///
    /// The context is exited when the returned guard is dropped.
    pub fn enter(owner: AtomId) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(owner));
        Self { owner }
    }

    /// Check if any reader is executing on this thread.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The innermost executing reader, if any.
    pub fn current() -> Option<AtomId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().copied())
    }

    /// Depth of the reader stack on this thread.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(owner) = popped {
                debug_assert_eq!(
                    owner, self.owner,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.owner, owner
                );
            }
        });
    }
}

/// The tracked-get capability passed to a derived atom's reader.
///
/// Every atom read through [`Getter::get`] becomes a dependency of the reader's
/// owner; reading the same atom several times records it once.
pub struct Getter {
    owner: AtomId,
    reads: Mutex<IndexMap<AtomId, Arc<dyn Dependency>>>,
}

impl Getter {
    pub(crate) fn new(owner: AtomId) -> Self {
        Self {
            owner,
            reads: Mutex::new(IndexMap::new()),
        }
    }

    /// The derived atom this getter records dependencies for.
    pub fn owner(&self) -> AtomId {
        self.owner
    }

    /// Read `atom` and record it as a dependency.
    ///
    /// # Panics
    ///
    /// Panics if called anywhere but inside the owner's own reader execution
    /// on the thread running it.
    pub fn get<A: Atom>(&self, atom: &A) -> A::Value {
        if ReactiveContext::current() != Some(self.owner) {
            panic!(
                "tracked get for derived atom {} called outside its reader (active reader: {:?})",
                self.owner,
                ReactiveContext::current()
            );
        }

        self.reads
            .lock()
            .entry(atom.id())
            .or_insert_with(|| Arc::new(atom.clone()));

        atom.get_value()
    }

    /// Read `atom` without recording a dependency.
    pub fn peek<A: Atom>(&self, atom: &A) -> A::Value {
        atom.get_value()
    }

    /// Number of distinct atoms read so far.
    pub fn read_count(&self) -> usize {
        self.reads.lock().len()
    }

    pub(crate) fn into_reads(self) -> IndexMap<AtomId, Arc<dyn Dependency>> {
        self.reads.into_inner()
    }
}

impl fmt::Debug for Getter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getter")
            .field("owner", &self.owner)
            .field("reads", &self.reads.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Run `reader` for `owner` inside a fresh context, returning its value and
/// the set of atoms it read.
pub(crate) fn evaluate<T>(
    owner: AtomId,
    reader: &(dyn Fn(&Getter) -> T + Send + Sync),
) -> (T, IndexMap<AtomId, Arc<dyn Dependency>>) {
    let getter = Getter::new(owner);
    let value = {
        let _ctx = ReactiveContext::enter(owner);
        reader(&getter)
    };
    (value, getter.into_reads())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ValueAtom;

    #[test]
    fn context_tracks_current_reader() {
        let id = AtomId::new();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current().is_none());

        {
            let _ctx = ReactiveContext::enter(id);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current(), Some(id));
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current().is_none());
    }

    #[test]
    fn nested_contexts() {
        let id1 = AtomId::new();
        let id2 = AtomId::new();

        {
            let _ctx1 = ReactiveContext::enter(id1);
            assert_eq!(ReactiveContext::current(), Some(id1));

            {
                let _ctx2 = ReactiveContext::enter(id2);
                assert_eq!(ReactiveContext::current(), Some(id2));
                assert_eq!(ReactiveContext::depth(), 2);
            }

            assert_eq!(ReactiveContext::current(), Some(id1));
        }

        assert!(ReactiveContext::current().is_none());
    }

    #[test]
    fn evaluate_collapses_repeated_reads() {
        let a = ValueAtom::new(1);
        let b = ValueAtom::new(2);

        let (a2, b2) = (a.clone(), b.clone());
        let reader = move |get: &Getter| get.get(&a2) + get.get(&b2) + get.get(&a2);
        let (value, reads) = evaluate(AtomId::new(), &reader);

        assert_eq!(value, 4);
        assert_eq!(reads.len(), 2);
        assert_eq!(reads.keys().copied().collect::<Vec<_>>(), vec![a.id(), b.id()]);
    }

    #[test]
    fn peek_does_not_record() {
        let a = ValueAtom::new(5);

        let a2 = a.clone();
        let reader = move |get: &Getter| get.peek(&a2);
        let (value, reads) = evaluate(AtomId::new(), &reader);

        assert_eq!(value, 5);
        assert!(reads.is_empty());
    }

    #[test]
    fn context_pops_when_reader_panics() {
        let result = std::panic::catch_unwind(|| {
            let reader = |_: &Getter| -> i32 { panic!("reader failed") };
            evaluate(AtomId::new(), &reader)
        });

        assert!(result.is_err());
        assert!(!ReactiveContext::is_active());
    }

    #[test]
    #[should_panic(expected = "called outside its reader")]
    fn getter_outside_reader_panics() {
        let a = ValueAtom::new(1);
        let getter = Getter::new(AtomId::new());
        getter.get(&a);
    }

    #[test]
    #[should_panic(expected = "called outside its reader")]
    fn getter_from_another_thread_panics() {
        let a = ValueAtom::new(1);
        let reader = move |get: &Getter| {
            std::thread::scope(|scope| {
                match scope.spawn(|| get.get(&a)).join() {
                    Ok(v) => v,
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            })
        };
        evaluate(AtomId::new(), &reader);
    }
}
