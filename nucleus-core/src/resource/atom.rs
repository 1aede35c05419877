//! Async Atom Implementation
//!
//! An async atom wraps a function from a parameter to a future and memoizes
//! the outcome per parameter.
//!
//! # How Async Atoms Work
//!
//! 1. `compute(p)` derives the cache key for `p` and looks it up.
//!
//! 2. On a hit the stored entry is returned as is: a settled value, a failure,
//!    or the in-flight [`PendingFetch`] when a fetch for that key is already
//!    running. No second fetch is started.
//!
//! 3. On a miss a `Pending` entry is inserted under the map's entry lock,
//!    the source function is invoked, and the resulting future is spawned on
//!    the tokio runtime. When it completes, the entry becomes `Settled` or
//!    `Failed` and the listeners of every atom using the cache are notified
//!    with the outcome.
//!
//! `fetch(p)` bypasses all of this and just invokes the source.
//!
//! # Caveats
//!
//! The synchronous part of the source function runs while the cache entry is
//! locked and must not call back into the same atom. `async fn` sources do no
//! work until polled, so they are unaffected.
//!
//! There is no cancellation: a spawned fetch runs to completion even if every
//! caller lost interest. Its result is discarded only if the entry was
//! invalidated or overwritten in the meantime.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::cache::{next_epoch, AsyncCache, CacheEntry, CacheKey, PendingFetch, Slot};
use crate::error::{AtomError, Result};
use crate::reactive::{AtomId, Subscribers, Unsubscribe};

type Source<P, S, E> = dyn Fn(P) -> BoxFuture<'static, std::result::Result<S, E>> + Send + Sync;

struct AsyncInner<P, S, E> {
    id: AtomId,

    /// The wrapped function.
    source: Box<Source<P, S, E>>,

    cache: AsyncCache<S, E>,

    /// Whether `cache` was created for this atom alone.
    owns_cache: bool,

    /// Runtime that drives spawned fetches. Falls back to the ambient one.
    runtime: Option<Handle>,

    /// Key of the most recent `compute` call.
    last_key: Mutex<Option<CacheKey>>,

    /// Listeners, notified with every settlement and explicit write.
    subscribers: Subscribers<std::result::Result<S, E>>,

    /// Forwards the cache's announcements to `subscribers`.
    relay: Unsubscribe,

    /// Number of times the source function has been invoked.
    invocations: AtomicU64,

    disposed: AtomicBool,
}

impl<P, S, E> AsyncInner<P, S, E>
where
    P: 'static,
    S: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn runtime(&self) -> Result<Handle> {
        self.runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(AtomError::NoRuntime { atom: self.id })
    }

    /// Invoke the source and wrap it so that completion writes back.
    ///
    /// The driver reaches the cache directly, so the result lands even if
    /// this atom is dropped while the fetch is in flight.
    fn launch(&self, key: CacheKey, params: P) -> PendingFetch<S, E> {
        let epoch = next_epoch();
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let fut = (self.source)(params);
        let cache = self.cache.downgrade();
        let atom = self.id;
        let driver = async move {
            let outcome = fut.await;
            let written = cache
                .upgrade()
                .is_some_and(|cache| cache.settle(&key, epoch, &outcome));
            if written {
                debug!(atom = %atom, key = %key, ok = outcome.is_ok(), "async atom entry settled");
            } else {
                debug!(atom = %atom, key = %key, epoch, "discarding result of superseded fetch");
            }
            outcome
        };

        PendingFetch::new(epoch, driver.boxed())
    }

    fn assert_live(&self, action: &str) {
        if self.disposed.load(Ordering::Acquire) {
            panic!("cannot {action} async atom {} after it was disposed", self.id);
        }
    }
}

impl<P, S, E> Drop for AsyncInner<P, S, E> {
    fn drop(&mut self) {
        self.relay.unsubscribe();
    }
}

/// An atom computed asynchronously from a parameter, memoized per parameter.
///
/// # Type Parameters
///
/// - `P`: The parameter. Must serialize deterministically; it becomes the cache key.
/// - `S`: The value produced by the source.
/// - `E`: The error produced by the source. Stored in the cache, so it must be Clone.
///
/// # Example
///
/// ```rust
/// use nucleus_core::resource::{AsyncAtom, Read};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), nucleus_core::AtomError> {
/// let square = AsyncAtom::new(|n: u64| async move { Ok::<_, String>(n * n) });
///
/// assert!(matches!(square.read(&4)?, Read::Pending(_)));
/// assert_eq!(square.read_async(&4).await?, Ok(16));
/// assert!(matches!(square.read(&4)?, Read::Value(16)));
/// # Ok(())
/// # }
/// ```
pub struct AsyncAtom<P, S, E> {
    inner: Arc<AsyncInner<P, S, E>>,
}

impl<P, S, E> AsyncAtom<P, S, E>
where
    P: Serialize + Clone + 'static,
    S: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an async atom with its own cache, driven by the ambient tokio
    /// runtime.
    pub fn new<F, Fut>(source: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<S, E>> + Send + 'static,
    {
        Self::builder(source).build()
    }

    /// Start configuring an async atom.
    pub fn builder<F, Fut>(source: F) -> AsyncAtomBuilder<P, S, E>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<S, E>> + Send + 'static,
    {
        AsyncAtomBuilder {
            source: Box::new(move |params| source(params).boxed()),
            cache: None,
            runtime: None,
        }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> AtomId {
        self.inner.id
    }

    /// Return the cached entry for `params`, starting a fetch on a miss.
    ///
    /// Concurrent calls with equal parameters share one fetch: every caller
    /// that arrives while it is in flight receives the same [`PendingFetch`].
    pub fn compute(&self, params: &P) -> Result<CacheEntry<S, E>> {
        self.inner.assert_live("compute");

        let key = CacheKey::of(params)?;
        *self.inner.last_key.lock() = Some(key.clone());

        let (fetch, runtime) = match self.inner.cache.slots().entry(key.clone()) {
            Entry::Occupied(slot) => {
                let entry = slot.get().entry.clone();
                trace!(atom = %self.id(), key = %key, state = entry.state_name(), "cache hit");
                return Ok(entry);
            }
            Entry::Vacant(vacant) => {
                let runtime = self.inner.runtime()?;
                let fetch = self.inner.launch(key.clone(), params.clone());
                vacant.insert(Slot {
                    epoch: fetch.epoch(),
                    entry: CacheEntry::Pending(fetch.clone()),
                });
                (fetch, runtime)
            }
        };

        debug!(atom = %self.id(), key = %key, "cache miss, fetching");
        // Detached: the fetch settles even if nobody awaits it.
        drop(runtime.spawn(fetch.clone()));

        Ok(CacheEntry::Pending(fetch))
    }

    /// Invoke the source directly, ignoring and leaving the cache untouched.
    pub fn fetch(&self, params: &P) -> BoxFuture<'static, std::result::Result<S, E>> {
        self.inner.invocations.fetch_add(1, Ordering::Relaxed);
        (self.inner.source)(params.clone())
    }

    /// Inspect the entry for `params` without starting a fetch.
    pub fn entry(&self, params: &P) -> Result<Option<CacheEntry<S, E>>> {
        let key = CacheKey::of(params)?;
        Ok(self.inner.cache.get(&key))
    }

    /// Replace the settled value for `params` with `f(old)` and notify.
    ///
    /// Fails if there is no entry for `params`, or if it is pending or failed.
    pub fn update<F>(&self, params: &P, f: F) -> Result<S>
    where
        F: FnOnce(&S) -> S,
    {
        let key = CacheKey::of(params)?;
        self.update_key(key, f)
    }

    /// Like [`update`](Self::update), targeting the key of the most recent
    /// `compute` call.
    pub fn update_last<F>(&self, f: F) -> Result<S>
    where
        F: FnOnce(&S) -> S,
    {
        let key = self
            .inner
            .last_key
            .lock()
            .clone()
            .ok_or(AtomError::NoComputedKey { atom: self.id() })?;
        self.update_key(key, f)
    }

    fn update_key<F>(&self, key: CacheKey, f: F) -> Result<S>
    where
        F: FnOnce(&S) -> S,
    {
        self.inner.assert_live("update");

        // Clone out so `f` runs without the entry locked.
        let current = match self.inner.cache.get(&key) {
            Some(CacheEntry::Settled(value)) => value,
            Some(other) => {
                return Err(AtomError::NotSettled {
                    key,
                    state: other.state_name(),
                })
            }
            None => return Err(AtomError::Missing { key }),
        };

        let next = f(&current);
        trace!(atom = %self.id(), key = %key, "updating async atom entry");
        self.inner.cache.write(key, next.clone());
        Ok(next)
    }

    /// Store `value` as the settled entry for `params` and notify.
    ///
    /// A fetch still in flight for `params` will not overwrite it.
    pub fn set(&self, params: &P, value: S) -> Result<()> {
        self.inner.assert_live("set");
        let key = CacheKey::of(params)?;
        self.inner.cache.write(key, value);
        Ok(())
    }

    /// Drop the entry for `params` so the next `compute` fetches again.
    ///
    /// A fetch still in flight for `params` will not write its result back.
    pub fn invalidate(&self, params: &P) -> Result<bool> {
        self.inner.assert_live("invalidate");
        let key = CacheKey::of(params)?;
        let removed = self.inner.cache.remove(&key);
        if removed {
            debug!(atom = %self.id(), key = %key, "invalidated cache entry");
        }
        Ok(removed)
    }

    /// Drop every entry in the cache.
    pub fn clear(&self) {
        self.inner.assert_live("clear");
        debug!(atom = %self.id(), entries = self.inner.cache.len(), "clearing cache");
        self.inner.cache.clear();
    }

    /// Register a listener invoked with every settlement and explicit write.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&std::result::Result<S, E>) + Send + Sync + 'static,
    {
        self.inner.assert_live("subscribe to");
        self.inner.subscribers.subscribe(listener)
    }

    /// The cache backing this atom. Clone it to share with another atom.
    pub fn cache(&self) -> &AsyncCache<S, E> {
        &self.inner.cache
    }

    /// Key passed to the most recent `compute` call.
    pub fn last_key(&self) -> Option<CacheKey> {
        self.inner.last_key.lock().clone()
    }

    /// Number of times the source function has been invoked, by `compute` or
    /// by `fetch`.
    pub fn invocation_count(&self) -> u64 {
        self.inner.invocations.load(Ordering::Relaxed)
    }

    /// Get the number of listeners.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Drop every listener and, if the cache is not shared, every entry.
    ///
    /// Later `compute`/`update`/`set`/`invalidate`/`clear`/`subscribe` calls
    /// panic.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(atom = %self.id(), owns_cache = self.inner.owns_cache, "disposing async atom");
        self.inner.relay.unsubscribe();
        self.inner.subscribers.clear();
        if self.inner.owns_cache {
            self.inner.cache.clear();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl<P, S, E> Clone for AsyncAtom<P, S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, S, E> fmt::Debug for AsyncAtom<P, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncAtom")
            .field("id", &self.inner.id)
            .field("cache", &self.inner.cache)
            .field("invocations", &self.inner.invocations.load(Ordering::Relaxed))
            .finish()
    }
}

/// Configuration for an [`AsyncAtom`].
pub struct AsyncAtomBuilder<P, S, E> {
    source: Box<Source<P, S, E>>,
    cache: Option<AsyncCache<S, E>>,
    runtime: Option<Handle>,
}

impl<P, S, E> AsyncAtomBuilder<P, S, E>
where
    P: Serialize + Clone + 'static,
    S: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Spawn fetches on `handle` instead of the runtime current at `compute`.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Store entries in `cache`, shared with every other atom built with it.
    ///
    /// Atoms sharing a cache must agree on what their keys mean. Every one of
    /// them notifies its listeners when any fetch or write on the cache lands.
    pub fn shared_cache(mut self, cache: AsyncCache<S, E>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> AsyncAtom<P, S, E> {
        let owns_cache = self.cache.is_none();
        let cache = self.cache.unwrap_or_default();
        let subscribers = Subscribers::new();
        let relay = {
            let subscribers = subscribers.clone();
            cache.watch(move |outcome| subscribers.notify(outcome))
        };
        AsyncAtom {
            inner: Arc::new(AsyncInner {
                id: AtomId::new(),
                source: self.source,
                cache,
                owns_cache,
                runtime: self.runtime.or_else(|| Handle::try_current().ok()),
                last_key: Mutex::new(None),
                subscribers,
                relay,
                invocations: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
