//! Parameter-keyed result cache for async atoms.
//!
//! # Keys
//!
//! A parameter is mapped to a [`CacheKey`] by serializing it to a JSON value
//! and printing that value. `serde_json::Value` keeps object members sorted,
//! so two structurally equal parameters always print the same way even when
//! they are hash maps with different iteration orders.
//!
//! # Entries
//!
//! Each key moves through `NoEntry -> Pending -> {Settled | Failed}`. A
//! `Pending` entry carries the one in-flight fetch for that key; every caller
//! that hits it gets a clone of the same [`PendingFetch`].
//!
//! Every slot also records the epoch of the fetch (or explicit write) that
//! produced it. A settling fetch only writes back if the slot still carries its
//! own epoch.
//!
//! Settlements and writes are announced by the cache itself, so every atom
//! sharing a cache hears about them, including fetches started by an atom
//! that has since been dropped.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde::Serialize;

use crate::error::Result;
use crate::reactive::{Subscribers, Unsubscribe};

/// Canonical serialized form of an async atom parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `params`.
    ///
    /// Fails if the parameter cannot be represented as JSON, e.g. a map whose
    /// keys are not strings or integers.
    pub fn of<P: Serialize + ?Sized>(params: &P) -> Result<Self> {
        let value = serde_json::to_value(params)?;
        Ok(Self(serde_json::to_string(&value)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn next_epoch() -> u64 {
    static EPOCH: AtomicU64 = AtomicU64::new(1);
    EPOCH.fetch_add(1, Ordering::Relaxed)
}

/// Handle to an in-flight fetch.
///
/// Clones share the underlying future: awaiting any of them yields the same
/// outcome, and the source function runs once no matter how many clones are
/// awaited.
pub struct PendingFetch<S, E> {
    epoch: u64,
    inner: Shared<BoxFuture<'static, std::result::Result<S, E>>>,
}

impl<S, E> PendingFetch<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(epoch: u64, fut: BoxFuture<'static, std::result::Result<S, E>>) -> Self {
        Self {
            epoch,
            inner: fut.shared(),
        }
    }

    /// Whether two handles refer to the same underlying fetch.
    pub fn same_request(&self, other: &Self) -> bool {
        self.epoch == other.epoch
    }

    /// The outcome, if the fetch has already completed.
    pub fn peek(&self) -> Option<std::result::Result<S, E>> {
        self.inner.peek().cloned()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl<S, E> Clone for PendingFetch<S, E> {
    fn clone(&self) -> Self {
        Self {
            epoch: self.epoch,
            inner: self.inner.clone(),
        }
    }
}

impl<S, E> Future for PendingFetch<S, E>
where
    S: Clone,
    E: Clone,
{
    type Output = std::result::Result<S, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<S, E> fmt::Debug for PendingFetch<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFetch")
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// The state of one cache key.
#[derive(Clone)]
pub enum CacheEntry<S, E> {
    /// A fetch is in flight.
    Pending(PendingFetch<S, E>),
    /// The fetch resolved, or the value was written explicitly.
    Settled(S),
    /// The fetch failed.
    Failed(E),
}

impl<S, E> CacheEntry<S, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, CacheEntry::Pending(_))
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, CacheEntry::Settled(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CacheEntry::Failed(_))
    }

    /// The settled value, if any.
    pub fn value(&self) -> Option<&S> {
        match self {
            CacheEntry::Settled(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn state_name(&self) -> &'static str {
        match self {
            CacheEntry::Pending(_) => "pending",
            CacheEntry::Settled(_) => "settled",
            CacheEntry::Failed(_) => "failed",
        }
    }
}

impl<S: fmt::Debug, E: fmt::Debug> fmt::Debug for CacheEntry<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEntry::Pending(fetch) => f.debug_tuple("Pending").field(fetch).finish(),
            CacheEntry::Settled(value) => f.debug_tuple("Settled").field(value).finish(),
            CacheEntry::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

pub(crate) struct Slot<S, E> {
    pub(crate) epoch: u64,
    pub(crate) entry: CacheEntry<S, E>,
}

/// Storage behind one or more async atoms.
///
/// Each [`AsyncAtom`](super::AsyncAtom) gets its own cache unless one is
/// passed to [`AsyncAtomBuilder::shared_cache`](super::AsyncAtomBuilder::shared_cache).
/// Cloning the cache shares the storage and the settlement listeners.
pub struct AsyncCache<S, E> {
    shared: Arc<CacheShared<S, E>>,
}

struct CacheShared<S, E> {
    slots: DashMap<CacheKey, Slot<S, E>>,

    /// Told about every settlement and explicit write, whichever atom made it.
    listeners: Subscribers<std::result::Result<S, E>>,
}

/// Handle held by an in-flight fetch. Does not keep the cache alive.
pub(crate) struct WeakCache<S, E> {
    shared: Weak<CacheShared<S, E>>,
}

impl<S, E> WeakCache<S, E> {
    pub(crate) fn upgrade(&self) -> Option<AsyncCache<S, E>> {
        self.shared.upgrade().map(|shared| AsyncCache { shared })
    }
}

impl<S, E> AsyncCache<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(CacheShared {
                slots: DashMap::new(),
                listeners: Subscribers::new(),
            }),
        }
    }

    /// Current entry for `key`, without starting any work.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<S, E>> {
        self.shared.slots.get(key).map(|slot| slot.entry.clone())
    }

    /// Drop the entry for `key`. Returns whether one existed.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.shared.slots.remove(key).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.shared.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.slots.is_empty()
    }

    /// Every key currently present, in no particular order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.shared.slots.iter().map(|slot| slot.key().clone()).collect()
    }

    /// Whether two handles share storage.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn slots(&self) -> &DashMap<CacheKey, Slot<S, E>> {
        &self.shared.slots
    }

    pub(crate) fn downgrade(&self) -> WeakCache<S, E> {
        WeakCache {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Register a listener for every settlement and write on this cache.
    pub(crate) fn watch<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&std::result::Result<S, E>) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }

    /// Store the outcome of the fetch tagged `epoch`, if its slot still
    /// carries that epoch, and notify. Returns whether it was stored.
    pub(crate) fn settle(
        &self,
        key: &CacheKey,
        epoch: u64,
        outcome: &std::result::Result<S, E>,
    ) -> bool {
        let written = match self.shared.slots.get_mut(key) {
            Some(mut slot) if slot.epoch == epoch => {
                slot.entry = match outcome {
                    Ok(value) => CacheEntry::Settled(value.clone()),
                    Err(err) => CacheEntry::Failed(err.clone()),
                };
                true
            }
            _ => false,
        };

        if written {
            self.shared.listeners.notify(outcome);
        }
        written
    }

    /// Overwrite `key` with a settled value and notify.
    pub(crate) fn write(&self, key: CacheKey, value: S) {
        self.shared.slots.insert(
            key,
            Slot {
                epoch: next_epoch(),
                entry: CacheEntry::Settled(value.clone()),
            },
        );
        self.shared.listeners.notify(&Ok(value));
    }
}

impl<S, E> Clone for AsyncCache<S, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, E> Default for AsyncCache<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E> fmt::Debug for AsyncCache<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCache")
            .field("len", &self.shared.slots.len())
            .field("listeners", &self.shared.listeners.len())
            .finish()
    }
}
