//! Suspense-style reads.
//!
//! A consumer that renders async state needs three outcomes, not two:
//! still loading, loaded, or failed. [`Read`] makes that explicit. A
//! synchronous host polls [`AsyncAtom::read`] again when the atom notifies; an
//! async host awaits [`AsyncAtom::read_async`], which suspends on the pending
//! fetch and re-reads once it settles.

use std::fmt;
use std::task::Poll;

use serde::Serialize;

use super::atom::AsyncAtom;
use super::cache::{CacheEntry, PendingFetch};
use crate::error::Result;

/// Outcome of reading an async atom.
pub enum Read<S, E> {
    /// Not ready yet. Await the fetch, or wait for the atom to notify.
    Pending(PendingFetch<S, E>),
    /// Ready.
    Value(S),
    /// The fetch failed.
    Error(E),
}

impl<S, E> Read<S, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Read::Pending(_))
    }

    pub fn value(&self) -> Option<&S> {
        match self {
            Read::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Read::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Collapse into a `Poll`, dropping the pending handle.
    pub fn into_poll(self) -> Poll<std::result::Result<S, E>> {
        match self {
            Read::Pending(_) => Poll::Pending,
            Read::Value(value) => Poll::Ready(Ok(value)),
            Read::Error(err) => Poll::Ready(Err(err)),
        }
    }
}

impl<S, E> From<CacheEntry<S, E>> for Read<S, E> {
    fn from(entry: CacheEntry<S, E>) -> Self {
        match entry {
            CacheEntry::Pending(fetch) => Read::Pending(fetch),
            CacheEntry::Settled(value) => Read::Value(value),
            CacheEntry::Failed(err) => Read::Error(err),
        }
    }
}

impl<S: fmt::Debug, E: fmt::Debug> fmt::Debug for Read<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Read::Pending(fetch) => f.debug_tuple("Pending").field(fetch).finish(),
            Read::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Read::Error(err) => f.debug_tuple("Error").field(err).finish(),
        }
    }
}

impl<P, S, E> AsyncAtom<P, S, E>
where
    P: Serialize + Clone + 'static,
    S: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Read the entry for `params` as a three-way result, starting a fetch on
    /// a miss.
    pub fn read(&self, params: &P) -> Result<Read<S, E>> {
        Ok(self.compute(params)?.into())
    }

    /// Read `params`, suspending until its entry is settled or failed.
    ///
    /// The outer `Result` reports key or runtime errors; the inner one is the
    /// cached outcome.
    pub async fn read_async(&self, params: &P) -> Result<std::result::Result<S, E>> {
        loop {
            let fetch = match self.read(params)? {
                Read::Pending(fetch) => fetch,
                Read::Value(value) => return Ok(Ok(value)),
                Read::Error(err) => return Ok(Err(err)),
            };

            let outcome = fetch.clone().await;
            match self.entry(params)? {
                // Nothing replaced the fetch we awaited: its outcome is the answer,
                // whether or not it was written back.
                Some(CacheEntry::Pending(current)) if current.same_request(&fetch) => {
                    return Ok(outcome)
                }
                Some(CacheEntry::Settled(value)) => return Ok(Ok(value)),
                Some(CacheEntry::Failed(err)) => return Ok(Err(err)),
                // Invalidated or superseded while we waited.
                _ => continue,
            }
        }
    }
}
