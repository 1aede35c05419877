//! Async Atoms
//!
//! An async atom turns a function from a parameter to a future into a
//! memoized, observable resource.
//!
//! # Concepts
//!
//! ## Cache Keys
//!
//! Parameters are serialized into a [`CacheKey`]. Structurally equal
//! parameters share a key (and therefore an entry); anything else does not.
//!
//! ## Entries
//!
//! Per key, an entry is `Pending`, `Settled`, or `Failed`. Failures are data:
//! they sit in the cache like values and are handed back to whoever reads
//! them.
//!
//! ## Reads
//!
//! [`Read`] is the consumer-facing view of an entry. A UI binding maps
//! `Pending` to a loading state, `Error` to an error state, and `Value` to
//! content.

mod atom;
mod cache;
mod suspense;

pub use atom::{AsyncAtom, AsyncAtomBuilder};
pub use cache::{AsyncCache, CacheEntry, CacheKey, PendingFetch};
pub use suspense::Read;
