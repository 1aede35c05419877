//! Nucleus Core
//!
//! This crate provides a small reactive state container:
//!
//! - Value atoms holding mutable state
//! - Derived atoms computed from other atoms, with automatic dependency tracking
//! - Async atoms computing a value per parameter, memoized and deduplicated
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: value atoms, derived atoms, the tracked-read context and the
//!   subscription registry
//! - `resource`: async atoms, their parameter-keyed cache and the
//!   three-way read adapter
//!
//! Updates propagate synchronously: `update` on an atom returns only after
//! every derived atom downstream of it has recomputed. The only asynchronous
//! boundary is an async atom's source function, which runs on tokio.
//!
//! # Example
//!
//! ```rust
//! use nucleus_core::{atom, derived, Atom};
//!
//! let count = atom(1);
//! let doubled = derived({
//!     let count = count.clone();
//!     move |get| get.get(&count) * 2
//! });
//!
//! count.update(|v| v + 4);
//! assert_eq!(doubled.get_value(), 10);
//! ```

pub mod error;
pub mod reactive;
pub mod resource;

use std::future::Future;

use serde::Serialize;

pub use error::{AtomError, Result};
pub use reactive::{Atom, AtomId, DerivedAtom, Getter, Unsubscribe, ValueAtom};
pub use resource::{AsyncAtom, CacheEntry, Read};

/// Create a value atom.
pub fn atom<T>(value: T) -> ValueAtom<T>
where
    T: Clone + Send + Sync + 'static,
{
    ValueAtom::new(value)
}

/// Create a derived atom from a reader. The reader runs immediately.
pub fn derived<T, F>(reader: F) -> DerivedAtom<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&Getter) -> T + Send + Sync + 'static,
{
    DerivedAtom::new(reader)
}

/// Create an async atom with its own cache.
pub fn async_atom<P, S, E, F, Fut>(source: F) -> AsyncAtom<P, S, E>
where
    P: Serialize + Clone + 'static,
    S: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<S, E>> + Send + 'static,
{
    AsyncAtom::new(source)
}
