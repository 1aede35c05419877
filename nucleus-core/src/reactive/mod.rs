//! Reactive Primitives
//!
//! This module implements the synchronous half of the system: value atoms,
//! derived atoms, and the subscription registry they share.
//!
//! # Concepts
//!
//! ## Value Atoms
//!
//! A [`ValueAtom`] is a container for mutable state. `update` stores the new
//! value and synchronously notifies every listener.
//!
//! ## Derived Atoms
//!
//! A [`DerivedAtom`] computes its value from other atoms. Its reader receives a
//! [`Getter`]; each atom read through the getter becomes a dependency, and a
//! change to any dependency re-runs the reader immediately.
//!
//! # Implementation Notes
//!
//! Propagation is push-based with no central scheduler: an atom's listeners
//! include the recompute hooks of the derived atoms that read it. Dependencies
//! are re-collected on every run, and subscriptions that the latest run no
//! longer needs are removed.

mod atom;
mod context;
mod derived;
mod subscriber;
mod value;

pub use atom::{Atom, AtomId, Dependency};
pub use context::{Getter, ReactiveContext};
pub use derived::DerivedAtom;
pub use subscriber::{ListenerId, Subscribers, SubscriptionGuard, Unsubscribe};
pub use value::ValueAtom;
