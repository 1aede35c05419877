//! Error types.
//!
//! Recoverable failures of the public API. Failures of an async source are not
//! represented here: they are stored as data in the cache and handed back
//! through [`Read::Error`](crate::resource::Read::Error).

use thiserror::Error;

use crate::reactive::AtomId;
use crate::resource::CacheKey;

#[derive(Debug, Error)]
pub enum AtomError {
    /// The parameter could not be turned into a cache key.
    #[error("failed to derive cache key: {0}")]
    Key(#[from] serde_json::Error),

    /// `compute` found no tokio runtime to drive the fetch on.
    #[error("async atom {atom} has no tokio runtime to drive its fetches")]
    NoRuntime { atom: AtomId },

    /// `update` targeted a key that has no cache entry.
    #[error("no cache entry for key {key}")]
    Missing { key: CacheKey },

    /// `update` targeted an entry that is pending or failed.
    #[error("cache entry for key {key} is {state}, not settled")]
    NotSettled { key: CacheKey, state: &'static str },

    /// `update_last` was called before any `compute`.
    #[error("async atom {atom} has not computed any key yet")]
    NoComputedKey { atom: AtomId },
}

pub type Result<T, E = AtomError> = std::result::Result<T, E>;
