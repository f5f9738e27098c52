//! Error types for cache operations.

use thiserror::Error;

/// Errors surfaced by tiers and source loaders.
///
/// The coordinator itself never fails: `queue`/`requeue` route these to the
/// configured error handler, `invalidate`/`clear` log and drop them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The authoritative source loader rejected a load.
    #[error("source loader failed: {reason}")]
    Loader { reason: String },

    /// A cache tier failed during `get`, `set` or `clear`.
    #[error("cache tier '{tier}' failed: {reason}")]
    Tier { tier: &'static str, reason: String },
}

impl CacheError {
    /// Build a loader error from any displayable cause.
    pub fn loader(reason: impl ToString) -> Self {
        Self::Loader {
            reason: reason.to_string(),
        }
    }

    /// Build a tier error from any displayable cause.
    pub fn tier(tier: &'static str, reason: impl ToString) -> Self {
        Self::Tier {
            tier,
            reason: reason.to_string(),
        }
    }
}

/// Result alias used throughout the cache crates.
pub type CacheResult<T> = Result<T, CacheError>;
