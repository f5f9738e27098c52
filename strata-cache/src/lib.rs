//! STRATA Cache - Tiered Read-Through Value Cache
//!
//! Resolves values by key through a chain of progressively slower backing
//! tiers, memoizes results in a fast in-process snapshot, deduplicates
//! concurrent loads per key, and notifies registered listeners on every
//! observable change.
//!
//! # Architecture
//!
//! ```text
//! reads (sync)          resolution (async)
//!      │                       │
//!      ▼                       ▼
//! ┌─────────────────────────────────────┐
//! │ TieredCache (coordinator)           │
//! │  snapshot · pending set · stamps    │
//! │  listener registry · error handler  │
//! └───────────────┬─────────────────────┘
//!                 ▼
//! ┌─────────────────────────────────────┐
//! │ ChainedLoader                       │
//! │  tier 0 (fastest) → tier 1 → ...    │
//! │  → SourceLoader (authoritative)     │
//! └─────────────────────────────────────┘
//! ```
//!
//! A chain hit short-circuits; a miss falls through to the next tier and
//! the result is promoted (written back) into the faster tier on the way
//! out. `requeue` bypasses every cached tier and re-executes the
//! authoritative load. There is no eviction and no TTL — staleness is
//! controlled only by explicit invalidation and requeue.
//!
//! # Traits
//!
//! - [`Tier`]: one backing source (get, optional set/clear, validity
//!   predicate). Persistent tiers such as `strata-lmdb` implement this.
//! - [`SourceLoader`]: the authoritative, slowest tier; any async closure
//!   `Fn(K) -> impl Future<Output = CacheResult<Option<V>>>` qualifies.

pub mod chain;
pub mod coordinator;
pub mod error;
pub mod loader;
pub mod tier;

pub use chain::ChainedLoader;
pub use coordinator::{
    CacheListener, ErrorHandler, ListenerId, TieredCache, TieredCacheBuilder,
};
pub use error::{CacheError, CacheResult};
pub use loader::SourceLoader;
pub use tier::{CacheKey, CacheValue, Tier};
