//! Tier contract and key/value marker traits.
//!
//! A tier is one backing source in the fallback chain, fastest to slowest.
//! Tiers only need to implement `get`; `set` and `clear` default to no-ops
//! so a read-only tier simply never receives write-back or invalidation
//! writes while the rest of the chain still does.

use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;

use crate::error::CacheResult;

/// Marker trait for cache keys.
///
/// Keys are compared by value and must be stable and hashable. Persistent
/// tiers may require additional bounds (e.g. `Serialize`); the core only
/// needs what the in-memory snapshot and pending set need.
pub trait CacheKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<K> CacheKey for K where K: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Marker trait for cache values.
///
/// Absence is always expressed as `Option::None`, never as a sentinel value.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<V> CacheValue for V where V: Clone + Send + Sync + 'static {}

/// One backing source in the fallback chain.
///
/// # Contract
///
/// - `get` returns `Ok(None)` for "not found"; `Err` only for genuine
///   failures. Errors are never swallowed by the chain — they propagate to
///   the coordinator.
/// - `set` with `None` deletes the key. The default implementation is a
///   no-op, which is how a tier opts out of write-back and invalidation.
/// - `is_valid` lets a tier reject a stored value (its own or one obtained
///   from a slower tier) without deleting it; the default accepts all.
#[async_trait]
pub trait Tier<K: CacheKey, V: CacheValue>: Send + Sync {
    /// Short tier name used in errors and log events.
    fn name(&self) -> &'static str;

    /// Look up a value in this tier.
    async fn get(&self, key: &K) -> CacheResult<Option<V>>;

    /// Write a value into this tier; `None` deletes the key.
    async fn set(&self, _key: &K, _value: Option<&V>) -> CacheResult<()> {
        Ok(())
    }

    /// Remove this tier's entire contents.
    async fn clear(&self) -> CacheResult<()> {
        Ok(())
    }

    /// Whether a stored value is still acceptable for this tier.
    fn is_valid(&self, _key: &K, _value: &V) -> bool {
        true
    }
}

// Delegation so callers can keep a handle on a tier after it has been
// installed into a chain.
#[async_trait]
impl<K: CacheKey, V: CacheValue, T: Tier<K, V> + ?Sized> Tier<K, V> for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &K, value: Option<&V>) -> CacheResult<()> {
        (**self).set(key, value).await
    }

    async fn clear(&self) -> CacheResult<()> {
        (**self).clear().await
    }

    fn is_valid(&self, key: &K, value: &V) -> bool {
        (**self).is_valid(key, value)
    }
}
