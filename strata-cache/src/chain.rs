//! Chain-of-responsibility resolution across cache tiers.
//!
//! A [`ChainedLoader`] is a linked sequence of tier nodes built once at
//! construction, fastest tier first, with the authoritative source loader
//! as the terminal node. Resolution walks the chain recursively; the depth
//! equals the tier count, which is small and fixed.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::CacheResult;
use crate::tier::{CacheKey, CacheValue, Tier};

/// One node of the resolution chain: a tier plus an optional slower rest.
pub struct ChainedLoader<K: CacheKey, V: CacheValue> {
    tier: Arc<dyn Tier<K, V>>,
    next: Option<Box<ChainedLoader<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> ChainedLoader<K, V> {
    /// Terminal node: no further fallback below this tier.
    pub fn terminal(tier: Arc<dyn Tier<K, V>>) -> Self {
        Self { tier, next: None }
    }

    /// Node with a slower chain behind it.
    pub fn with_next(tier: Arc<dyn Tier<K, V>>, next: ChainedLoader<K, V>) -> Self {
        Self {
            tier,
            next: Some(Box::new(next)),
        }
    }

    /// Resolve a key, fastest tier first.
    ///
    /// A defined value that this tier's validity predicate accepts
    /// short-circuits: no write to slower tiers, no call into the rest of
    /// the chain. On a miss the rest of the chain is consulted and an
    /// acceptable result is promoted into this tier before being returned.
    pub fn get<'a>(&'a self, key: &'a K) -> BoxFuture<'a, CacheResult<Option<V>>> {
        Box::pin(async move {
            if let Some(value) = self.tier.get(key).await? {
                if self.tier.is_valid(key, &value) {
                    return Ok(Some(value));
                }
            }

            let Some(next) = &self.next else {
                return Ok(None);
            };

            match next.get(key).await? {
                Some(value) if self.tier.is_valid(key, &value) => {
                    self.tier.set(key, Some(&value)).await?;
                    Ok(Some(value))
                }
                _ => Ok(None),
            }
        })
    }

    /// Remove a key from every tier of the chain.
    ///
    /// Always cascades through the entire chain, whether or not a given
    /// tier actually held the key; idempotent on already-absent keys.
    pub fn invalidate<'a>(&'a self, key: &'a K) -> BoxFuture<'a, CacheResult<()>> {
        Box::pin(async move {
            self.tier.set(key, None).await?;
            if let Some(next) = &self.next {
                next.invalidate(key).await?;
            }
            Ok(())
        })
    }

    /// Remove every tier's entire contents.
    pub fn clear(&self) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            self.tier.clear().await?;
            if let Some(next) = &self.next {
                next.clear().await?;
            }
            Ok(())
        })
    }

    /// Force resolution from the deepest tier, bypassing every cached one.
    ///
    /// The fresh result is written back into each tier on the way out,
    /// including an absent result, so a requeue never serves a cached hit
    /// and clears values the source no longer knows.
    pub fn requeue<'a>(&'a self, key: &'a K) -> BoxFuture<'a, CacheResult<Option<V>>> {
        Box::pin(async move {
            let value = match &self.next {
                Some(next) => next.requeue(key).await?,
                None => self.tier.get(key).await?,
            };
            self.tier.set(key, value.as_ref()).await?;
            Ok(value)
        })
    }
}
