//! Source loader contract and its adapter into the tier chain.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CacheResult;
use crate::tier::{CacheKey, CacheValue, Tier};

/// The authoritative, slowest tier: a caller-supplied asynchronous lookup.
///
/// Implementations must return `Ok(None)` for "not found" and reserve `Err`
/// for genuine failures (network errors, decode failures, ...). Any async
/// closure `Fn(K) -> impl Future<Output = CacheResult<Option<V>>>` is a
/// loader through the blanket impl below.
#[async_trait]
pub trait SourceLoader<K: CacheKey, V: CacheValue>: Send + Sync {
    /// Resolve a value from the authoritative source.
    async fn load(&self, key: &K) -> CacheResult<Option<V>>;
}

#[async_trait]
impl<K, V, F, Fut> SourceLoader<K, V> for F
where
    K: CacheKey,
    V: CacheValue,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = CacheResult<Option<V>>> + Send,
{
    async fn load(&self, key: &K) -> CacheResult<Option<V>> {
        (self)(key.clone()).await
    }
}

/// Adapter exposing a [`SourceLoader`] as the read-only terminal tier of a
/// chain. It inherits the default no-op `set`/`clear`, so nothing is ever
/// written back into the authoritative source.
pub(crate) struct LoaderTier<K: CacheKey, V: CacheValue> {
    loader: Arc<dyn SourceLoader<K, V>>,
}

impl<K: CacheKey, V: CacheValue> LoaderTier<K, V> {
    pub(crate) fn new(loader: Arc<dyn SourceLoader<K, V>>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> Tier<K, V> for LoaderTier<K, V> {
    fn name(&self) -> &'static str {
        "source"
    }

    async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        self.loader.load(key).await
    }
}
