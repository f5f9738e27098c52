//! Cache coordinator: in-memory snapshot, load deduplication, listeners.
//!
//! [`TieredCache`] owns the materialized snapshot of resolved values and
//! drives asynchronous resolution through a [`ChainedLoader`]. All state
//! mutation happens synchronously between suspension points; the internal
//! locks are never held across an await.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::chain::ChainedLoader;
use crate::error::CacheError;
use crate::loader::{LoaderTier, SourceLoader};
use crate::tier::{CacheKey, CacheValue, Tier};

/// Change listener: invoked with the key and its new value (`None` when the
/// key became absent) after every observable snapshot change.
pub type CacheListener<K, V> = Arc<dyn Fn(&K, Option<&V>) + Send + Sync>;

/// Handler for failed `queue`/`requeue` resolutions.
pub type ErrorHandler<K> = Arc<dyn Fn(&K, CacheError) + Send + Sync>;

/// Handle returned by [`TieredCache::register_listener`], used to
/// unregister. Listeners are closures and have no value identity of their
/// own, so registration hands out one of these instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Snapshot, pending set and their version stamps. Only ever mutated while
/// no resolution is suspended, under the coordinator's lock.
struct CacheState<K, V> {
    snapshot: HashMap<K, V>,
    snapshot_stamp: u64,
    pending: HashSet<K>,
    pending_stamp: u64,
}

impl<K, V> Default for CacheState<K, V> {
    fn default() -> Self {
        Self {
            snapshot: HashMap::new(),
            snapshot_stamp: 0,
            pending: HashSet::new(),
            pending_stamp: 0,
        }
    }
}

enum ResolveMode {
    Get,
    Requeue,
}

/// Tiered read-through cache with load deduplication and change listeners.
///
/// # Reads and writes
///
/// Reads ([`get`](Self::get), [`snapshot`](Self::snapshot), the stamps) are
/// synchronous and never touch a tier. Resolution is requested with
/// [`queue`](Self::queue) / [`requeue`](Self::requeue); both coalesce
/// concurrent requests for the same key into a single in-flight load.
///
/// # Failure policy
///
/// `queue`, `requeue`, `invalidate` and `clear` never return errors. A
/// failed load leaves the snapshot untouched and is routed to the
/// configured error handler; without one it is dropped after a log event,
/// so callers that care about failures must configure a handler. A later
/// `queue` simply retries — failures are not memoized.
pub struct TieredCache<K: CacheKey, V: CacheValue> {
    chain: ChainedLoader<K, V>,
    state: RwLock<CacheState<K, V>>,
    listeners: RwLock<HashMap<ListenerId, CacheListener<K, V>>>,
    next_listener_id: AtomicU64,
    on_error: Option<ErrorHandler<K>>,
}

impl<K: CacheKey, V: CacheValue> TieredCache<K, V> {
    /// Start building a cache around an authoritative source loader.
    pub fn builder(loader: impl SourceLoader<K, V> + 'static) -> TieredCacheBuilder<K, V> {
        TieredCacheBuilder::new(loader)
    }

    /// Cache with no intermediate tiers: memory snapshot over the loader.
    pub fn memory_only(loader: impl SourceLoader<K, V> + 'static) -> Self {
        Self::builder(loader).build()
    }

    // ------------------------------------------------------------------
    // Synchronous read surface
    // ------------------------------------------------------------------

    /// Latest resolved value for a key, if any. Never triggers a load; a
    /// key that was never queued is simply absent.
    pub fn get(&self, key: &K) -> Option<V> {
        self.state.read().unwrap().snapshot.get(key).cloned()
    }

    /// Whether the snapshot currently holds a value for the key.
    pub fn contains(&self, key: &K) -> bool {
        self.state.read().unwrap().snapshot.contains_key(key)
    }

    /// Copy of the full in-memory snapshot.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.state.read().unwrap().snapshot.clone()
    }

    /// Monotonic counter bumped on every observable snapshot mutation.
    pub fn snapshot_stamp(&self) -> u64 {
        self.state.read().unwrap().snapshot_stamp
    }

    /// Whether a resolution for the key is currently in flight.
    pub fn is_pending(&self, key: &K) -> bool {
        self.state.read().unwrap().pending.contains(key)
    }

    /// Copy of the set of keys with an in-flight resolution.
    pub fn pending(&self) -> HashSet<K> {
        self.state.read().unwrap().pending.clone()
    }

    /// Monotonic counter bumped on every pending-set change.
    pub fn pending_stamp(&self) -> u64 {
        self.state.read().unwrap().pending_stamp
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolve a key through the tier chain and publish the result.
    ///
    /// A no-op when a resolution for the key is already in flight: that
    /// resolution satisfies this request too.
    pub async fn queue(&self, key: K) {
        self.resolve(key, ResolveMode::Get).await;
    }

    /// Force a fresh resolution from the authoritative source, bypassing
    /// every cached tier, with the same deduplication as [`queue`](Self::queue).
    pub async fn requeue(&self, key: K) {
        self.resolve(key, ResolveMode::Requeue).await;
    }

    async fn resolve(&self, key: K, mode: ResolveMode) {
        {
            let mut state = self.state.write().unwrap();
            if !state.pending.insert(key.clone()) {
                tracing::trace!(?key, "resolution already in flight, coalescing");
                return;
            }
            state.pending_stamp += 1;
        }

        let result = match mode {
            ResolveMode::Get => self.chain.get(&key).await,
            ResolveMode::Requeue => self.chain.requeue(&key).await,
        };

        match result {
            Ok(value) => self.apply(&key, value),
            Err(err) => match &self.on_error {
                Some(handler) => handler(&key, err),
                None => {
                    tracing::warn!(?key, %err, "load failed with no error handler configured");
                }
            },
        }

        let mut state = self.state.write().unwrap();
        state.pending.remove(&key);
        state.pending_stamp += 1;
    }

    /// Apply a resolved value to the snapshot and notify listeners.
    fn apply(&self, key: &K, value: Option<V>) {
        {
            let mut state = self.state.write().unwrap();
            match &value {
                Some(v) => {
                    state.snapshot.insert(key.clone(), v.clone());
                }
                None => {
                    state.snapshot.remove(key);
                }
            }
            state.snapshot_stamp += 1;
        }
        self.notify(key, value.as_ref());
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    /// Drop a key everywhere.
    ///
    /// The snapshot removal and listener notification happen before the
    /// tiers are touched, so local reads are consistent immediately even
    /// while slower tiers are still being cleared. Propagation errors are
    /// logged and dropped; they are not routed to the error handler.
    pub async fn invalidate(&self, key: &K) {
        {
            let mut state = self.state.write().unwrap();
            state.snapshot.remove(key);
            state.snapshot_stamp += 1;
        }
        self.notify(key, None);

        if let Err(err) = self.chain.invalidate(key).await {
            tracing::warn!(?key, %err, "tier invalidation failed");
        }
    }

    /// Reset the whole cache: empty the snapshot, then clear every tier.
    ///
    /// Bulk reset: per-key listeners are not notified, and the pending set
    /// is untouched — loads already in flight run to completion and may
    /// repopulate the snapshot.
    pub async fn clear(&self) {
        {
            let mut state = self.state.write().unwrap();
            state.snapshot.clear();
            state.snapshot_stamp += 1;
        }

        if let Err(err) = self.chain.clear().await {
            tracing::warn!(%err, "tier clear failed");
        }
    }

    /// Write a value straight into the snapshot, bypassing every tier.
    ///
    /// For externally sourced writes (optimistic updates, push messages)
    /// that should be visible without a load round-trip. `None` removes
    /// the key. Listeners are notified either way.
    pub fn put_to_memory(&self, key: K, value: Option<V>) {
        self.apply(&key, value);
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a change listener; the returned id unregisters it.
    pub fn register_listener(
        &self,
        listener: impl Fn(&K, Option<&V>) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().unwrap().insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener. Returns whether it was still registered. Safe to
    /// call from inside a listener, including from the listener itself.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.write().unwrap().remove(&id).is_some()
    }

    /// Invoke every registered listener with a change.
    ///
    /// The registry is snapshotted first and the lock released before any
    /// listener runs, so re-entrant (un)registration cannot corrupt
    /// iteration or deadlock.
    fn notify(&self, key: &K, value: Option<&V>) {
        let listeners: Vec<CacheListener<K, V>> =
            self.listeners.read().unwrap().values().cloned().collect();
        for listener in listeners {
            listener(key, value);
        }
    }
}

/// Builder for [`TieredCache`]: the source loader, intermediate tiers in
/// fastest-to-slowest order, and the optional error handler.
pub struct TieredCacheBuilder<K: CacheKey, V: CacheValue> {
    loader: Arc<dyn SourceLoader<K, V>>,
    tiers: Vec<Arc<dyn Tier<K, V>>>,
    on_error: Option<ErrorHandler<K>>,
}

impl<K: CacheKey, V: CacheValue> TieredCacheBuilder<K, V> {
    /// Builder around an authoritative source loader.
    pub fn new(loader: impl SourceLoader<K, V> + 'static) -> Self {
        Self {
            loader: Arc::new(loader),
            tiers: Vec::new(),
            on_error: None,
        }
    }

    /// Append an intermediate tier. Tiers are tried in the order they are
    /// added, so add the fastest first; the loader always comes last.
    pub fn tier(mut self, tier: impl Tier<K, V> + 'static) -> Self {
        self.tiers.push(Arc::new(tier));
        self
    }

    /// Route failed `queue`/`requeue` resolutions to a handler.
    pub fn error_handler(mut self, handler: impl Fn(&K, CacheError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Assemble the chain (innermost tier first, loader as terminal node)
    /// and the coordinator around it.
    pub fn build(self) -> TieredCache<K, V> {
        let mut chain = ChainedLoader::terminal(Arc::new(LoaderTier::new(self.loader)));
        for tier in self.tiers.into_iter().rev() {
            chain = ChainedLoader::with_next(tier, chain);
        }

        TieredCache {
            chain,
            state: RwLock::new(CacheState::default()),
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(0),
            on_error: self.on_error,
        }
    }
}
