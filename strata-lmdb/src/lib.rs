//! LMDB-backed persistent tier for the strata cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the mid-speed tier
//! between the in-memory snapshot and the authoritative source loader.
//! Keys and values are stored as serde_json bytes; an optional transform
//! pair maps values to and from a dedicated persisted representation.
//!
//! # Availability
//!
//! Construction is cheap and never fails: the environment is opened lazily
//! on first use. When the environment cannot be opened (read-only
//! filesystem, unavailable path, ...) the tier degrades to a no-op — every
//! `get` reports absent and every write succeeds silently — so a cache
//! configured with this tier keeps working through its other tiers.
//! Genuine runtime failures (transactions, serialization) do propagate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;

use strata_cache::{CacheError, CacheKey, CacheResult, CacheValue, Tier};

/// Tier name used in errors and log events.
const TIER_NAME: &str = "lmdb";

/// Error type for LMDB tier operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbTierError {
    /// Failed to open or create the LMDB environment.
    #[error("failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the named database within the environment.
    #[error("failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbTierError> for CacheError {
    fn from(e: LmdbTierError) -> Self {
        CacheError::tier(TIER_NAME, e)
    }
}

/// Options for [`LmdbTier`]: environment size and store-section name.
#[derive(Debug, Clone)]
pub struct LmdbTierOptions {
    /// Maximum size of the memory map in megabytes.
    pub map_size_mb: usize,
    /// Name of the database inside the environment.
    pub store_name: String,
}

impl Default for LmdbTierOptions {
    fn default() -> Self {
        Self {
            map_size_mb: 64,
            store_name: "cache".to_string(),
        }
    }
}

impl LmdbTierOptions {
    /// Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum map size in megabytes.
    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    /// Set the store-section (named database) to use.
    pub fn with_store_name(mut self, store_name: impl Into<String>) -> Self {
        self.store_name = store_name.into();
        self
    }
}

/// The opened environment plus its named database.
struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    fn open(path: &Path, options: &LmdbTierOptions) -> Result<Self, LmdbTierError> {
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(options.map_size_mb * 1024 * 1024)
                .max_dbs(8)
                .open(path)
        }
        .map_err(|e| LmdbTierError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(&options.store_name))
            .map_err(|e| LmdbTierError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, LmdbTierError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        let bytes = self
            .db
            .get(&rtxn, key)
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        Ok(bytes.map(<[u8]>::to_vec))
    }

    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), LmdbTierError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key, value)
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))
    }

    fn delete_raw(&self, key: &[u8]) -> Result<(), LmdbTierError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        self.db
            .delete(&mut wtxn, key)
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))
    }

    fn clear_all(&self) -> Result<(), LmdbTierError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        self.db
            .clear(&mut wtxn)
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))
    }
}

/// LMDB-backed [`Tier`].
///
/// `D` is the persisted representation; it defaults to the value type
/// itself. Use [`open_with_transform`](Self::open_with_transform) when the
/// in-memory value is not directly serializable or should be flattened
/// before hitting disk.
pub struct LmdbTier<K, V, D = V> {
    path: PathBuf,
    options: LmdbTierOptions,
    store: OnceCell<Option<LmdbStore>>,
    prepare: Arc<dyn Fn(&V) -> D + Send + Sync>,
    restore: Arc<dyn Fn(D) -> V + Send + Sync>,
    on_load: Option<Arc<dyn Fn(&K, &V) + Send + Sync>>,
}

impl<K, V> LmdbTier<K, V, V>
where
    K: CacheKey + Serialize,
    V: CacheValue + Serialize + DeserializeOwned,
{
    /// Tier over the environment at `path`, persisting values as-is.
    pub fn open(path: impl Into<PathBuf>, options: LmdbTierOptions) -> Self {
        Self::open_with_transform(path, options, |value: &V| value.clone(), |value| value)
    }
}

impl<K, V, D> LmdbTier<K, V, D>
where
    K: CacheKey + Serialize,
    V: CacheValue,
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Tier over the environment at `path` with a bidirectional value
    /// transform: `prepare` maps a value to its persisted representation
    /// on write, `restore` maps it back on read.
    pub fn open_with_transform(
        path: impl Into<PathBuf>,
        options: LmdbTierOptions,
        prepare: impl Fn(&V) -> D + Send + Sync + 'static,
        restore: impl Fn(D) -> V + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            options,
            store: OnceCell::new(),
            prepare: Arc::new(prepare),
            restore: Arc::new(restore),
            on_load: None,
        }
    }

    /// Observe every hit from this tier with `(key, value)` before the
    /// value is returned up the chain.
    pub fn with_on_load(mut self, on_load: impl Fn(&K, &V) + Send + Sync + 'static) -> Self {
        self.on_load = Some(Arc::new(on_load));
        self
    }

    /// Whether the environment is open and operational. Reports `false`
    /// both before first use and after a degraded open.
    pub fn is_operational(&self) -> bool {
        matches!(self.store.get(), Some(Some(_)))
    }

    /// The store, opened on first use. `None` means the tier is degraded.
    async fn store(&self) -> Option<&LmdbStore> {
        self.store
            .get_or_init(|| async {
                match LmdbStore::open(&self.path, &self.options) {
                    Ok(store) => {
                        tracing::debug!(path = %self.path.display(), store = %self.options.store_name,
                            "opened LMDB environment");
                        Some(store)
                    }
                    Err(err) => {
                        tracing::warn!(path = %self.path.display(), %err,
                            "unable to open LMDB environment, tier degrades to no-op");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    fn encode_key(key: &K) -> Result<Vec<u8>, LmdbTierError> {
        serde_json::to_vec(key).map_err(|e| LmdbTierError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl<K, V, D> Tier<K, V> for LmdbTier<K, V, D>
where
    K: CacheKey + Serialize,
    V: CacheValue,
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        TIER_NAME
    }

    async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        let Some(store) = self.store().await else {
            return Ok(None);
        };

        let key_bytes = Self::encode_key(key)?;
        let Some(bytes) = store.get_raw(&key_bytes)? else {
            return Ok(None);
        };

        let persisted: D = serde_json::from_slice(&bytes)
            .map_err(|e| LmdbTierError::Deserialization(e.to_string()))?;
        let value = (self.restore)(persisted);

        if let Some(on_load) = &self.on_load {
            on_load(key, &value);
        }

        Ok(Some(value))
    }

    async fn set(&self, key: &K, value: Option<&V>) -> CacheResult<()> {
        let Some(store) = self.store().await else {
            return Ok(());
        };

        let key_bytes = Self::encode_key(key)?;
        match value {
            Some(value) => {
                let persisted = (self.prepare)(value);
                let bytes = serde_json::to_vec(&persisted)
                    .map_err(|e| LmdbTierError::Serialization(e.to_string()))?;
                store.put_raw(&key_bytes, &bytes)?;
            }
            None => store.delete_raw(&key_bytes)?,
        }

        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let Some(store) = self.store().await else {
            return Ok(());
        };

        store.clear_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;

    fn tier_in(dir: &Path) -> LmdbTier<String, u32> {
        LmdbTier::open(dir.join("db"), LmdbTierOptions::new())
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier_in(dir.path());

        let key = "k".to_string();
        assert_eq!(tier.get(&key).await.unwrap(), None);

        tier.set(&key, Some(&42)).await.unwrap();
        assert_eq!(tier.get(&key).await.unwrap(), Some(42));
        assert!(tier.is_operational());
    }

    #[tokio::test]
    async fn test_set_none_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier_in(dir.path());

        let key = "k".to_string();
        tier.set(&key, Some(&1)).await.unwrap();
        tier.set(&key, None).await.unwrap();
        assert_eq!(tier.get(&key).await.unwrap(), None);

        // Deleting an absent key is not an error.
        tier.set(&key, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_empties_store() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier_in(dir.path());

        tier.set(&"a".to_string(), Some(&1)).await.unwrap();
        tier.set(&"b".to_string(), Some(&2)).await.unwrap();
        tier.clear().await.unwrap();

        assert_eq!(tier.get(&"a".to_string()).await.unwrap(), None);
        assert_eq!(tier.get(&"b".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let tier = tier_in(dir.path());
        tier.set(&"k".to_string(), Some(&7)).await.unwrap();
        drop(tier);

        let tier = tier_in(dir.path());
        assert_eq!(tier.get(&"k".to_string()).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_unopenable_path_degrades_to_noop() {
        let dir = tempfile::tempdir().unwrap();
        // A file where a directory is needed makes create_dir_all fail.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let tier: LmdbTier<String, u32> =
            LmdbTier::open(blocker.join("db"), LmdbTierOptions::new());

        let key = "k".to_string();
        assert_eq!(tier.get(&key).await.unwrap(), None);
        tier.set(&key, Some(&1)).await.unwrap();
        assert_eq!(tier.get(&key).await.unwrap(), None);
        tier.clear().await.unwrap();
        assert!(!tier.is_operational());
    }

    #[tokio::test]
    async fn test_value_transform_pair() {
        #[derive(Clone, Debug, PartialEq)]
        struct Celsius(f64);

        #[derive(Serialize, Deserialize)]
        struct Stored {
            millidegrees: i64,
        }

        let dir = tempfile::tempdir().unwrap();
        let tier: LmdbTier<String, Celsius, Stored> = LmdbTier::open_with_transform(
            dir.path().join("db"),
            LmdbTierOptions::new().with_store_name("temperatures"),
            |value: &Celsius| Stored {
                millidegrees: (value.0 * 1000.0) as i64,
            },
            |stored| Celsius(stored.millidegrees as f64 / 1000.0),
        );

        let key = "office".to_string();
        tier.set(&key, Some(&Celsius(21.5))).await.unwrap();
        assert_eq!(tier.get(&key).await.unwrap(), Some(Celsius(21.5)));
    }

    #[tokio::test]
    async fn test_on_load_observes_hits_only() {
        let dir = tempfile::tempdir().unwrap();
        let loads = Arc::new(AtomicUsize::new(0));
        let loads_in_hook = loads.clone();

        let tier: LmdbTier<String, u32> =
            LmdbTier::open(dir.path().join("db"), LmdbTierOptions::new())
                .with_on_load(move |_key, _value| {
                    loads_in_hook.fetch_add(1, Ordering::SeqCst);
                });

        let key = "k".to_string();
        tier.get(&key).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        tier.set(&key, Some(&5)).await.unwrap();
        tier.get(&key).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_sections_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let first: LmdbTier<String, u32> =
            LmdbTier::open(&path, LmdbTierOptions::new().with_store_name("first"));
        first.set(&"k".to_string(), Some(&1)).await.unwrap();
        drop(first);

        let second: LmdbTier<String, u32> =
            LmdbTier::open(&path, LmdbTierOptions::new().with_store_name("second"));
        assert_eq!(second.get(&"k".to_string()).await.unwrap(), None);
    }
}
