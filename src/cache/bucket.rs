//! Cache Bucket Module
//!
//! Keyed collection of cache cells with idle and size-bounded eviction.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{boxed_producer, CacheCell, CacheStats, StatsRecorder};
use crate::config::BucketConfig;
use crate::error::Result;
use crate::tasks::spawn_sweeper;

/// Key to cell mapping shared between a bucket and its sweeper.
pub(crate) type Entries<K, V> = Arc<RwLock<HashMap<K, CacheCell<V>>>>;

// == Cache Bucket ==
/// A homogeneous pool of cached values, one [`CacheCell`] per key.
///
/// Cells are created on first reference and bound to the producer passed
/// with that first call. If the config sets an idle timeout or a maximum
/// size, a sweeper task removes idle entries and, past the size bound, the
/// least recently accessed ones.
///
/// The sweeper is spawned onto the ambient tokio runtime at construction and
/// is cancelled by [`stop`](CacheBucket::stop) or when the bucket is dropped.
#[derive(Debug)]
pub struct CacheBucket<K, V> {
    entries: Entries<K, V>,
    config: BucketConfig,
    stats: Arc<StatsRecorder>,
    shutdown: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl<K, V> CacheBucket<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a bucket.
    ///
    /// # Arguments
    /// * `ttl` - Freshness window of every cell
    /// * `idle_timeout` - Evict entries unaccessed for longer than this
    /// * `max_size` - Maximum number of entries, 0 = unbounded
    pub fn new(ttl: Duration, idle_timeout: Option<Duration>, max_size: usize) -> Self {
        let config = BucketConfig {
            ttl,
            idle_timeout,
            max_size,
            ..BucketConfig::default()
        };
        Self::build(config)
    }

    /// Creates a bucket from a validated config.
    pub fn with_config(config: BucketConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: BucketConfig) -> Self {
        let entries: Entries<K, V> = Arc::new(RwLock::new(HashMap::new()));
        let stats = Arc::new(StatsRecorder::new());
        let shutdown = CancellationToken::new();

        let sweeper = config.needs_sweeper().then(|| {
            spawn_sweeper(
                entries.clone(),
                config.clone(),
                stats.clone(),
                shutdown.clone(),
            )
        });

        Self {
            entries,
            config,
            stats,
            shutdown,
            sweeper,
        }
    }

    // == Get ==
    /// Returns the value for `key`, creating its cell on first reference.
    ///
    /// `producer` is only used if the key has no cell yet; later calls for
    /// the same key reuse the first producer.
    pub async fn get<F, Fut>(&self, ctx: &CancellationToken, key: K, producer: F) -> Result<V>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let existing = self.entries.read().await.get(&key).cloned();
        let cell = match existing {
            Some(cell) => cell,
            None => {
                let mut entries = self.entries.write().await;
                entries
                    .entry(key)
                    .or_insert_with(|| {
                        debug!("creating cell");
                        CacheCell::with_recorder(
                            boxed_producer(producer),
                            self.config.ttl,
                            self.stats.clone(),
                        )
                    })
                    .clone()
            }
        };

        cell.get(ctx).await
    }

    async fn cell<Q>(&self, key: &Q) -> Option<CacheCell<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.read().await.get(key).cloned()
    }

    // == Is Valid ==
    /// Returns true if `key` holds a value within its ttl. Unknown keys are not valid.
    pub async fn is_valid<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.cell(key).await {
            Some(cell) => cell.is_valid().await,
            None => false,
        }
    }

    // == In Refresh ==
    /// Returns true if `key` has a background refresh in flight.
    pub async fn in_refresh<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.cell(key).await {
            Some(cell) => cell.in_refresh().await,
            None => false,
        }
    }

    // == Invalidate ==
    /// Forces a background refresh of `key`. Unknown keys are ignored.
    pub async fn invalidate<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(cell) = self.cell(key).await {
            cell.invalidate().await;
        }
    }

    pub async fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.read().await.contains_key(key)
    }

    // == Length ==
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    // == Stats ==
    /// Activity counters for every cell of the bucket plus its sweeper.
    pub async fn stats(&self) -> CacheStats {
        let total_entries = self.len().await;
        self.stats.snapshot(total_entries)
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }
}

impl<K, V> CacheBucket<K, V> {
    // == Stop ==
    /// Asks the sweeper to exit. It notices within two sweep ticks.
    ///
    /// Entries are left in place and can still be read.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<K, V> Drop for CacheBucket<K, V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
