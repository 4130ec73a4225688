//! Bucket Sweeper Task
//!
//! Background task that evicts idle entries and trims a bucket to its size bound.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::bucket::Entries;
use crate::cache::{CacheCell, EvictionCandidate, EvictionHeap, StatsRecorder};
use crate::config::BucketConfig;

/// Spawns the sweeper of a bucket.
///
/// Each cycle runs two phases separated by `sweep_interval` sleeps: idle
/// eviction (if `idle_timeout` is set), then size eviction (if `max_size`
/// is non-zero). Cancellation is checked only before each phase, so the task
/// exits at most two ticks after `shutdown` fires.
///
/// # Arguments
/// * `entries` - The bucket's key to cell mapping
/// * `config` - Eviction policy and tick length
/// * `stats` - Counters updated with every eviction
/// * `shutdown` - Stops the loop at the next tick boundary
///
/// # Returns
/// A JoinHandle for the spawned task.
pub(crate) fn spawn_sweeper<K, V>(
    entries: Entries<K, V>,
    config: BucketConfig,
    stats: Arc<StatsRecorder>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(
            idle_timeout = ?config.idle_timeout,
            max_size = config.max_size,
            interval = ?config.sweep_interval,
            "starting bucket sweeper"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if let Some(idle_timeout) = config.idle_timeout {
                let removed = evict_idle(&entries, idle_timeout).await;
                if removed > 0 {
                    stats.record_idle_evictions(removed);
                    info!("sweep: evicted {} idle entries", removed);
                }
            }
            tokio::time::sleep(config.sweep_interval).await;

            if shutdown.is_cancelled() {
                break;
            }

            if config.max_size > 0 {
                let removed = evict_excess(&entries, config.max_size).await;
                if removed > 0 {
                    stats.record_size_evictions(removed);
                    debug!("sweep: evicted {} entries over max size", removed);
                }
            }
            tokio::time::sleep(config.sweep_interval).await;
        }

        info!("bucket sweeper stopped");
    })
}

// == Idle Eviction ==
/// Removes entries unaccessed for longer than `idle_timeout`.
///
/// Returns the number of entries removed.
pub(crate) async fn evict_idle<K, V>(entries: &Entries<K, V>, idle_timeout: Duration) -> usize
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let now = Instant::now();
    let idle: Vec<K> = entries
        .read()
        .await
        .iter()
        .filter(|(_, cell)| {
            now.saturating_duration_since(last_accessed(cell, now)) > idle_timeout
        })
        .map(|(key, _)| key.clone())
        .collect();

    remove_keys(entries, idle).await
}

// == Size Eviction ==
/// Removes the least recently accessed entries beyond `max_size`.
///
/// Returns the number of entries removed.
pub(crate) async fn evict_excess<K, V>(entries: &Entries<K, V>, max_size: usize) -> usize
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let now = Instant::now();
    let stalest = {
        let entries = entries.read().await;
        let exceed = entries.len().saturating_sub(max_size);
        if exceed == 0 {
            return 0;
        }

        let mut heap = EvictionHeap::new(exceed);
        heap.extend(
            entries
                .iter()
                .map(|(key, cell)| EvictionCandidate::new(key.clone(), last_accessed(cell, now))),
        );
        heap.into_keys()
    };

    remove_keys(entries, stalest).await
}

/// Reads a cell's access time without waiting on it.
///
/// A cell held exclusively is being loaded or refreshed, so it counts as accessed `now`.
fn last_accessed<V>(cell: &CacheCell<V>, now: Instant) -> Instant
where
    V: Clone + Send + Sync + 'static,
{
    cell.try_last_accessed().unwrap_or(now)
}

async fn remove_keys<K, V>(entries: &Entries<K, V>, keys: Vec<K>) -> usize
where
    K: Eq + Hash,
{
    if keys.is_empty() {
        return 0;
    }

    let mut entries = entries.write().await;
    keys.iter()
        .filter(|key| entries.remove(*key).is_some())
        .count()
}
