//! Cache Cell Module
//!
//! A single cached value kept fresh by stale-while-revalidate background refreshes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheStats, StatsRecorder};
use crate::error::{CacheError, Result};

/// Type-erased producer shared by a cell and its refresh tasks.
pub type Producer<V> =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;

/// Boxes a producer closure into a [`Producer`].
pub fn boxed_producer<V, F, Fut>(f: F) -> Producer<V>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    Arc::new(move |token| f(token).boxed())
}

/// Stand-in deadline for a ttl too large to add to an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

// == Cell State ==
struct CellState<V> {
    /// Last successfully produced value
    current: Option<V>,
    /// Snapshot of `current` while a refresh is in flight
    stale: Option<V>,
    next_refresh_at: Instant,
    last_updated_at: Option<Instant>,
    last_accessed_at: Instant,
}

impl<V> CellState<V> {
    fn store(&mut self, value: V, now: Instant, ttl: Duration) {
        self.current = Some(value);
        self.stale = None;
        self.last_updated_at = Some(now);
        self.next_refresh_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);
    }
}

struct CellInner<V> {
    state: RwLock<CellState<V>>,
    producer: Producer<V>,
    ttl: Duration,
    stats: Arc<StatsRecorder>,
}

// == Cache Cell ==
/// Caches the value of one key.
///
/// The first [`get`](CacheCell::get) loads synchronously while holding the
/// cell exclusively, so concurrent cold callers share a single producer call.
/// Once the ttl has elapsed, the next `get` snapshots the current value and
/// hands the refresh to a background task; until that task finishes every
/// caller is served the snapshot without waiting.
///
/// Cloning a cell is cheap and yields a handle to the same state. Refreshes
/// are spawned onto the ambient tokio runtime.
pub struct CacheCell<V> {
    inner: Arc<CellInner<V>>,
}

impl<V> Clone for CacheCell<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for CacheCell<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCell")
            .field("ttl", &self.inner.ttl)
            .finish_non_exhaustive()
    }
}

impl<V> CacheCell<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an empty cell. Nothing is produced until the first `get`.
    ///
    /// # Arguments
    /// * `producer` - Computes the value; receives a token it should honour
    /// * `ttl` - Freshness window, also the time budget of each refresh
    pub fn new<F, Fut>(producer: F, ttl: Duration) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        Self::with_recorder(boxed_producer(producer), ttl, Arc::new(StatsRecorder::new()))
    }

    pub(crate) fn with_recorder(
        producer: Producer<V>,
        ttl: Duration,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(CellInner {
                state: RwLock::new(CellState {
                    current: None,
                    stale: None,
                    next_refresh_at: now,
                    last_updated_at: None,
                    last_accessed_at: now,
                }),
                producer,
                ttl,
                stats,
            }),
        }
    }

    // == Get ==
    /// Returns the cached value, loading or refreshing it as needed.
    ///
    /// `ctx` only reaches the synchronous first load: if it is cancelled
    /// while the load runs, [`CacheError::Cancelled`] is returned and the
    /// cell stays empty.
    pub async fn get(&self, ctx: &CancellationToken) -> Result<V> {
        {
            let state = self.inner.state.read().await;
            if let Some(stale) = &state.stale {
                self.inner.stats.record_stale_hit();
                return Ok(stale.clone());
            }
        }

        let mut state = self.inner.state.write().await;
        state.last_accessed_at = Instant::now();

        let value = match state.current.clone() {
            Some(current) => {
                self.inner.stats.record_hit();
                current
            }
            None => {
                let value = self.load(ctx).await?;
                state.store(value.clone(), Instant::now(), self.inner.ttl);
                value
            }
        };

        // Callers queued on the write hold may find a refresh already launched.
        if state.stale.is_none() && Instant::now() >= state.next_refresh_at {
            state.stale = Some(value.clone());
            self.spawn_refresh();
        }

        Ok(value)
    }

    async fn load(&self, ctx: &CancellationToken) -> Result<V> {
        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(CacheError::Cancelled),
            produced = (self.inner.producer)(ctx.child_token()) => {
                produced.map_err(CacheError::Producer)
            }
        };

        match &result {
            Ok(_) => {
                self.inner.stats.record_load();
                debug!(ttl = ?self.inner.ttl, "cell loaded");
            }
            Err(err) => {
                self.inner.stats.record_load_failure();
                debug!(error = %err, "cell load failed");
            }
        }
        result
    }

    // == Refresh ==
    /// Launches a refresh task. The caller must have set `stale` under the write hold.
    fn spawn_refresh(&self) {
        let inner = Arc::clone(&self.inner);
        debug!(ttl = ?inner.ttl, "launching background refresh");
        tokio::spawn(refresh(inner));
    }

    // == Is Valid ==
    /// Returns true while the last produced value is within its ttl.
    pub async fn is_valid(&self) -> bool {
        let state = self.inner.state.read().await;
        Instant::now() < state.next_refresh_at
    }

    // == In Refresh ==
    /// Returns true while a background refresh is in flight.
    pub async fn in_refresh(&self) -> bool {
        self.inner.state.read().await.stale.is_some()
    }

    // == Invalidate ==
    /// Forces a background refresh, unless one is already running.
    ///
    /// Takes the same snapshot-then-launch path as an expired `get`, so at
    /// most one refresh is ever in flight. A cell that has never loaded is
    /// left alone; its next `get` loads it synchronously.
    pub async fn invalidate(&self) {
        let mut state = self.inner.state.write().await;
        if state.stale.is_some() {
            return;
        }
        if let Some(current) = state.current.clone() {
            state.stale = Some(current);
            self.spawn_refresh();
        }
    }

    /// Last time a caller went through the exclusive path of `get`.
    pub async fn last_accessed(&self) -> Instant {
        self.inner.state.read().await.last_accessed_at
    }

    /// Like [`last_accessed`](CacheCell::last_accessed), but `None` instead
    /// of waiting while the cell is held exclusively.
    pub(crate) fn try_last_accessed(&self) -> Option<Instant> {
        self.inner
            .state
            .try_read()
            .ok()
            .map(|state| state.last_accessed_at)
    }

    /// Last time a value was produced, or `None` before the first load.
    pub async fn last_updated(&self) -> Option<Instant> {
        self.inner.state.read().await.last_updated_at
    }

    /// Freshness window, also the time budget of each refresh.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Activity counters. For a cell owned by a bucket these are the bucket's.
    ///
    /// A cell does not know how many entries share its counters, so
    /// `total_entries` is always 0; use [`CacheBucket::stats`] for that.
    ///
    /// [`CacheBucket::stats`]: crate::cache::CacheBucket::stats
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(0)
    }
}

async fn refresh<V>(inner: Arc<CellInner<V>>)
where
    V: Clone + Send + Sync + 'static,
{
    let token = CancellationToken::new();
    let result = match tokio::time::timeout(inner.ttl, (inner.producer)(token.clone())).await {
        Ok(produced) => produced.map_err(CacheError::Producer),
        Err(_) => {
            token.cancel();
            Err(CacheError::RefreshTimeout(inner.ttl))
        }
    };

    let mut state = inner.state.write().await;
    match result {
        Ok(value) => {
            state.store(value, Instant::now(), inner.ttl);
            inner.stats.record_refresh();
            debug!("background refresh completed");
        }
        Err(err) => {
            // Keep `current` and `next_refresh_at`; the next access retries.
            state.stale = None;
            inner.stats.record_refresh_failure();
            warn!(error = %err, "background refresh failed, serving previous value");
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;
    use tokio_test::{assert_err, assert_ok};

    /// Producer that yields "A" on the first call and "B" afterwards,
    /// taking `delay` for every call but the first.
    fn a_then_b(calls: Arc<AtomicUsize>, delay: Duration) -> CacheCell<String> {
        CacheCell::new(
            move |_token| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok("A".to_string())
                    } else {
                        sleep(delay).await;
                        Ok("B".to_string())
                    }
                }
            },
            Duration::from_secs(1),
        )
    }

    /// Producer that succeeds once and fails on every later call.
    fn flaky(calls: Arc<AtomicUsize>) -> CacheCell<String> {
        CacheCell::new(
            move |_token| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok("good".to_string())
                    } else {
                        anyhow::bail!("backend unavailable")
                    }
                }
            },
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cell_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = a_then_b(calls.clone(), Duration::ZERO);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!cell.is_valid().await);
        assert!(!cell.in_refresh().await);
        assert!(cell.last_updated().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_while_revalidate() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = a_then_b(calls.clone(), Duration::from_millis(100));

        assert_eq!(cell.get(&ctx).await.unwrap(), "A");
        assert!(cell.is_valid().await);

        sleep(Duration::from_millis(1100)).await;
        assert!(!cell.is_valid().await);

        // Triggers the refresh, still serves the old value.
        assert_eq!(cell.get(&ctx).await.unwrap(), "A");
        assert!(cell.in_refresh().await);
        assert_eq!(cell.get(&ctx).await.unwrap(), "A");

        sleep(Duration::from_millis(200)).await;
        assert!(!cell.in_refresh().await);
        assert!(cell.is_valid().await);
        assert_eq!(cell.get(&ctx).await.unwrap(), "B");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = cell.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.refreshes, 1);
        assert_eq!(stats.stale_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_first_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cell = CacheCell::new(
            move |_token| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(50)).await;
                    Ok(42u64)
                }
            },
            Duration::from_secs(10),
        );

        let ctx = CancellationToken::new();
        let results =
            futures::future::join_all((0..16).map(|_| cell.get(&ctx))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), 42);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_refresh_in_flight() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = a_then_b(calls.clone(), Duration::from_millis(300));

        cell.get(&ctx).await.unwrap();
        sleep(Duration::from_millis(1100)).await;

        for _ in 0..10 {
            assert_eq!(cell.get(&ctx).await.unwrap(), "A");
        }
        sleep(Duration::from_millis(500)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cell.get(&ctx).await.unwrap(), "B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_load_failure_leaves_cell_empty() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cell: CacheCell<String> = CacheCell::new(
            move |_token| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("cold backend")
                }
            },
            Duration::from_secs(1),
        );

        let err = assert_err!(cell.get(&ctx).await);
        assert!(err.is_producer());
        assert_err!(cell.get(&ctx).await);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cell.in_refresh().await);
        assert!(cell.last_updated().await.is_none());
        assert_eq!(cell.stats().load_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_value() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = flaky(calls.clone());

        assert_eq!(cell.get(&ctx).await.unwrap(), "good");
        let updated = cell.last_updated().await;

        sleep(Duration::from_millis(1100)).await;
        assert_eq!(cell.get(&ctx).await.unwrap(), "good");
        sleep(Duration::from_millis(10)).await;

        assert!(!cell.in_refresh().await);
        assert!(!cell.is_valid().await);
        assert_eq!(cell.last_updated().await, updated);

        // Still due, so the next access retries.
        assert_eq!(cell.get(&ctx).await.unwrap(), "good");
        sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cell.stats().refresh_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_bounded_by_ttl() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = a_then_b(calls.clone(), Duration::from_secs(10));

        cell.get(&ctx).await.unwrap();
        sleep(Duration::from_millis(1100)).await;
        cell.get(&ctx).await.unwrap();
        assert!(cell.in_refresh().await);

        sleep(Duration::from_millis(1100)).await;
        assert!(!cell.in_refresh().await);
        assert_eq!(cell.stats().refresh_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_first_load() {
        let cell: CacheCell<String> = CacheCell::new(
            |token: CancellationToken| async move {
                token.cancelled().await;
                anyhow::bail!("never produced")
            },
            Duration::from_secs(1),
        );

        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = cell.get(&ctx).await;
        assert!(matches!(result, Err(CacheError::Cancelled)));
        assert!(cell.last_updated().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_launches_single_refresh() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = a_then_b(calls.clone(), Duration::from_millis(100));

        assert_ok!(cell.get(&ctx).await);
        cell.invalidate().await;
        assert!(cell.in_refresh().await);
        cell.invalidate().await;
        cell.invalidate().await;

        assert_eq!(cell.get(&ctx).await.unwrap(), "A");
        sleep(Duration::from_millis(200)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cell.get(&ctx).await.unwrap(), "B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_empty_cell_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = a_then_b(calls.clone(), Duration::ZERO);

        cell.invalidate().await;
        sleep(Duration::from_millis(10)).await;

        assert!(!cell.in_refresh().await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_never_goes_stale() {
        let ctx = CancellationToken::new();
        let cell = CacheCell::new(|_token| async { Ok(1u8) }, Duration::MAX);

        assert_eq!(cell.get(&ctx).await.unwrap(), 1);
        assert!(cell.is_valid().await);

        sleep(Duration::from_secs(86400)).await;
        assert_eq!(cell.get(&ctx).await.unwrap(), 1);
        assert!(cell.is_valid().await);
        assert!(!cell.in_refresh().await);
        assert_eq!(cell.stats().total_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_accessed_tracks_gets() {
        let ctx = CancellationToken::new();
        let cell = a_then_b(Arc::new(AtomicUsize::new(0)), Duration::ZERO);

        cell.get(&ctx).await.unwrap();
        let first = cell.last_accessed().await;

        sleep(Duration::from_millis(500)).await;
        cell.get(&ctx).await.unwrap();

        assert_eq!(cell.last_accessed().await - first, Duration::from_millis(500));
    }
}
