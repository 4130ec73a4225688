//! Cache Module
//!
//! Provides stale-while-revalidate cells, buckets of cells and the eviction heap.

pub(crate) mod bucket;
mod cell;
mod eviction;
mod stats;


// Re-export public types
pub use bucket::CacheBucket;
pub use cell::{boxed_producer, CacheCell, Producer};
pub use eviction::{EvictionCandidate, EvictionHeap};
pub use stats::CacheStats;
pub(crate) use stats::StatsRecorder;
