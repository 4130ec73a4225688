//! Live Cache - An in-process stale-while-revalidate cache
//!
//! Serves a computed value per key while refreshing it in the background,
//! and bounds memory by evicting idle or least recently accessed entries.

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{CacheBucket, CacheCell, CacheStats, EvictionCandidate, EvictionHeap};
pub use config::BucketConfig;
pub use error::{CacheError, Result};
pub use tokio_util::sync::CancellationToken;
