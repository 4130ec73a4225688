//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cells and buckets.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The caller-supplied producer failed
    #[error("producer failed: {0}")]
    Producer(#[source] anyhow::Error),

    /// The caller cancelled a synchronous first load
    #[error("load cancelled by caller")]
    Cancelled,

    /// A background refresh overran its time budget
    #[error("refresh timed out after {0:?}")]
    RefreshTimeout(Duration),

    /// Rejected bucket configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Returns true if the error originated in the producer itself.
    pub fn is_producer(&self) -> bool {
        matches!(self, CacheError::Producer(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
