//! Configuration Module
//!
//! Eviction and refresh policy for a cache bucket.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Default time-to-live of each cell.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default delay between the two phases of a sweep cycle.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Bucket policy parameters.
///
/// Durations deserialize from human-readable strings such as `"30s"` or
/// `"5m"`, so the policy can live in an application's own config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Freshness window of each cell, also the budget of every refresh attempt
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Entries unaccessed for longer than this are evicted
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
    /// Maximum number of entries, 0 = unbounded
    pub max_size: usize,
    /// Sleep between sweep phases
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl BucketConfig {
    /// Creates a config with the given ttl and no eviction policy.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Returns true if a sweeper has any work to do under this policy.
    pub fn needs_sweeper(&self) -> bool {
        self.idle_timeout.is_some() || self.max_size > 0
    }

    /// Checks the policy for values that would make the sweeper misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.needs_sweeper() && self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep_interval must be greater than zero".to_string(),
            ));
        }
        if self.idle_timeout.is_some_and(|idle| idle.is_zero()) {
            return Err(CacheError::InvalidConfig(
                "idle_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            idle_timeout: None,
            max_size: 0,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}
