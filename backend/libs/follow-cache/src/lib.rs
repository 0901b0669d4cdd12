//! Follow aggregate cache
//!
//! Holds follower/following counts per user in front of the follow graph store.
//! Every entry carries the version of the aggregate row it was read from, and
//! writes only land when they are at least as new as what is cached:
//! - Writers patch entries with the values their transaction committed
//! - Readers fill misses with the authoritative row, never a recount
//! - A slow reader can never replace a newer entry with an older one
//! - Invalidation leaves a marker that keeps the version floor in place
//! - Optional staleness window after which entries read as misses

mod error;
mod keys;
mod memory;
mod metrics;
mod redis_cache;

pub use error::{CacheError, CacheResult};
pub use keys::{CacheKey, CACHE_VERSION};
pub use memory::InMemoryAggregateCache;
pub use metrics::CacheMetrics;
pub use redis_cache::{RedisAggregateCache, SharedRedis};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cached follower/following counts of one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub address: String,
    pub followers_count: u64,
    pub following_count: u64,
    /// Version of the aggregate row these counts were read from
    pub version: u64,
    /// When the entry was written to the cache
    pub cached_at: DateTime<Utc>,
    /// Invalidation marker: never served, but its version still guards writes
    #[serde(default)]
    pub invalidated: bool,
}

impl AggregateEntry {
    pub fn new(
        address: impl Into<String>,
        followers_count: u64,
        following_count: u64,
        version: u64,
    ) -> Self {
        Self {
            address: address.into(),
            followers_count,
            following_count,
            version,
            cached_at: Utc::now(),
            invalidated: false,
        }
    }

    /// Marker left behind by an invalidation at `version`
    pub fn tombstone(address: impl Into<String>, version: u64) -> Self {
        Self {
            invalidated: true,
            ..Self::new(address, 0, 0, version)
        }
    }
}

/// Cache behaviour shared by every backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum age of an entry; `None` keeps entries until replaced or invalidated
    pub staleness: Option<Duration>,
}

impl CacheSettings {
    pub fn with_staleness(staleness: Duration) -> Self {
        Self {
            staleness: Some(staleness),
        }
    }
}

/// Aggregate cache operations
#[async_trait::async_trait]
pub trait AggregateCache: Send + Sync {
    /// Get the cached aggregate for an address.
    /// Returns `None` on a miss or when the entry is older than the staleness window.
    async fn get(&self, address: &str) -> CacheResult<Option<AggregateEntry>>;

    /// Store the entry unless a strictly newer version is already cached.
    /// Returns whether the entry was written.
    async fn put_if_newer(&self, entry: &AggregateEntry) -> CacheResult<bool>;

    /// Stop serving the cached aggregate for an address.
    ///
    /// `version` stays behind as a floor: later writes below it are rejected,
    /// and the first write at or above it replaces the marker.
    async fn invalidate(&self, address: &str, version: u64) -> CacheResult<()>;

    /// Stop serving the cached aggregate and reject every write for `hold`.
    ///
    /// For writes whose committed version is unknown, e.g. a timed-out
    /// transaction that may still commit.
    async fn invalidate_for(&self, address: &str, hold: Duration) -> CacheResult<()>;

    /// Connectivity check (optional)
    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
