//! In-process aggregate cache

use crate::{AggregateCache, AggregateEntry, CacheKey, CacheMetrics, CacheResult, CacheSettings};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

struct StoredEntry {
    entry: AggregateEntry,
    written_at: Instant,
    /// Set on hold markers only; an expired entry counts as absent
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(entry: AggregateEntry, expires_at: Option<Instant>) -> Self {
        Self {
            entry,
            written_at: Instant::now(),
            expires_at,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Version this entry still enforces on writes, if any
    fn floor(&self) -> Option<u64> {
        (!self.is_expired()).then_some(self.entry.version)
    }
}

/// Aggregate cache kept in process memory.
///
/// Used when no shared Redis store is configured and by tests. Version checks
/// run under the per-key shard lock, so concurrent writers for the same address
/// are serialized.
pub struct InMemoryAggregateCache {
    entries: DashMap<String, StoredEntry>,
    settings: CacheSettings,
    metrics: CacheMetrics,
}

impl InMemoryAggregateCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: DashMap::new(),
            settings,
            metrics: CacheMetrics::new(),
        }
    }

    /// Number of entries held, stale ones and invalidation markers included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_stale(&self, stored: &StoredEntry) -> bool {
        match self.settings.staleness {
            Some(window) => stored.written_at.elapsed() > window,
            None => false,
        }
    }
}

impl Default for InMemoryAggregateCache {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

#[async_trait::async_trait]
impl AggregateCache for InMemoryAggregateCache {
    async fn get(&self, address: &str) -> CacheResult<Option<AggregateEntry>> {
        let key = CacheKey::aggregate(address);
        match self.entries.get(&key) {
            Some(stored) if stored.is_expired() || stored.entry.invalidated => {
                debug!(key = %key, "Cache miss (invalidated)");
                self.metrics.record_miss(&key);
                Ok(None)
            }
            Some(stored) if self.is_stale(&stored) => {
                // Stale entries stay in place so their version still guards
                // against older fills.
                debug!(key = %key, "Cache stale");
                self.metrics.record_stale(&key);
                Ok(None)
            }
            Some(stored) => {
                debug!(key = %key, "Cache hit");
                self.metrics.record_hit(&key);
                Ok(Some(stored.entry.clone()))
            }
            None => {
                debug!(key = %key, "Cache miss");
                self.metrics.record_miss(&key);
                Ok(None)
            }
        }
    }

    async fn put_if_newer(&self, entry: &AggregateEntry) -> CacheResult<bool> {
        let key = CacheKey::aggregate(&entry.address);
        let mut fresh = entry.clone();
        fresh.cached_at = chrono::Utc::now();
        let stored = StoredEntry::new(fresh, None);

        let applied = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().floor().is_some_and(|floor| floor > entry.version) {
                    false
                } else {
                    occupied.insert(stored);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(stored);
                true
            }
        };

        debug!(key = %key, version = entry.version, applied, "Cache put");
        self.metrics.record_write(&key, applied);
        Ok(applied)
    }

    async fn invalidate(&self, address: &str, version: u64) -> CacheResult<()> {
        let key = CacheKey::aggregate(address);
        let marker = StoredEntry::new(AggregateEntry::tombstone(address, version), None);

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                // A newer entry already supersedes the version being dropped
                if !occupied.get().floor().is_some_and(|floor| floor > version) {
                    occupied.insert(marker);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(marker);
            }
        }

        debug!(key = %key, version, "Cache invalidate");
        self.metrics.record_invalidation(&key);
        Ok(())
    }

    async fn invalidate_for(&self, address: &str, hold: Duration) -> CacheResult<()> {
        let key = CacheKey::aggregate(address);
        let marker = StoredEntry::new(
            AggregateEntry::tombstone(address, u64::MAX),
            Instant::now().checked_add(hold),
        );
        self.entries.insert(key.clone(), marker);

        debug!(key = %key, hold = ?hold, "Cache hold");
        self.metrics.record_invalidation(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = InMemoryAggregateCache::default();
        let entry = AggregateEntry::new("SP1", 3, 4, 7);

        assert!(cache.put_if_newer(&entry).await.unwrap());
        let cached = cache.get("SP1").await.unwrap().unwrap();
        assert_eq!(cached.followers_count, 3);
        assert_eq!(cached.following_count, 4);
        assert_eq!(cached.version, 7);
    }

    #[tokio::test]
    async fn test_older_version_is_rejected() {
        let cache = InMemoryAggregateCache::default();
        cache
            .put_if_newer(&AggregateEntry::new("SP1", 5, 0, 10))
            .await
            .unwrap();

        let applied = cache
            .put_if_newer(&AggregateEntry::new("SP1", 4, 0, 9))
            .await
            .unwrap();

        assert!(!applied);
        assert_eq!(cache.get("SP1").await.unwrap().unwrap().followers_count, 5);
    }

    #[tokio::test]
    async fn test_equal_version_refreshes_entry() {
        let cache = InMemoryAggregateCache::default();
        let entry = AggregateEntry::new("SP1", 1, 1, 2);
        cache.put_if_newer(&entry).await.unwrap();

        assert!(cache.put_if_newer(&entry).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_entry_reads_as_miss_but_keeps_version() {
        let cache =
            InMemoryAggregateCache::new(CacheSettings::with_staleness(Duration::from_millis(20)));
        cache
            .put_if_newer(&AggregateEntry::new("SP1", 2, 2, 5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("SP1").await.unwrap().is_none());

        // The stale entry still rejects older versions
        let applied = cache
            .put_if_newer(&AggregateEntry::new("SP1", 1, 1, 4))
            .await
            .unwrap();
        assert!(!applied);

        // ...and a refill at the same version makes it fresh again
        cache
            .put_if_newer(&AggregateEntry::new("SP1", 2, 2, 5))
            .await
            .unwrap();
        assert!(cache.get("SP1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = InMemoryAggregateCache::default();
        cache
            .put_if_newer(&AggregateEntry::new("SP1", 1, 0, 1))
            .await
            .unwrap();
        cache.invalidate("SP1", 1).await.unwrap();

        assert!(cache.get("SP1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidated_address_rejects_older_fill() {
        let cache = InMemoryAggregateCache::default();
        cache.invalidate("SP1", 3).await.unwrap();

        let older = cache
            .put_if_newer(&AggregateEntry::new("SP1", 0, 0, 2))
            .await
            .unwrap();
        assert!(!older);
        assert!(cache.get("SP1").await.unwrap().is_none());

        let committed = cache
            .put_if_newer(&AggregateEntry::new("SP1", 1, 0, 3))
            .await
            .unwrap();
        assert!(committed);
        assert_eq!(cache.get("SP1").await.unwrap().unwrap().followers_count, 1);
    }

    #[tokio::test]
    async fn test_invalidate_keeps_newer_entry() {
        let cache = InMemoryAggregateCache::default();
        cache
            .put_if_newer(&AggregateEntry::new("SP1", 4, 0, 8))
            .await
            .unwrap();
        cache.invalidate("SP1", 6).await.unwrap();

        let cached = cache.get("SP1").await.unwrap().unwrap();
        assert_eq!(cached.version, 8);
    }

    #[tokio::test]
    async fn test_hold_rejects_every_write_until_it_lapses() {
        let cache = InMemoryAggregateCache::default();
        cache
            .invalidate_for("SP1", Duration::from_millis(30))
            .await
            .unwrap();

        let during = cache
            .put_if_newer(&AggregateEntry::new("SP1", 9, 9, 100))
            .await
            .unwrap();
        assert!(!during);
        assert!(cache.get("SP1").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let after = cache
            .put_if_newer(&AggregateEntry::new("SP1", 1, 1, 1))
            .await
            .unwrap();
        assert!(after);
        assert!(cache.get("SP1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hold_survives_huge_duration() {
        let cache = InMemoryAggregateCache::default();
        cache.invalidate_for("SP1", Duration::MAX).await.unwrap();

        let applied = cache
            .put_if_newer(&AggregateEntry::new("SP1", 1, 1, 1))
            .await
            .unwrap();
        assert!(!applied);
    }
}
