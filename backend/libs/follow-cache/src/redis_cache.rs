//! Redis-backed aggregate cache shared by every service instance

use crate::{
    AggregateCache, AggregateEntry, CacheError, CacheKey, CacheMetrics, CacheResult,
    CacheSettings,
};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared Redis connection manager
pub type SharedRedis = Arc<Mutex<ConnectionManager>>;

/// Keys outlive the staleness window by this factor so that a stale entry
/// keeps guarding its version for a while after it stops being served.
const RETENTION_FACTOR: u32 = 4;

/// Redis rejects PX values that overflow its clock
const MAX_EXPIRY_MS: u64 = (i64::MAX / 2) as u64;

/// Key expiry for entries and invalidation markers; 0 means none.
///
/// A retention too large to represent is stored without expiry.
fn retention_millis(staleness: Option<Duration>) -> u64 {
    staleness
        .and_then(|window| window.checked_mul(RETENTION_FACTOR))
        .and_then(|retention| u64::try_from(retention.as_millis()).ok())
        .filter(|ms| *ms <= MAX_EXPIRY_MS)
        .unwrap_or(0)
}

/// Hold markers always expire, so a zero or huge hold is clamped.
fn hold_millis(hold: Duration) -> u64 {
    u64::try_from(hold.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_EXPIRY_MS)
}

/// Compare-and-set on the entry version. Also writes invalidation markers,
/// which carry the version they guard.
///
/// KEYS[1] = aggregate key
/// ARGV[1] = serialized entry, ARGV[2] = entry version, ARGV[3] = expiry in ms (0 = none)
const PUT_IF_NEWER_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
  local ok, decoded = pcall(cjson.decode, current)
  if ok and type(decoded) == 'table' then
    local cached_version = tonumber(decoded['version'])
    if cached_version ~= nil and cached_version > tonumber(ARGV[2]) then
      return 0
    end
  end
end
local expiry = tonumber(ARGV[3])
if expiry > 0 then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', expiry)
else
  redis.call('SET', KEYS[1], ARGV[1])
end
return 1
"#;

/// Aggregate cache stored in Redis
#[derive(Clone)]
pub struct RedisAggregateCache {
    redis: SharedRedis,
    settings: CacheSettings,
    put_script: Arc<Script>,
    metrics: CacheMetrics,
}

impl RedisAggregateCache {
    pub fn new(redis: SharedRedis, settings: CacheSettings) -> Self {
        Self {
            redis,
            settings,
            put_script: Arc::new(Script::new(PUT_IF_NEWER_SCRIPT)),
            metrics: CacheMetrics::new(),
        }
    }

    /// Open a connection manager for `redis_url`
    pub async fn connect(redis_url: &str, settings: CacheSettings) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(Arc::new(Mutex::new(manager)), settings))
    }

    async fn write_if_newer(&self, key: &str, entry: &AggregateEntry) -> CacheResult<bool> {
        let data = serde_json::to_string(entry)?;

        let mut conn = self.redis.lock().await;
        let applied: i32 = self
            .put_script
            .key(key)
            .arg(data)
            .arg(entry.version)
            .arg(retention_millis(self.settings.staleness))
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| {
                self.metrics.record_error(key, "redis");
                CacheError::Redis(e)
            })?;

        Ok(applied == 1)
    }

    fn is_stale(&self, entry: &AggregateEntry) -> bool {
        let Some(window) = self.settings.staleness else {
            return false;
        };
        let age = Utc::now()
            .signed_duration_since(entry.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age > window
    }
}

#[async_trait::async_trait]
impl AggregateCache for RedisAggregateCache {
    async fn get(&self, address: &str) -> CacheResult<Option<AggregateEntry>> {
        let key = CacheKey::aggregate(address);
        let mut conn = self.redis.lock().await;

        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(data)) => match serde_json::from_str::<AggregateEntry>(&data) {
                Ok(entry) if entry.invalidated => {
                    debug!(key = %key, "Cache miss (invalidated)");
                    self.metrics.record_miss(&key);
                    Ok(None)
                }
                Ok(entry) if self.is_stale(&entry) => {
                    debug!(key = %key, "Cache stale");
                    self.metrics.record_stale(&key);
                    Ok(None)
                }
                Ok(entry) => {
                    debug!(key = %key, "Cache hit");
                    self.metrics.record_hit(&key);
                    Ok(Some(entry))
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache deserialization failed");
                    self.metrics.record_error(&key, "deserialize");
                    // Delete corrupted cache entry
                    let _ = conn.del::<_, ()>(&key).await;
                    Ok(None)
                }
            },
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                self.metrics.record_miss(&key);
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Redis get error");
                self.metrics.record_error(&key, "redis");
                Err(CacheError::Redis(e))
            }
        }
    }

    async fn put_if_newer(&self, entry: &AggregateEntry) -> CacheResult<bool> {
        let key = CacheKey::aggregate(&entry.address);
        let mut fresh = entry.clone();
        fresh.cached_at = Utc::now();
        let applied = self.write_if_newer(&key, &fresh).await?;

        debug!(key = %key, version = entry.version, applied, "Cache put");
        self.metrics.record_write(&key, applied);
        Ok(applied)
    }

    async fn invalidate(&self, address: &str, version: u64) -> CacheResult<()> {
        let key = CacheKey::aggregate(address);
        // Rejected only when a newer entry already supersedes `version`
        self.write_if_newer(&key, &AggregateEntry::tombstone(address, version))
            .await?;

        debug!(key = %key, version, "Cache invalidate");
        self.metrics.record_invalidation(&key);
        Ok(())
    }

    async fn invalidate_for(&self, address: &str, hold: Duration) -> CacheResult<()> {
        let key = CacheKey::aggregate(address);
        let data = serde_json::to_string(&AggregateEntry::tombstone(address, u64::MAX))?;

        let mut conn = self.redis.lock().await;
        redis::cmd("SET")
            .arg(&key)
            .arg(data)
            .arg("PX")
            .arg(hold_millis(hold))
            .query_async::<_, ()>(&mut *conn)
            .await
            .map_err(|e| {
                self.metrics.record_error(&key, "redis");
                CacheError::Redis(e)
            })?;

        debug!(key = %key, hold = ?hold, "Cache hold");
        self.metrics.record_invalidation(&key);
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.redis.lock().await;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::Redis)?;
        Ok(())
    }
}
