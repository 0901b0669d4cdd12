/// Configuration management for Follow Graph Service
///
/// Loads configuration from environment variables.
use crate::services::{FollowGraphConfig, ThrottleConfig};
use crate::workers::ReconciliationConfig;
use anyhow::{Context, Result};
use follow_cache::CacheSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Aggregate cache configuration
    pub cache: CacheConfig,
    /// Follow mutation limits
    pub follow: FollowConfig,
    /// Aggregate reconciliation
    pub reconcile: ReconcileConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Aggregate cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Shared Redis store; the in-process cache is used when unset
    pub redis_url: Option<String>,
    /// Entries older than this read as misses; unset keeps them until replaced
    pub staleness_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowConfig {
    pub rate_limit_enabled: bool,
    pub rate_limit_per_minute: u32,
    pub store_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: u32,
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", default_max_connections()),
            min_connections: env_or("DB_MIN_CONNECTIONS", default_min_connections()),
        };

        let staleness_secs = match std::env::var("FOLLOW_CACHE_STALENESS_SECS") {
            Ok(raw) => Some(
                raw.trim()
                    .parse()
                    .context("FOLLOW_CACHE_STALENESS_SECS must be a number of seconds")?,
            ),
            Err(_) => None,
        };

        let cache = CacheConfig {
            enabled: env_flag("CACHE_ENABLED", true),
            redis_url: std::env::var("REDIS_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            staleness_secs,
        };

        let follow = FollowConfig {
            rate_limit_enabled: env_flag("FOLLOW_RATE_LIMIT_ENABLED", true),
            rate_limit_per_minute: env_or("FOLLOW_RATE_LIMIT_PER_MINUTE", 50),
            store_timeout_ms: env_or("FOLLOW_STORE_TIMEOUT_MS", 2000),
        };

        let reconcile = ReconcileConfig {
            enabled: env_flag("RECONCILE_ENABLED", false),
            interval_secs: env_or("RECONCILE_INTERVAL_SECS", 3600),
            batch_size: env_or("RECONCILE_BATCH_SIZE", 500),
        };

        Ok(Config {
            app,
            database,
            cache,
            follow,
            reconcile,
        })
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            staleness: self.cache.staleness_secs.map(Duration::from_secs),
        }
    }

    pub fn follow_graph_config(&self) -> FollowGraphConfig {
        FollowGraphConfig {
            store_timeout: Duration::from_millis(self.follow.store_timeout_ms),
            throttle: ThrottleConfig {
                enabled: self.follow.rate_limit_enabled,
                per_minute: self.follow.rate_limit_per_minute,
            },
        }
    }

    pub fn reconciliation_config(&self) -> ReconciliationConfig {
        ReconciliationConfig {
            interval: Duration::from_secs(self.reconcile.interval_secs.max(1)),
            batch_size: self.reconcile.batch_size.max(1),
        }
    }
}
