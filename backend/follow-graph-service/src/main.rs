//! Follow graph maintenance process
//!
//! Builds the follow service over PostgreSQL and the aggregate cache, keeps
//! its throttle trimmed and runs reconciliation until Ctrl-C. The transport
//! layer embeds the library and constructs its `FollowGraphService` the same
//! way from `Config`.

use anyhow::{anyhow, Context, Result};
use follow_cache::{AggregateCache, CacheMetrics, InMemoryAggregateCache, RedisAggregateCache};
use follow_graph_service::config::Config;
use follow_graph_service::metrics::FollowMetrics;
use follow_graph_service::repository::{FollowGraphStore, PostgresFollowStore};
use follow_graph_service::services::FollowGraphService;
use follow_graph_service::workers::ReconciliationWorker;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const THROTTLE_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "follow_graph_service=info,follow_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Follow Graph Service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        env = %config.app.env,
        cache_enabled = config.cache.enabled,
        reconcile_enabled = config.reconcile.enabled,
        "Configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store: Arc<dyn FollowGraphStore> = Arc::new(PostgresFollowStore::new(pool));
    if let Err(e) = store.health_check().await {
        error!(error = %e, "PostgreSQL health check failed - aborting");
        return Err(anyhow!("PostgreSQL is not healthy: {}", e));
    }
    info!("Connected to PostgreSQL");

    let cache = build_cache(&config).await;

    let registry = prometheus::default_registry();
    FollowMetrics::register(registry).context("Failed to register follow metrics")?;
    CacheMetrics::register(registry).context("Failed to register cache metrics")?;

    let follow_config = config.follow_graph_config();
    info!(
        store_timeout = ?follow_config.store_timeout,
        throttle_enabled = follow_config.throttle.enabled,
        throttle_per_minute = follow_config.throttle.per_minute,
        "Follow graph service configured"
    );
    let service = Arc::new(FollowGraphService::new(
        store.clone(),
        cache.clone(),
        follow_config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pruning = tokio::spawn(prune_throttle(service, shutdown_rx.clone()));

    let reconciliation = if config.reconcile.enabled {
        let worker = ReconciliationWorker::new(
            store.clone(),
            cache.clone(),
            config.reconciliation_config(),
        );
        Some(tokio::spawn(async move { worker.run(shutdown_rx).await }))
    } else {
        info!("Reconciliation disabled by configuration");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Err(e) = pruning.await {
        warn!(error = %e, "Throttle pruning task ended abnormally");
    }
    if let Some(handle) = reconciliation {
        if let Err(e) = handle.await {
            warn!(error = %e, "Reconciliation task ended abnormally");
        }
    }

    info!("Follow Graph Service stopped");
    Ok(())
}

/// Shared Redis cache when configured, in-process cache otherwise
async fn build_cache(config: &Config) -> Option<Arc<dyn AggregateCache>> {
    if !config.cache.enabled {
        info!("Aggregate cache disabled by configuration");
        return None;
    }

    let settings = config.cache_settings();
    if let Some(url) = &config.cache.redis_url {
        match RedisAggregateCache::connect(url, settings).await {
            Ok(cache) => match cache.ping().await {
                Ok(()) => {
                    info!("Connected to Redis for aggregate caching");
                    return Some(Arc::new(cache));
                }
                Err(e) => warn!(error = %e, "Redis ping failed - using in-process cache"),
            },
            Err(e) => warn!(error = %e, "Failed to connect to Redis - using in-process cache"),
        }
    }

    Some(Arc::new(InMemoryAggregateCache::new(settings)))
}

/// Drop idle throttle buckets until `shutdown` flips to true
async fn prune_throttle(service: Arc<FollowGraphService>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(THROTTLE_PRUNE_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => service.prune_throttle(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
