//! Shared fixtures for follow graph integration tests
#![allow(dead_code)]

use follow_cache::{AggregateCache, CacheSettings, InMemoryAggregateCache};
use follow_graph_service::auth::CallerIdentity;
use follow_graph_service::domain::Address;
use follow_graph_service::repository::{FollowGraphStore, InMemoryFollowStore};
use follow_graph_service::services::{FollowGraphConfig, FollowGraphService, ThrottleConfig};
use std::sync::Arc;
use std::time::Duration;

pub fn addr(s: &str) -> Address {
    Address::parse(s).expect("valid test address")
}

pub fn caller(s: &str) -> CallerIdentity {
    CallerIdentity::authenticated(addr(s))
}

pub fn unthrottled() -> FollowGraphConfig {
    FollowGraphConfig {
        store_timeout: Duration::from_secs(5),
        throttle: ThrottleConfig {
            enabled: false,
            per_minute: 0,
        },
    }
}

/// Service over the in-memory store and cache, with handles to both
pub struct Harness {
    pub service: Arc<FollowGraphService>,
    pub store: Arc<InMemoryFollowStore>,
    pub cache: Arc<InMemoryAggregateCache>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CacheSettings::default(), unthrottled())
    }

    pub fn with(settings: CacheSettings, config: FollowGraphConfig) -> Self {
        let store = Arc::new(InMemoryFollowStore::new());
        let cache = Arc::new(InMemoryAggregateCache::new(settings));
        let service = Arc::new(FollowGraphService::new(
            store.clone() as Arc<dyn FollowGraphStore>,
            Some(cache.clone() as Arc<dyn AggregateCache>),
            config,
        ));

        Self {
            service,
            store,
            cache,
        }
    }

    /// Counts straight from the store, bypassing the cache
    pub async fn stored_counts(&self, address: &str) -> (u64, u64) {
        self.store
            .load_aggregate(&addr(address))
            .await
            .expect("load aggregate")
            .counts()
    }

    /// Counts as served to readers
    pub async fn served_counts(&self, address: &str) -> (u64, u64) {
        self.service
            .get_aggregate_for(&addr(address))
            .await
            .expect("get aggregate")
            .counts()
    }
}
