//! Follow graph service
//!
//! Entry point for follow/unfollow and for reading follower counts. The store
//! is the source of truth; the aggregate cache sits in front of it for reads
//! and is patched by writers with the exact aggregates their transaction
//! committed. Cache trouble is logged and absorbed, never surfaced.

use super::throttle::{FollowThrottle, ThrottleConfig};
use crate::auth::CallerIdentity;
use crate::domain::edge::MAX_PAGE_SIZE;
use crate::domain::{
    Address, FollowAction, FollowAggregate, FollowingSnapshot, ProfileSummary, RelationshipPage,
    User,
};
use crate::error::{FollowGraphError, FollowGraphResult, StoreResult};
use crate::metrics::FollowMetrics;
use crate::repository::FollowGraphStore;
use follow_cache::{AggregateCache, AggregateEntry, CacheError, CacheResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// After a timed-out mutation, cache writes for both users are refused for
/// this many store timeouts; any read that began before the commit has
/// finished by then.
const TIMEOUT_HOLD_FACTOR: u32 = 4;

/// Service configuration
#[derive(Clone, Debug)]
pub struct FollowGraphConfig {
    /// Upper bound for every store and cache call
    pub store_timeout: Duration,
    pub throttle: ThrottleConfig,
}

impl Default for FollowGraphConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(2000),
            throttle: ThrottleConfig::default(),
        }
    }
}

pub struct FollowGraphService {
    store: Arc<dyn FollowGraphStore>,
    cache: Option<Arc<dyn AggregateCache>>,
    throttle: FollowThrottle,
    store_timeout: Duration,
    metrics: FollowMetrics,
}

impl FollowGraphService {
    pub fn new(
        store: Arc<dyn FollowGraphStore>,
        cache: Option<Arc<dyn AggregateCache>>,
        config: FollowGraphConfig,
    ) -> Self {
        Self {
            store,
            cache,
            throttle: FollowThrottle::new(&config.throttle),
            store_timeout: config.store_timeout,
            metrics: FollowMetrics::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn FollowGraphStore> {
        &self.store
    }

    pub fn cache(&self) -> Option<&Arc<dyn AggregateCache>> {
        self.cache.as_ref()
    }

    /// Make `caller` follow `target`.
    ///
    /// Returns the caller's edge set as committed. A second follow of the same
    /// target is rejected with `AlreadyFollowing`, or with `PersistenceConflict`
    /// when a concurrent identical follow won at the store.
    pub async fn follow(
        &self,
        caller: &CallerIdentity,
        target: &Address,
    ) -> FollowGraphResult<FollowingSnapshot> {
        let result = self.try_follow(caller, target).await;
        self.record("follow", &result);
        result
    }

    async fn try_follow(
        &self,
        caller: &CallerIdentity,
        target: &Address,
    ) -> FollowGraphResult<FollowingSnapshot> {
        let follower = caller.require_address()?;
        if follower == target {
            return Err(FollowGraphError::SelfFollowRejected);
        }
        self.throttle.check(follower)?;

        if self.bounded(self.store.is_following(follower, target)).await? {
            return Err(FollowGraphError::AlreadyFollowing);
        }

        let change = match self.bounded(self.store.insert_edge(follower, target)).await {
            Ok(change) => change,
            Err(err) => {
                self.forget_on_timeout(&err, [follower, target]).await;
                return Err(err);
            }
        };

        info!(
            follower = %follower,
            target = %target,
            followers_count = change.target.followers_count,
            "Follow created"
        );

        self.patch_cache("follow", change.aggregates()).await;
        Ok(change.into_snapshot())
    }

    /// Remove the `caller` -> `target` edge; `NotFollowing` when there is none
    pub async fn unfollow(
        &self,
        caller: &CallerIdentity,
        target: &Address,
    ) -> FollowGraphResult<FollowingSnapshot> {
        let result = self.try_unfollow(caller, target).await;
        self.record("unfollow", &result);
        result
    }

    async fn try_unfollow(
        &self,
        caller: &CallerIdentity,
        target: &Address,
    ) -> FollowGraphResult<FollowingSnapshot> {
        let follower = caller.require_address()?;
        if follower == target {
            return Err(FollowGraphError::SelfFollowRejected);
        }
        self.throttle.check(follower)?;

        let change = match self.bounded(self.store.delete_edge(follower, target)).await {
            Ok(change) => change,
            Err(err) => {
                self.forget_on_timeout(&err, [follower, target]).await;
                return Err(err);
            }
        };

        info!(
            follower = %follower,
            target = %target,
            followers_count = change.target.followers_count,
            "Follow removed"
        );

        self.patch_cache("unfollow", change.aggregates()).await;
        Ok(change.into_snapshot())
    }

    /// Follower/following counts of a user, served from the cache when fresh.
    ///
    /// Misses are filled from the stored aggregate row through the same
    /// versioned write the mutations use, so an older read never replaces a
    /// newer entry. Unknown users get zero counts.
    pub async fn get_aggregate_for(&self, address: &Address) -> FollowGraphResult<FollowAggregate> {
        if let Some(cached) = self.cached_aggregate(address).await {
            return Ok(cached);
        }

        let aggregate = self.bounded(self.store.load_aggregate(address)).await?;

        if let Some(cache) = &self.cache {
            let entry = AggregateEntry::from(&aggregate);
            match self.cache_call(cache.put_if_newer(&entry)).await {
                Ok(applied) => {
                    debug!(address = %address, version = aggregate.version, applied, "Cache filled")
                }
                Err(e) => {
                    warn!(error = %e, address = %address, "Failed to fill aggregate cache");
                    self.metrics.record_cache_fallback("get_aggregate");
                }
            }
        }

        Ok(aggregate)
    }

    async fn cached_aggregate(&self, address: &Address) -> Option<FollowAggregate> {
        let cache = self.cache.as_ref()?;

        match self.cache_call(cache.get(address.as_str())).await {
            Ok(Some(entry)) => match FollowAggregate::try_from(entry) {
                Ok(aggregate) if &aggregate.address == address => Some(aggregate),
                Ok(_) | Err(_) => {
                    warn!(address = %address, "Ignoring corrupt cached aggregate");
                    self.metrics.record_cache_fallback("get_aggregate");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, address = %address, "Aggregate cache read failed");
                self.metrics.record_cache_fallback("get_aggregate");
                None
            }
        }
    }

    /// Whether `follower` currently follows `target`
    pub async fn is_following(&self, follower: &Address, target: &Address) -> FollowGraphResult<bool> {
        if follower == target {
            return Ok(false);
        }
        self.bounded(self.store.is_following(follower, target)).await
    }

    /// Follow state of `follower` towards many targets in one store call
    pub async fn batch_is_following(
        &self,
        follower: &Address,
        targets: &[Address],
    ) -> FollowGraphResult<HashMap<Address, bool>> {
        if targets.is_empty() {
            return Ok(HashMap::new());
        }
        self.bounded(self.store.batch_is_following(follower, targets))
            .await
    }

    pub async fn get_followers(
        &self,
        address: &Address,
        limit: u32,
        offset: u32,
    ) -> FollowGraphResult<RelationshipPage> {
        self.bounded(
            self.store
                .list_followers(address, limit.min(MAX_PAGE_SIZE), offset),
        )
        .await
    }

    pub async fn get_following(
        &self,
        address: &Address,
        limit: u32,
        offset: u32,
    ) -> FollowGraphResult<RelationshipPage> {
        self.bounded(
            self.store
                .list_following(address, limit.min(MAX_PAGE_SIZE), offset),
        )
        .await
    }

    /// The authenticated caller's current edge set and counts
    pub async fn following_snapshot(
        &self,
        caller: &CallerIdentity,
    ) -> FollowGraphResult<FollowingSnapshot> {
        let address = caller.require_address()?;
        let following = self.bounded(self.store.following_set(address)).await?;
        let aggregate = self.get_aggregate_for(address).await?;

        Ok(FollowingSnapshot {
            address: address.clone(),
            following,
            aggregate,
        })
    }

    /// Everything a profile card needs: counts plus the viewer's follow control
    pub async fn profile_summary(
        &self,
        viewer: &CallerIdentity,
        user: User,
    ) -> FollowGraphResult<ProfileSummary> {
        let aggregate = self.get_aggregate_for(&user.address).await?;

        let viewer_is_following = match viewer.address() {
            Some(viewer) if viewer != &user.address => {
                Some(self.is_following(viewer, &user.address).await?)
            }
            _ => None,
        };
        let follow_action = FollowAction::for_viewer(
            viewer.address(),
            &user.address,
            viewer_is_following.unwrap_or(false),
        );

        Ok(ProfileSummary {
            user,
            aggregate,
            viewer_is_following,
            follow_action,
        })
    }

    /// Drop throttle buckets of followers that have been quiet long enough
    pub fn prune_throttle(&self) {
        self.throttle.retain_recent();
    }

    async fn bounded<T>(&self, call: impl Future<Output = StoreResult<T>>) -> FollowGraphResult<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(FollowGraphError::from),
            Err(_) => Err(FollowGraphError::Timeout),
        }
    }

    async fn cache_call<T>(&self, call: impl Future<Output = CacheResult<T>>) -> CacheResult<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Unavailable("cache call timed out".to_string())),
        }
    }

    /// Write committed aggregates through to the cache.
    /// Entries that can't be written are invalidated at the committed version,
    /// so readers fall back to the store and older fills stay out.
    async fn patch_cache(&self, operation: &'static str, aggregates: [&FollowAggregate; 2]) {
        let Some(cache) = &self.cache else {
            return;
        };

        for aggregate in aggregates {
            let entry = AggregateEntry::from(aggregate);
            if let Err(e) = self.cache_call(cache.put_if_newer(&entry)).await {
                warn!(
                    error = %e,
                    address = %aggregate.address,
                    operation,
                    "Failed to patch aggregate cache"
                );
                self.metrics.record_cache_fallback(operation);
                let floor = cache.invalidate(aggregate.address.as_str(), aggregate.version);
                if let Err(e) = self.cache_call(floor).await {
                    warn!(
                        error = %e,
                        address = %aggregate.address,
                        "Failed to invalidate aggregate cache"
                    );
                }
            }
        }
    }

    /// A timed out mutation may still commit at a version we never saw, so
    /// both cached aggregates are held off until any such commit has landed.
    async fn forget_on_timeout(&self, err: &FollowGraphError, addresses: [&Address; 2]) {
        if !matches!(err, FollowGraphError::Timeout) {
            return;
        }
        let Some(cache) = &self.cache else {
            return;
        };

        let hold = self.store_timeout.saturating_mul(TIMEOUT_HOLD_FACTOR);
        for address in addresses {
            let held = cache.invalidate_for(address.as_str(), hold);
            if let Err(e) = self.cache_call(held).await {
                warn!(error = %e, address = %address, "Failed to hold aggregate cache");
            }
        }
    }

    fn record<T>(&self, operation: &str, result: &FollowGraphResult<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        self.metrics.record_mutation(operation, outcome);
    }
}
