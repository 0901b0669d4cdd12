use crate::domain::{Address, FollowAggregate, FollowEdge, FollowingSnapshot, RelationshipPage};
use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Everything a committed follow/unfollow transaction produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeChange {
    pub edge: FollowEdge,
    /// Follower's aggregate after the change
    pub follower: FollowAggregate,
    /// Target's aggregate after the change
    pub target: FollowAggregate,
    /// Follower's edge set after the change
    pub following: BTreeMap<Address, DateTime<Utc>>,
}

impl EdgeChange {
    pub fn aggregates(&self) -> [&FollowAggregate; 2] {
        [&self.follower, &self.target]
    }

    pub fn into_snapshot(self) -> FollowingSnapshot {
        FollowingSnapshot {
            address: self.edge.follower,
            following: self.following,
            aggregate: self.follower,
        }
    }
}

/// Result of recounting one user's aggregate from their edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Consistent(FollowAggregate),
    Repaired {
        before: FollowAggregate,
        after: FollowAggregate,
    },
}

impl ReconcileOutcome {
    pub fn aggregate(&self) -> &FollowAggregate {
        match self {
            ReconcileOutcome::Consistent(aggregate) => aggregate,
            ReconcileOutcome::Repaired { after, .. } => after,
        }
    }
}

/// Persistence collaborator of the follow graph (source of truth).
///
/// Implementations must enforce at most one edge per ordered pair themselves
/// and write edge + both aggregate rows atomically.
#[async_trait::async_trait]
pub trait FollowGraphStore: Send + Sync {
    /// Insert the edge and bump both aggregates in one transaction.
    /// Fails with `StoreError::UniqueViolation` when the edge already exists.
    async fn insert_edge(&self, follower: &Address, target: &Address) -> StoreResult<EdgeChange>;

    /// Remove the edge and decrement both aggregates (floored at zero) in one
    /// transaction. Fails with `StoreError::EdgeNotFound` when there is no edge.
    async fn delete_edge(&self, follower: &Address, target: &Address) -> StoreResult<EdgeChange>;

    /// Check if follower is following target
    async fn is_following(&self, follower: &Address, target: &Address) -> StoreResult<bool>;

    /// Batch check if follower is following multiple targets
    async fn batch_is_following(
        &self,
        follower: &Address,
        targets: &[Address],
    ) -> StoreResult<HashMap<Address, bool>>;

    /// Full edge set of a follower
    async fn following_set(
        &self,
        follower: &Address,
    ) -> StoreResult<BTreeMap<Address, DateTime<Utc>>>;

    /// Followers of a user, newest first
    async fn list_followers(
        &self,
        address: &Address,
        limit: u32,
        offset: u32,
    ) -> StoreResult<RelationshipPage>;

    /// Users a user follows, newest first
    async fn list_following(
        &self,
        address: &Address,
        limit: u32,
        offset: u32,
    ) -> StoreResult<RelationshipPage>;

    /// Stored aggregate row; zero counts at version 0 for unknown users
    async fn load_aggregate(&self, address: &Address) -> StoreResult<FollowAggregate>;

    /// Addresses owning an aggregate row, ordered, strictly after `after`
    async fn list_aggregate_addresses(
        &self,
        after: Option<Address>,
        limit: u32,
    ) -> StoreResult<Vec<Address>>;

    /// Recount the user's edges and rewrite the aggregate row if it drifted
    async fn reconcile_aggregate(&self, address: &Address) -> StoreResult<ReconcileOutcome>;

    /// Health check (optional)
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
