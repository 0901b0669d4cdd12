use super::{EdgeChange, FollowGraphStore, ReconcileOutcome};
use crate::domain::edge::MAX_PAGE_SIZE;
use crate::domain::{Address, FollowAggregate, FollowEdge, RelationshipPage};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

type EdgeMap = BTreeMap<Address, DateTime<Utc>>;

#[derive(Default)]
struct GraphState {
    /// follower -> targets
    following: HashMap<Address, EdgeMap>,
    /// target -> followers
    followers: HashMap<Address, EdgeMap>,
    stats: BTreeMap<Address, FollowAggregate>,
}

impl GraphState {
    fn has_edge(&self, follower: &Address, target: &Address) -> bool {
        self.following
            .get(follower)
            .map(|targets| targets.contains_key(target))
            .unwrap_or(false)
    }

    fn adjust(
        &mut self,
        address: &Address,
        followers_delta: i64,
        following_delta: i64,
    ) -> FollowAggregate {
        let aggregate = self
            .stats
            .entry(address.clone())
            .or_insert_with(|| FollowAggregate::empty(address.clone()));
        aggregate.followers_count = apply_delta(aggregate.followers_count, followers_delta);
        aggregate.following_count = apply_delta(aggregate.following_count, following_delta);
        aggregate.version += 1;
        aggregate.clone()
    }

    fn following_of(&self, follower: &Address) -> EdgeMap {
        self.following.get(follower).cloned().unwrap_or_default()
    }

    fn edge_cardinality(&self, address: &Address) -> (u64, u64) {
        let followers = self.followers.get(address).map(|m| m.len()).unwrap_or(0);
        let following = self.following.get(address).map(|m| m.len()).unwrap_or(0);
        (followers as u64, following as u64)
    }
}

fn apply_delta(count: u64, delta: i64) -> u64 {
    if delta >= 0 {
        count.saturating_add(delta as u64)
    } else {
        count.saturating_sub(delta.unsigned_abs())
    }
}

fn page_of(edges: Option<&EdgeMap>, limit: u32, offset: u32) -> RelationshipPage {
    let Some(edges) = edges else {
        return RelationshipPage::empty();
    };

    let mut ordered: Vec<(&Address, &DateTime<Utc>)> = edges.iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let total_count = ordered.len() as u64;
    let addresses: Vec<Address> = ordered
        .into_iter()
        .skip(offset as usize)
        .take(limit.min(MAX_PAGE_SIZE) as usize)
        .map(|(address, _)| address.clone())
        .collect();
    let has_more = (offset as u64 + addresses.len() as u64) < total_count;

    RelationshipPage {
        addresses,
        total_count,
        has_more,
    }
}

/// Follow graph store kept in process memory.
///
/// A single lock covers edges and aggregates, so every mutation is atomic
/// with respect to every other. Used by tests and local runs without
/// PostgreSQL.
#[derive(Default)]
pub struct InMemoryFollowStore {
    state: Mutex<GraphState>,
}

impl InMemoryFollowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of edges
    pub fn edge_count(&self) -> usize {
        self.state.lock().following.values().map(|m| m.len()).sum()
    }

    /// Overwrite a stored aggregate without touching edges.
    ///
    /// Seeds drift for reconciliation runs; the version still moves forward.
    pub fn overwrite_aggregate(
        &self,
        address: &Address,
        followers_count: u64,
        following_count: u64,
    ) -> FollowAggregate {
        let mut state = self.state.lock();
        let aggregate = state
            .stats
            .entry(address.clone())
            .or_insert_with(|| FollowAggregate::empty(address.clone()));
        aggregate.followers_count = followers_count;
        aggregate.following_count = following_count;
        aggregate.version += 1;
        aggregate.clone()
    }
}

#[async_trait::async_trait]
impl FollowGraphStore for InMemoryFollowStore {
    async fn insert_edge(&self, follower: &Address, target: &Address) -> StoreResult<EdgeChange> {
        if follower == target {
            return Err(StoreError::SelfEdge);
        }

        let mut state = self.state.lock();
        if state.has_edge(follower, target) {
            return Err(StoreError::UniqueViolation);
        }

        let created_at = Utc::now();
        state
            .following
            .entry(follower.clone())
            .or_default()
            .insert(target.clone(), created_at);
        state
            .followers
            .entry(target.clone())
            .or_default()
            .insert(follower.clone(), created_at);

        let follower_agg = state.adjust(follower, 0, 1);
        let target_agg = state.adjust(target, 1, 0);

        Ok(EdgeChange {
            edge: FollowEdge {
                follower: follower.clone(),
                target: target.clone(),
                created_at,
            },
            follower: follower_agg,
            target: target_agg,
            following: state.following_of(follower),
        })
    }

    async fn delete_edge(&self, follower: &Address, target: &Address) -> StoreResult<EdgeChange> {
        let mut state = self.state.lock();

        let created_at = state
            .following
            .get_mut(follower)
            .and_then(|targets| targets.remove(target))
            .ok_or(StoreError::EdgeNotFound)?;
        if let Some(followers) = state.followers.get_mut(target) {
            followers.remove(follower);
        }

        let follower_agg = state.adjust(follower, 0, -1);
        let target_agg = state.adjust(target, -1, 0);

        Ok(EdgeChange {
            edge: FollowEdge {
                follower: follower.clone(),
                target: target.clone(),
                created_at,
            },
            follower: follower_agg,
            target: target_agg,
            following: state.following_of(follower),
        })
    }

    async fn is_following(&self, follower: &Address, target: &Address) -> StoreResult<bool> {
        Ok(self.state.lock().has_edge(follower, target))
    }

    async fn batch_is_following(
        &self,
        follower: &Address,
        targets: &[Address],
    ) -> StoreResult<HashMap<Address, bool>> {
        let state = self.state.lock();
        Ok(targets
            .iter()
            .map(|target| (target.clone(), state.has_edge(follower, target)))
            .collect())
    }

    async fn following_set(&self, follower: &Address) -> StoreResult<EdgeMap> {
        Ok(self.state.lock().following_of(follower))
    }

    async fn list_followers(
        &self,
        address: &Address,
        limit: u32,
        offset: u32,
    ) -> StoreResult<RelationshipPage> {
        let state = self.state.lock();
        Ok(page_of(state.followers.get(address), limit, offset))
    }

    async fn list_following(
        &self,
        address: &Address,
        limit: u32,
        offset: u32,
    ) -> StoreResult<RelationshipPage> {
        let state = self.state.lock();
        Ok(page_of(state.following.get(address), limit, offset))
    }

    async fn load_aggregate(&self, address: &Address) -> StoreResult<FollowAggregate> {
        let state = self.state.lock();
        Ok(state
            .stats
            .get(address)
            .cloned()
            .unwrap_or_else(|| FollowAggregate::empty(address.clone())))
    }

    async fn list_aggregate_addresses(
        &self,
        after: Option<Address>,
        limit: u32,
    ) -> StoreResult<Vec<Address>> {
        let state = self.state.lock();
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        Ok(state
            .stats
            .range((lower, Bound::Unbounded))
            .take(limit as usize)
            .map(|(address, _)| address.clone())
            .collect())
    }

    async fn reconcile_aggregate(&self, address: &Address) -> StoreResult<ReconcileOutcome> {
        let mut state = self.state.lock();
        let (followers, following) = state.edge_cardinality(address);
        let before = state
            .stats
            .get(address)
            .cloned()
            .unwrap_or_else(|| FollowAggregate::empty(address.clone()));

        if before.counts() == (followers, following) {
            return Ok(ReconcileOutcome::Consistent(before));
        }

        let mut after = before.clone();
        after.followers_count = followers;
        after.following_count = following;
        after.version += 1;
        state.stats.insert(address.clone(), after.clone());

        Ok(ReconcileOutcome::Repaired { before, after })
    }
}
