use super::{EdgeChange, FollowGraphStore, ReconcileOutcome};
use crate::domain::edge::MAX_PAGE_SIZE;
use crate::domain::{Address, FollowAggregate, FollowEdge, RelationshipPage};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// (address, followers_count, following_count, version)
type StatsRow = (String, i64, i64, i64);

/// PostgreSQL follow graph store (source of truth)
#[derive(Clone)]
pub struct PostgresFollowStore {
    pool: PgPool,
}

impl PostgresFollowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Add `followers_delta`/`following_delta` to one aggregate row, creating it
    /// on first use. Counts are floored at zero.
    async fn adjust_stats(
        conn: &mut PgConnection,
        address: &Address,
        followers_delta: i64,
        following_delta: i64,
    ) -> StoreResult<FollowAggregate> {
        let row: StatsRow = sqlx::query_as(
            r#"
            INSERT INTO follow_stats (address, followers_count, following_count, version, updated_at)
            VALUES ($1, GREATEST($2, 0), GREATEST($3, 0), 1, NOW())
            ON CONFLICT (address) DO UPDATE SET
                followers_count = GREATEST(follow_stats.followers_count + $2, 0),
                following_count = GREATEST(follow_stats.following_count + $3, 0),
                version = follow_stats.version + 1,
                updated_at = NOW()
            RETURNING address, followers_count, following_count, version
            "#,
        )
        .bind(address.as_str())
        .bind(followers_delta)
        .bind(following_delta)
        .fetch_one(&mut *conn)
        .await?;

        aggregate_from_row(row)
    }

    /// Apply `delta` to target.followers and follower.following.
    ///
    /// Rows are always locked in address order so that A->B and B->A running
    /// at the same time cannot deadlock.
    async fn adjust_pair(
        conn: &mut PgConnection,
        follower: &Address,
        target: &Address,
        delta: i64,
    ) -> StoreResult<(FollowAggregate, FollowAggregate)> {
        if follower < target {
            let follower_agg = Self::adjust_stats(&mut *conn, follower, 0, delta).await?;
            let target_agg = Self::adjust_stats(&mut *conn, target, delta, 0).await?;
            Ok((follower_agg, target_agg))
        } else {
            let target_agg = Self::adjust_stats(&mut *conn, target, delta, 0).await?;
            let follower_agg = Self::adjust_stats(&mut *conn, follower, 0, delta).await?;
            Ok((follower_agg, target_agg))
        }
    }

    async fn fetch_following(
        conn: &mut PgConnection,
        follower: &Address,
    ) -> StoreResult<BTreeMap<Address, DateTime<Utc>>> {
        let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT target_address, created_at FROM follows WHERE follower_address = $1",
        )
        .bind(follower.as_str())
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(|(address, created_at)| Ok((stored_address(address)?, created_at)))
            .collect()
    }

    async fn page(
        &self,
        count_sql: &str,
        page_sql: &str,
        address: &Address,
        limit: u32,
        offset: u32,
    ) -> StoreResult<RelationshipPage> {
        let effective_limit = limit.min(MAX_PAGE_SIZE);

        let total_count: i64 = sqlx::query_scalar(count_sql)
            .bind(address.as_str())
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<(String,)> = sqlx::query_as(page_sql)
            .bind(address.as_str())
            .bind(effective_limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let addresses = rows
            .into_iter()
            .map(|(address,)| stored_address(address))
            .collect::<StoreResult<Vec<_>>>()?;
        let has_more = (offset as i64 + addresses.len() as i64) < total_count;

        Ok(RelationshipPage {
            addresses,
            total_count: non_negative(total_count),
            has_more,
        })
    }
}

#[async_trait::async_trait]
impl FollowGraphStore for PostgresFollowStore {
    async fn insert_edge(&self, follower: &Address, target: &Address) -> StoreResult<EdgeChange> {
        let mut tx = self.pool.begin().await?;

        // ON CONFLICT lets a concurrent duplicate wait for the winner and then
        // come back empty instead of aborting the transaction.
        let inserted: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            INSERT INTO follows (follower_address, target_address, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (follower_address, target_address) DO NOTHING
            RETURNING created_at
            "#,
        )
        .bind(follower.as_str())
        .bind(target.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((created_at,)) = inserted else {
            tx.rollback().await?;
            return Err(StoreError::UniqueViolation);
        };

        let (follower_agg, target_agg) = Self::adjust_pair(&mut tx, follower, target, 1).await?;
        let following = Self::fetch_following(&mut tx, follower).await?;
        tx.commit().await?;

        debug!(
            follower = %follower,
            target = %target,
            "Created follow edge in PostgreSQL"
        );

        Ok(EdgeChange {
            edge: FollowEdge {
                follower: follower.clone(),
                target: target.clone(),
                created_at,
            },
            follower: follower_agg,
            target: target_agg,
            following,
        })
    }

    async fn delete_edge(&self, follower: &Address, target: &Address) -> StoreResult<EdgeChange> {
        let mut tx = self.pool.begin().await?;

        let deleted: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            DELETE FROM follows
            WHERE follower_address = $1 AND target_address = $2
            RETURNING created_at
            "#,
        )
        .bind(follower.as_str())
        .bind(target.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((created_at,)) = deleted else {
            tx.rollback().await?;
            return Err(StoreError::EdgeNotFound);
        };

        let (follower_agg, target_agg) = Self::adjust_pair(&mut tx, follower, target, -1).await?;
        let following = Self::fetch_following(&mut tx, follower).await?;
        tx.commit().await?;

        debug!(
            follower = %follower,
            target = %target,
            "Deleted follow edge in PostgreSQL"
        );

        Ok(EdgeChange {
            edge: FollowEdge {
                follower: follower.clone(),
                target: target.clone(),
                created_at,
            },
            follower: follower_agg,
            target: target_agg,
            following,
        })
    }

    async fn is_following(&self, follower: &Address, target: &Address) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_address = $1 AND target_address = $2)",
        )
        .bind(follower.as_str())
        .bind(target.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn batch_is_following(
        &self,
        follower: &Address,
        targets: &[Address],
    ) -> StoreResult<HashMap<Address, bool>> {
        if targets.is_empty() {
            return Ok(HashMap::new());
        }

        let target_strs: Vec<&str> = targets.iter().map(Address::as_str).collect();
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT target_address FROM follows
            WHERE follower_address = $1 AND target_address = ANY($2)
            "#,
        )
        .bind(follower.as_str())
        .bind(&target_strs)
        .fetch_all(&self.pool)
        .await?;

        let followed: HashSet<String> = rows.into_iter().map(|(address,)| address).collect();
        Ok(targets
            .iter()
            .map(|target| (target.clone(), followed.contains(target.as_str())))
            .collect())
    }

    async fn following_set(
        &self,
        follower: &Address,
    ) -> StoreResult<BTreeMap<Address, DateTime<Utc>>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_following(&mut conn, follower).await
    }

    async fn list_followers(
        &self,
        address: &Address,
        limit: u32,
        offset: u32,
    ) -> StoreResult<RelationshipPage> {
        self.page(
            "SELECT COUNT(*) FROM follows WHERE target_address = $1",
            "SELECT follower_address FROM follows
             WHERE target_address = $1
             ORDER BY created_at DESC, follower_address
             LIMIT $2 OFFSET $3",
            address,
            limit,
            offset,
        )
        .await
    }

    async fn list_following(
        &self,
        address: &Address,
        limit: u32,
        offset: u32,
    ) -> StoreResult<RelationshipPage> {
        self.page(
            "SELECT COUNT(*) FROM follows WHERE follower_address = $1",
            "SELECT target_address FROM follows
             WHERE follower_address = $1
             ORDER BY created_at DESC, target_address
             LIMIT $2 OFFSET $3",
            address,
            limit,
            offset,
        )
        .await
    }

    async fn load_aggregate(&self, address: &Address) -> StoreResult<FollowAggregate> {
        let row: Option<StatsRow> = sqlx::query_as(
            "SELECT address, followers_count, following_count, version FROM follow_stats WHERE address = $1",
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => aggregate_from_row(row),
            None => Ok(FollowAggregate::empty(address.clone())),
        }
    }

    async fn list_aggregate_addresses(
        &self,
        after: Option<Address>,
        limit: u32,
    ) -> StoreResult<Vec<Address>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT address FROM follow_stats
            WHERE ($1::text IS NULL OR address > $1)
            ORDER BY address
            LIMIT $2
            "#,
        )
        .bind(after.as_ref().map(Address::as_str))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(address,)| stored_address(address))
            .collect()
    }

    async fn reconcile_aggregate(&self, address: &Address) -> StoreResult<ReconcileOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO follow_stats (address) VALUES ($1) ON CONFLICT (address) DO NOTHING")
            .bind(address.as_str())
            .execute(&mut *tx)
            .await?;

        // Holding the row lock makes edge transactions touching this user wait
        // until the recount is written.
        let current: StatsRow = sqlx::query_as(
            r#"
            SELECT address, followers_count, following_count, version
            FROM follow_stats WHERE address = $1
            FOR UPDATE
            "#,
        )
        .bind(address.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let before = aggregate_from_row(current)?;

        let followers: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE target_address = $1")
                .bind(address.as_str())
                .fetch_one(&mut *tx)
                .await?;
        let following: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE follower_address = $1")
                .bind(address.as_str())
                .fetch_one(&mut *tx)
                .await?;

        if before.counts() == (non_negative(followers), non_negative(following)) {
            tx.commit().await?;
            return Ok(ReconcileOutcome::Consistent(before));
        }

        let repaired: StatsRow = sqlx::query_as(
            r#"
            UPDATE follow_stats SET
                followers_count = $2,
                following_count = $3,
                version = version + 1,
                updated_at = NOW()
            WHERE address = $1
            RETURNING address, followers_count, following_count, version
            "#,
        )
        .bind(address.as_str())
        .bind(followers)
        .bind(following)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let after = aggregate_from_row(repaired)?;
        info!(
            address = %address,
            followers_before = before.followers_count,
            followers_after = after.followers_count,
            following_before = before.following_count,
            following_after = after.following_count,
            "Repaired drifted follow aggregate"
        );

        Ok(ReconcileOutcome::Repaired { before, after })
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn stored_address(raw: String) -> StoreResult<Address> {
    Address::parse(raw).map_err(|e| StoreError::InvalidData(e.to_string()))
}

fn aggregate_from_row((address, followers, following, version): StatsRow) -> StoreResult<FollowAggregate> {
    Ok(FollowAggregate {
        address: stored_address(address)?,
        followers_count: non_negative(followers),
        following_count: non_negative(following),
        version: non_negative(version),
    })
}
