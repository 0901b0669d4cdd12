//! Aggregate reconciliation background job
//!
//! Walks every stored aggregate in address order, recounts the user's edges
//! and rewrites rows that drifted. Repairs bump the row version, and the new
//! value is pushed to the cache through the usual versioned write.
//!
//! Disabled by default: the edge and aggregate writes already share one
//! transaction, so drift only comes from manual edits or restored backups.

use crate::metrics::FollowMetrics;
use crate::repository::{FollowGraphStore, ReconcileOutcome};
use anyhow::{Context, Result};
use follow_cache::{AggregateCache, AggregateEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciliationConfig {
    pub interval: Duration,
    /// Aggregates fetched per page
    pub batch_size: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            batch_size: 500,
        }
    }
}

/// Outcome of one full pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub scanned: u64,
    pub repaired: u64,
    pub failed: u64,
}

pub struct ReconciliationWorker {
    store: Arc<dyn FollowGraphStore>,
    cache: Option<Arc<dyn AggregateCache>>,
    config: ReconciliationConfig,
    metrics: FollowMetrics,
}

impl ReconciliationWorker {
    pub fn new(
        store: Arc<dyn FollowGraphStore>,
        cache: Option<Arc<dyn AggregateCache>>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            metrics: FollowMetrics::new(),
        }
    }

    /// Check every aggregate once.
    ///
    /// A failure on one address is logged and counted; only failing to list
    /// addresses aborts the pass.
    pub async fn run_once(&self) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        let mut cursor = None;
        let batch_size = self.config.batch_size.max(1);

        loop {
            let batch = self
                .store
                .list_aggregate_addresses(cursor.clone(), batch_size)
                .await
                .context("Failed to list aggregate addresses")?;

            for address in &batch {
                report.scanned += 1;
                match self.store.reconcile_aggregate(address).await {
                    Ok(ReconcileOutcome::Consistent(_)) => {}
                    Ok(ReconcileOutcome::Repaired { before, after }) => {
                        report.repaired += 1;
                        warn!(
                            address = %address,
                            followers_before = before.followers_count,
                            followers_after = after.followers_count,
                            following_before = before.following_count,
                            following_after = after.following_count,
                            "Repaired drifted follow aggregate"
                        );
                        self.push_to_cache(AggregateEntry::from(&after)).await;
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(error = %e, address = %address, "Failed to reconcile aggregate");
                    }
                }
            }

            if batch.len() < batch_size as usize {
                break;
            }
            cursor = batch.last().cloned();
        }

        self.metrics.record_reconcile(report.scanned, report.repaired);
        Ok(report)
    }

    async fn push_to_cache(&self, entry: AggregateEntry) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.put_if_newer(&entry).await {
            warn!(error = %e, address = %entry.address, "Failed to push repaired aggregate");
            if let Err(e) = cache.invalidate(&entry.address, entry.version).await {
                warn!(error = %e, address = %entry.address, "Failed to invalidate aggregate cache");
            }
        }
    }

    /// Run passes on the configured interval until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting follow aggregate reconciliation"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) => info!(
                            scanned = report.scanned,
                            repaired = report.repaired,
                            failed = report.failed,
                            "Reconciliation pass finished"
                        ),
                        Err(e) => error!(error = %e, "Reconciliation pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Reconciliation shutting down");
                        break;
                    }
                }
            }
        }
    }
}
