//! Reconciliation passes over drifted aggregates
//!
//! Run with: cargo test --test reconciliation_test

mod common;

use common::{addr, caller, Harness};
use follow_cache::AggregateCache;
use follow_graph_service::repository::FollowGraphStore;
use follow_graph_service::workers::{ReconciliationConfig, ReconciliationWorker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn worker_for(h: &Harness, batch_size: u32) -> ReconciliationWorker {
    ReconciliationWorker::new(
        h.store.clone() as Arc<dyn FollowGraphStore>,
        Some(h.cache.clone() as Arc<dyn AggregateCache>),
        ReconciliationConfig {
            interval: Duration::from_millis(20),
            batch_size,
        },
    )
}

#[tokio::test]
async fn test_consistent_graph_needs_no_repair() {
    let h = Harness::new();
    h.service.follow(&caller("alice"), &addr("bob")).await.unwrap();
    h.service.follow(&caller("bob"), &addr("carol")).await.unwrap();

    let report = worker_for(&h, 10).run_once().await.unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.repaired, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_drifted_aggregate_is_repaired_and_cached() {
    let h = Harness::new();
    h.service.follow(&caller("alice"), &addr("bob")).await.unwrap();
    h.service.follow(&caller("carol"), &addr("bob")).await.unwrap();
    h.store.overwrite_aggregate(&addr("bob"), 17, 3);

    let report = worker_for(&h, 10).run_once().await.unwrap();

    assert_eq!(report.repaired, 1);
    assert_eq!(h.stored_counts("bob").await, (2, 0));
    // The repaired row is newer than anything cached, so readers see it
    assert_eq!(h.served_counts("bob").await, (2, 0));
}

#[tokio::test]
async fn test_pass_walks_every_batch() {
    let h = Harness::new();
    for i in 0..5 {
        h.service
            .follow(&caller(&format!("fan{}", i)), &addr("star"))
            .await
            .unwrap();
    }
    h.store.overwrite_aggregate(&addr("fan4"), 0, 0);
    h.store.overwrite_aggregate(&addr("star"), 1, 0);

    let report = worker_for(&h, 2).run_once().await.unwrap();

    assert_eq!(report.scanned, 6);
    assert_eq!(report.repaired, 2);
    assert_eq!(h.stored_counts("fan4").await, (0, 1));
    assert_eq!(h.stored_counts("star").await, (5, 0));
}

#[tokio::test]
async fn test_repair_without_cache() {
    let h = Harness::new();
    h.service.follow(&caller("alice"), &addr("bob")).await.unwrap();
    h.store.overwrite_aggregate(&addr("alice"), 0, 9);

    let worker = ReconciliationWorker::new(
        h.store.clone(),
        None,
        ReconciliationConfig::default(),
    );
    let report = worker.run_once().await.unwrap();

    assert_eq!(report.repaired, 1);
    assert_eq!(h.stored_counts("alice").await, (0, 1));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = Harness::new();
    h.service.follow(&caller("alice"), &addr("bob")).await.unwrap();
    h.store.overwrite_aggregate(&addr("bob"), 5, 5);

    let worker = worker_for(&h, 10);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(rx).await });

    // The first tick fires immediately
    tokio::time::sleep(Duration::from_millis(60)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker stops")
        .expect("worker task completes");
    assert_eq!(h.stored_counts("bob").await, (1, 0));
}

#[tokio::test]
async fn test_empty_store() {
    let h = Harness::new();
    let report = worker_for(&h, 10).run_once().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(report.repaired, 0);
}
