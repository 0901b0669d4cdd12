//! Prometheus counters for follow graph mutations and reconciliation

use prometheus::{CounterVec, IntCounter, Opts, Registry};
use std::sync::OnceLock;

static METRICS: OnceLock<FollowMetricsInner> = OnceLock::new();

struct FollowMetricsInner {
    mutations: CounterVec,
    cache_fallbacks: CounterVec,
    reconcile_scanned: IntCounter,
    reconcile_repairs: IntCounter,
}

impl FollowMetricsInner {
    fn new() -> Self {
        Self {
            mutations: CounterVec::new(
                Opts::new(
                    "follow_graph_mutations_total",
                    "Follow and unfollow attempts by outcome",
                ),
                &["operation", "result"],
            )
            .expect("valid metric definition"),
            cache_fallbacks: CounterVec::new(
                Opts::new(
                    "follow_graph_cache_fallbacks_total",
                    "Cache failures absorbed by the follow graph service",
                ),
                &["operation"],
            )
            .expect("valid metric definition"),
            reconcile_scanned: IntCounter::new(
                "follow_graph_reconcile_scanned_total",
                "Aggregates checked by reconciliation",
            )
            .expect("valid metric definition"),
            reconcile_repairs: IntCounter::new(
                "follow_graph_reconcile_repairs_total",
                "Aggregates rewritten by reconciliation",
            )
            .expect("valid metric definition"),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.mutations.clone()))?;
        registry.register(Box::new(self.cache_fallbacks.clone()))?;
        registry.register(Box::new(self.reconcile_scanned.clone()))?;
        registry.register(Box::new(self.reconcile_repairs.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static FollowMetricsInner {
    METRICS.get_or_init(FollowMetricsInner::new)
}

#[derive(Clone, Default)]
pub struct FollowMetrics;

impl FollowMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    /// `result` is "ok" or an error code
    pub fn record_mutation(&self, operation: &str, result: &str) {
        get_metrics()
            .mutations
            .with_label_values(&[operation, result])
            .inc();
    }

    pub fn record_cache_fallback(&self, operation: &str) {
        get_metrics()
            .cache_fallbacks
            .with_label_values(&[operation])
            .inc();
    }

    pub fn record_reconcile(&self, scanned: u64, repaired: u64) {
        let metrics = get_metrics();
        metrics.reconcile_scanned.inc_by(scanned);
        metrics.reconcile_repairs.inc_by(repaired);
    }
}
