//! Observability infrastructure for the graph syncer
//!
//! Provides:
//! - Prometheus metrics (pod lifecycle counts, failures, sync latency)
//! - Structured JSON logging with tracing

use prometheus::{register_histogram, register_int_counter, Histogram, IntCounter};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SyncMetricsInner> = OnceLock::new();

struct SyncMetricsInner {
    sync_latency_seconds: Histogram,
    pods_created: IntCounter,
    pods_updated: IntCounter,
    pods_terminated: IntCounter,
    sync_failures: IntCounter,
    unresolved_relations: IntCounter,
    lookup_failures: IntCounter,
    interaction_edges: IntCounter,
}

impl SyncMetricsInner {
    fn new() -> Self {
        Self {
            sync_latency_seconds: register_histogram!(
                "graph_syncer_sync_latency_seconds",
                "Time spent synchronizing one observed object",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sync_latency_seconds"),

            pods_created: register_int_counter!(
                "graph_syncer_pods_created_total",
                "Pods persisted for the first time"
            )
            .expect("Failed to register pods_created"),

            pods_updated: register_int_counter!(
                "graph_syncer_pods_updated_total",
                "Pod updates written"
            )
            .expect("Failed to register pods_updated"),

            pods_terminated: register_int_counter!(
                "graph_syncer_pods_terminated_total",
                "Pods marked as ended"
            )
            .expect("Failed to register pods_terminated"),

            sync_failures: register_int_counter!(
                "graph_syncer_sync_failures_total",
                "Synchronization calls that returned an error"
            )
            .expect("Failed to register sync_failures"),

            unresolved_relations: register_int_counter!(
                "graph_syncer_unresolved_relations_total",
                "Relations left out of an entity because they could not be resolved"
            )
            .expect("Failed to register unresolved_relations"),

            lookup_failures: register_int_counter!(
                "graph_syncer_lookup_failures_total",
                "Identity lookups that failed and were skipped instead of failing the write"
            )
            .expect("Failed to register lookup_failures"),

            interaction_edges: register_int_counter!(
                "graph_syncer_interaction_edges_total",
                "Weighted interaction edges written"
            )
            .expect("Failed to register interaction_edges"),
        }
    }
}

/// Syncer metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct SyncMetrics {
    _private: (),
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SyncMetricsInner {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new)
    }

    pub fn observe_sync_latency(&self, duration_secs: f64) {
        self.inner().sync_latency_seconds.observe(duration_secs);
    }

    pub fn inc_pods_created(&self) {
        self.inner().pods_created.inc();
    }

    pub fn inc_pods_updated(&self) {
        self.inner().pods_updated.inc();
    }

    pub fn inc_pods_terminated(&self) {
        self.inner().pods_terminated.inc();
    }

    pub fn inc_sync_failures(&self) {
        self.inner().sync_failures.inc();
    }

    pub fn inc_unresolved_relations(&self) {
        self.inner().unresolved_relations.inc();
    }

    pub fn inc_lookup_failures(&self) {
        self.inner().lookup_failures.inc();
    }

    pub fn lookup_failures(&self) -> u64 {
        self.inner().lookup_failures.get()
    }

    pub fn add_interaction_edges(&self, count: u64) {
        self.inner().interaction_edges.inc_by(count);
    }

    pub fn sync_failures(&self) -> u64 {
        self.inner().sync_failures.get()
    }
}

/// Structured logger for syncer lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, store: &str) {
        info!(
            event = "syncer_started",
            instance = %self.instance,
            syncer_version = %version,
            graph_store = %store,
            "Graph syncer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "syncer_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Graph syncer shutting down"
        );
    }

    /// Log a failed synchronization call; `retryable` tells whether a
    /// redelivery of the same event may succeed
    pub fn log_sync_failure(&self, subject: &str, error: &str, retryable: bool) {
        warn!(
            event = "sync_failed",
            instance = %self.instance,
            subject = %subject,
            error = %error,
            retryable = retryable,
            "Synchronization failed, continuing with next event"
        );
    }

    pub fn log_replay_finished(&self, path: &str, events: usize, failures: usize) {
        if failures == 0 {
            info!(
                event = "replay_finished",
                instance = %self.instance,
                path = %path,
                events = events,
                "Event replay finished"
            );
        } else {
            warn!(
                event = "replay_finished",
                instance = %self.instance,
                path = %path,
                events = events,
                failures = failures,
                "Event replay finished with failures"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_metrics_creation() {
        // Registry is process-global; handles share one set of metrics
        let metrics = SyncMetrics::new();
        let other = SyncMetrics::new();

        metrics.observe_sync_latency(0.001);
        metrics.inc_pods_created();
        metrics.inc_pods_updated();
        metrics.inc_pods_terminated();
        metrics.inc_unresolved_relations();
        metrics.inc_lookup_failures();
        metrics.add_interaction_edges(3);

        let before = other.sync_failures();
        metrics.inc_sync_failures();
        assert!(other.sync_failures() > before);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("syncer-0");
        assert_eq!(logger.instance, "syncer-0");
    }
}
