//! Event worker feeding observed objects into the sync engine
//!
//! Events arrive on a channel and are dispatched to a fixed set of ordered
//! lanes. A failed event is logged and counted; the worker moves on.

use crate::error::SyncError;
use crate::health::{Component, HealthRegistry};
use crate::models::PodKey;
use crate::observability::{StructuredLogger, SyncMetrics};
use crate::sync::SyncEngine;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader};
use std::ops::AddAssign;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// One unit of work for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// An observed pod, with or without a deletion marker
    Pod { object: Box<Pod> },
    /// Traffic observed from `source` to each destination
    Interaction {
        source: String,
        destinations: Vec<String>,
        counts: Vec<f64>,
    },
}

impl SyncEvent {
    /// Short description used in logs
    pub fn subject(&self) -> String {
        match self {
            SyncEvent::Pod { object } => format!(
                "pod {}/{}",
                object.metadata.namespace.as_deref().unwrap_or_default(),
                object.metadata.name.as_deref().unwrap_or_default()
            ),
            SyncEvent::Interaction { source, .. } => format!("interactions from {}", source),
        }
    }

    fn component(&self) -> Component {
        match self {
            SyncEvent::Pod { .. } => Component::PodSync,
            SyncEvent::Interaction { .. } => Component::Interactions,
        }
    }

    /// Events with the same key are synchronized in arrival order
    fn routing_key(&self) -> String {
        match self {
            SyncEvent::Pod { object } => PodKey::of(object)
                .map(|key| key.xid())
                .unwrap_or_else(|_| self.subject()),
            SyncEvent::Interaction { source, .. } => source.clone(),
        }
    }
}

/// Counters for one worker run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: usize,
    pub failed: usize,
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.failed += other.failed;
    }
}

/// Configuration for the sync worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of lanes, i.e. events synchronized concurrently
    pub max_in_flight: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_in_flight: 16 }
    }
}

const LANE_CAPACITY: usize = 64;

enum LaneItem {
    Event(SyncEvent),
    /// Answered once every item queued before it has been processed
    Flush(oneshot::Sender<()>),
}

/// Consumes sync events until the sending side closes
///
/// Events are routed to sequential lanes by key: a pod by its external id,
/// an interaction by its source. Events sharing a key are processed in
/// arrival order. An interaction additionally waits for every event received
/// before it, so the pods it connects are persisted first.
pub struct SyncWorker {
    config: WorkerConfig,
    engine: Arc<SyncEngine>,
    outcomes: OutcomeRecorder,
}

impl SyncWorker {
    pub fn new(
        config: WorkerConfig,
        engine: Arc<SyncEngine>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            config,
            engine,
            outcomes: OutcomeRecorder {
                health,
                logger,
                metrics: SyncMetrics::new(),
            },
        }
    }

    /// Run until `receiver` is closed and every lane is drained
    pub async fn run(self, mut receiver: mpsc::Receiver<SyncEvent>) -> WorkerStats {
        let lane_count = self.config.max_in_flight.max(1);
        info!(lanes = lane_count, "Starting sync worker");

        let mut lanes = Vec::with_capacity(lane_count);
        let mut tasks = JoinSet::new();
        for _ in 0..lane_count {
            let (tx, rx) = mpsc::channel(LANE_CAPACITY);
            lanes.push(tx);
            tasks.spawn(drain_lane(self.engine.clone(), self.outcomes.clone(), rx));
        }

        let mut stats = WorkerStats::default();
        while let Some(event) = receiver.recv().await {
            if matches!(event, SyncEvent::Interaction { .. }) {
                flush(&lanes).await;
            }

            let lane = &lanes[lane_index(&event.routing_key(), lane_count)];
            if let Err(mpsc::error::SendError(LaneItem::Event(event))) =
                lane.send(LaneItem::Event(event)).await
            {
                stats += WorkerStats {
                    processed: 1,
                    failed: 1,
                };
                self.outcomes.metrics.inc_sync_failures();
                error!(subject = %event.subject(), "Sync lane stopped, dropping event");
            }
        }

        drop(lanes);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(lane_stats) => stats += lane_stats,
                Err(e) => {
                    stats += WorkerStats {
                        processed: 1,
                        failed: 1,
                    };
                    self.outcomes.metrics.inc_sync_failures();
                    error!(error = %e, "Sync lane panicked");
                }
            }
        }

        info!(
            processed = stats.processed,
            failed = stats.failed,
            "Sync worker finished"
        );
        stats
    }
}

/// Wait until every lane has processed what was queued so far
async fn flush(lanes: &[mpsc::Sender<LaneItem>]) {
    let mut pending = Vec::with_capacity(lanes.len());
    for lane in lanes {
        let (tx, rx) = oneshot::channel();
        if lane.send(LaneItem::Flush(tx)).await.is_ok() {
            pending.push(rx);
        }
    }
    for rx in pending {
        // A dropped sender means the lane is gone; nothing left to wait for
        let _ = rx.await;
    }
}

fn lane_index(key: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

async fn drain_lane(
    engine: Arc<SyncEngine>,
    outcomes: OutcomeRecorder,
    mut items: mpsc::Receiver<LaneItem>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while let Some(item) = items.recv().await {
        match item {
            LaneItem::Event(event) => {
                let result = dispatch(&engine, &event).await;
                outcomes.record(&event, result, &mut stats).await;
            }
            LaneItem::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    stats
}

/// Turns event outcomes into stats, metrics, logs and component health
#[derive(Clone)]
struct OutcomeRecorder {
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: SyncMetrics,
}

impl OutcomeRecorder {
    async fn record(
        &self,
        event: &SyncEvent,
        result: std::result::Result<(), SyncError>,
        stats: &mut WorkerStats,
    ) {
        stats.processed += 1;
        match result {
            Ok(()) => {
                debug!(subject = %event.subject(), "Event synchronized");
                self.health.record_store_success().await;
                self.health.set_healthy(event.component()).await;
            }
            Err(e) => {
                stats.failed += 1;
                self.metrics.inc_sync_failures();
                self.logger
                    .log_sync_failure(&event.subject(), &e.to_string(), e.is_retryable());
                if matches!(e, SyncError::Persistence(_) | SyncError::LookupFailed { .. }) {
                    self.health.record_store_failure(e.to_string()).await;
                } else {
                    self.health
                        .set_degraded(event.component(), e.to_string())
                        .await;
                }
            }
        }
    }
}

async fn dispatch(engine: &SyncEngine, event: &SyncEvent) -> std::result::Result<(), SyncError> {
    match event {
        SyncEvent::Pod { object } => engine.store(object).await.map(|_| ()),
        SyncEvent::Interaction {
            source,
            destinations,
            counts,
        } => engine
            .store_interactions(source, destinations, counts)
            .await
            .map(|_| ()),
    }
}

/// Read a JSON-lines event log; blank lines are ignored
pub fn read_event_log(path: &Path) -> Result<Vec<SyncEvent>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open event log {:?}", path))?;

    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line =
            line.with_context(|| format!("Failed to read line {} of {:?}", index + 1, path))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: SyncEvent = serde_json::from_str(&line)
            .with_context(|| format!("Invalid event on line {} of {:?}", index + 1, path))?;
        events.push(event);
    }

    info!(path = %path.display(), events = events.len(), "Loaded event log");
    Ok(events)
}
