//! Graph Syncer - keeps a workload graph in sync with observed cluster state
//!
//! Observed pods and pod-to-pod interactions arrive as events, either
//! replayed from a JSON-lines log at startup or posted to `/events`, and are
//! synchronized into the graph by a bounded-concurrency worker.

use anyhow::Result;
use graph_syncer::{api, config::SyncerConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use syncer_lib::{
    graph::MemoryGraphStore,
    health::HealthRegistry,
    observability::{StructuredLogger, SyncMetrics},
    read_event_log, SyncEngine, SyncWorker, WorkerConfig,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SYNCER_VERSION: &str = env!("CARGO_PKG_VERSION");

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting graph-syncer");

    let config = SyncerConfig::load()?;
    info!(
        instance = %config.instance,
        max_in_flight = config.max_in_flight,
        "Syncer configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = SyncMetrics::new();
    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(SYNCER_VERSION, "memory");

    let store = Arc::new(MemoryGraphStore::new());
    let engine = Arc::new(SyncEngine::backed_by(store));
    let worker_config = WorkerConfig {
        max_in_flight: config.max_in_flight,
    };

    if let Some(path) = config.replay_path.as_deref() {
        replay(path, &worker_config, &engine, &health_registry, &logger).await?;
    }

    let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
    let worker = SyncWorker::new(
        worker_config,
        engine.clone(),
        health_registry.clone(),
        logger.clone(),
    );
    let worker_handle = tokio::spawn(worker.run(events_rx));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        events_tx,
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health_registry.set_ready(true);

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    // Dropping the server releases the last sender and lets the worker drain
    api_handle.abort();
    match tokio::time::timeout(SHUTDOWN_GRACE, worker_handle).await {
        Ok(Ok(stats)) => info!(
            processed = stats.processed,
            failed = stats.failed,
            "Event worker drained"
        ),
        Ok(Err(e)) => warn!(error = %e, "Event worker stopped abnormally"),
        Err(_) => warn!("Event worker did not drain before shutdown deadline"),
    }

    info!("Shutting down");
    Ok(())
}

/// Synchronize every event of a replay log before serving live traffic
async fn replay(
    path: &Path,
    config: &WorkerConfig,
    engine: &Arc<SyncEngine>,
    health_registry: &HealthRegistry,
    logger: &StructuredLogger,
) -> Result<()> {
    let events = read_event_log(path)?;

    let (tx, rx) = mpsc::channel(config.max_in_flight.max(1));
    let worker = SyncWorker::new(
        config.clone(),
        engine.clone(),
        health_registry.clone(),
        logger.clone(),
    );
    let handle = tokio::spawn(worker.run(rx));

    for event in events {
        if tx.send(event).await.is_err() {
            warn!("Replay worker stopped early");
            break;
        }
    }
    drop(tx);

    let stats = handle.await?;
    logger.log_replay_finished(&path.display().to_string(), stats.processed, stats.failed);
    Ok(())
}
