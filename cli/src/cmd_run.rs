//! `chainhead run` — follow the chain head and drive log-triggered jobs.
//!
//! Wires a store, the WebSocket transport, the head tracker and the event
//! listener together, then runs until Ctrl-C.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use chainhead_core::{
    BackoffSleeper, ConfirmationExecutor, EventListener, HeadStore, HeadTracker, Job, JobStore,
    MemoryStore, TrackerConfig,
};
use chainhead_storage::SqliteStorage;
use chainhead_ws::{WsClientConfig, WsTransport};

// ─── Entry point ─────────────────────────────────────────────────────────────

pub async fn run(config: TrackerConfig, jobs: Option<&Path>) -> Result<()> {
    match config.database.as_deref() {
        Some(path) => {
            let store = SqliteStorage::open(path)
                .await
                .with_context(|| format!("opening database '{path}'"))?;
            follow(Arc::new(store), &config, jobs).await
        }
        None => {
            warn!("no database configured, block markers are kept in memory");
            follow(Arc::new(MemoryStore::new()), &config, jobs).await
        }
    }
}

async fn follow<S>(store: Arc<S>, config: &TrackerConfig, jobs: Option<&Path>) -> Result<()>
where
    S: HeadStore + JobStore + 'static,
{
    if let Some(path) = jobs {
        let loaded = load_jobs(path)?;
        for job in &loaded {
            store.save_job(job).await?;
        }
        info!(count = loaded.len(), path = %path.display(), "jobs loaded");
    }

    let (transport, mut logs) = WsTransport::new(config.ws_url.as_str(), WsClientConfig::default());
    let transport = Arc::new(transport);

    let tracker = HeadTracker::with_sleeper(
        store.clone(),
        transport.clone(),
        BackoffSleeper::new(config.backoff.clone()),
    );
    let executor = Arc::new(ConfirmationExecutor::new(tracker.clone()));
    let listener = EventListener::new(tracker.clone(), store.clone(), transport.clone(), executor);

    listener.start().await;
    tracker
        .start()
        .await
        .with_context(|| format!("subscribing to new heads at {}", config.ws_url))?;
    info!(url = %config.ws_url, jobs = listener.jobs().len(), "following chain head");

    let mut states = tracker.watch_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            Some(log) = logs.recv() => {
                info!(job = %log.job_id, log = %log.log, "job log received");
            }
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                info!(%state, "connection state changed");
            }
        }
    }

    listener.stop().await;
    tracker.stop().await;
    if let Some(marker) = tracker.get() {
        info!(block = %marker, hash = %marker.hash, "last tracked head");
    }
    Ok(())
}

/// Read a JSON array of jobs.
fn load_jobs(path: &Path) -> Result<Vec<Job>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading jobs file '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing jobs file '{}'", path.display()))
}
