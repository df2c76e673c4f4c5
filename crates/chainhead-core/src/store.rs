//! Persistence boundary: block markers, jobs and job runs.
//!
//! Implementations include [`MemoryStore`] (below) and the SQLite backend in
//! `chainhead-storage`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::TrackerError;
use crate::job::{Job, JobRun};
use crate::types::BlockMarker;

/// Durable storage for block markers.
#[async_trait]
pub trait HeadStore: Send + Sync {
    /// The highest-height marker stored, or `None` when nothing is stored.
    ///
    /// An empty store is not an error.
    async fn last_marker(&self) -> Result<Option<BlockMarker>, TrackerError>;

    /// Append a marker. Every saved marker is kept, not just the highest.
    async fn save_marker(&self, marker: &BlockMarker) -> Result<(), TrackerError>;
}

/// Durable storage for jobs and their runs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn jobs(&self) -> Result<Vec<Job>, TrackerError>;

    /// Runs waiting on confirmations or further events.
    async fn pending_job_runs(&self) -> Result<Vec<JobRun>, TrackerError>;

    async fn save_job(&self, job: &Job) -> Result<(), TrackerError>;

    async fn save_job_run(&self, run: &JobRun) -> Result<(), TrackerError>;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory store for tests and ephemeral nodes.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    markers: Mutex<Vec<BlockMarker>>,
    jobs: Mutex<Vec<Job>>,
    runs: Mutex<HashMap<String, JobRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every marker saved so far, in save order.
    pub fn markers(&self) -> Vec<BlockMarker> {
        self.markers.lock().unwrap().clone()
    }

    /// Look up a run by id.
    pub fn job_run(&self, id: &str) -> Option<JobRun> {
        self.runs.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl HeadStore for MemoryStore {
    async fn last_marker(&self) -> Result<Option<BlockMarker>, TrackerError> {
        Ok(self
            .markers
            .lock()
            .unwrap()
            .iter()
            .max_by(|a, b| a.cmp_height(b))
            .cloned())
    }

    async fn save_marker(&self, marker: &BlockMarker) -> Result<(), TrackerError> {
        self.markers.lock().unwrap().push(marker.clone());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn jobs(&self) -> Result<Vec<Job>, TrackerError> {
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn pending_job_runs(&self) -> Result<Vec<JobRun>, TrackerError> {
        let mut runs: Vec<JobRun> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status.is_pending())
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }

    async fn save_job(&self, job: &Job) -> Result<(), TrackerError> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn save_job_run(&self, run: &JobRun) -> Result<(), TrackerError> {
        self.runs.lock().unwrap().insert(run.id.clone(), run.clone());
        Ok(())
    }
}
