//! Execution boundary for pending job runs, plus a confirmation-counting
//! executor for nodes without a full job runner.

use async_trait::async_trait;
use num_bigint::BigUint;
use tracing::debug;

use crate::error::TrackerError;
use crate::job::{JobRun, RunResult, RunStatus};
use crate::store::JobStore;
use crate::tracker::HeadTracker;

/// Advances a job run given a (possibly empty) partial result.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Execute or resume `run`, persisting progress through `store`.
    async fn execute_run(
        &self,
        run: &JobRun,
        store: &dyn JobStore,
        input: RunResult,
    ) -> Result<JobRun, TrackerError>;
}

/// Completes runs once the tracked head has `min_confirmations` blocks on
/// top of (and including) the run's creation block.
pub struct ConfirmationExecutor {
    tracker: HeadTracker,
}

impl ConfirmationExecutor {
    pub fn new(tracker: HeadTracker) -> Self {
        Self { tracker }
    }
}

/// Number of blocks from `created` up to and including `head`.
fn confirmations(created: &BigUint, head: &BigUint) -> BigUint {
    if head < created {
        BigUint::default()
    } else {
        head - created + 1u32
    }
}

#[async_trait]
impl RunExecutor for ConfirmationExecutor {
    async fn execute_run(
        &self,
        run: &JobRun,
        store: &dyn JobStore,
        input: RunResult,
    ) -> Result<JobRun, TrackerError> {
        if !run.status.is_pending() {
            return Ok(run.clone());
        }

        let mut next = run.clone();
        let head = self.tracker.get().map(|m| m.number);
        if next.creation_height.is_none() {
            next.creation_height = head.clone();
        }

        let confirmed = match (&next.creation_height, &head) {
            _ if next.min_confirmations == 0 => true,
            (Some(created), Some(head)) => {
                confirmations(created, head) >= BigUint::from(next.min_confirmations)
            }
            _ => false,
        };

        if confirmed {
            next.status = RunStatus::Completed;
            next.result = Some(RunResult {
                job_run_id: next.id.clone(),
                status: Some(RunStatus::Completed),
                ..input
            });
        } else {
            next.status = RunStatus::PendingConfirmations;
        }

        debug!(run = %next.id, job = %next.job_id, status = %next.status, "job run advanced");
        store.save_job_run(&next).await?;
        Ok(next)
    }
}
