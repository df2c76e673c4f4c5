//! Job definitions and job runs as seen by the event listener.
//!
//! The listener only reads these: it subscribes to logs for log-initiated
//! jobs and hands pending runs to a [`RunExecutor`](crate::executor::RunExecutor).

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

// ─── Initiators ───────────────────────────────────────────────────────────────

/// What starts a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorKind {
    Web,
    Cron,
    RunAt,
    /// Oracle request logs addressed to this node.
    RunLog,
    /// Any log matching the initiator's filter.
    EthLog,
}

impl InitiatorKind {
    /// Returns `true` for initiators that need a log subscription.
    pub fn is_log(&self) -> bool {
        matches!(self, Self::RunLog | Self::EthLog)
    }
}

/// A single initiator of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiator {
    pub kind: InitiatorKind,
    /// Contract address to filter logs on (log initiators only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// topic[0] values to filter on (empty = any).
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Initiator {
    pub fn new(kind: InitiatorKind) -> Self {
        Self {
            kind,
            address: None,
            topics: vec![],
        }
    }

    /// A log initiator watching a single contract.
    pub fn log(kind: InitiatorKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: Some(address.into()),
            topics: vec![],
        }
    }
}

// ─── Job ──────────────────────────────────────────────────────────────────────

/// A unit of work definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub initiators: Vec<Initiator>,
    /// Blocks a run must wait after creation before it completes.
    #[serde(default)]
    pub min_confirmations: u64,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<String>, initiators: Vec<Initiator>) -> Self {
        Self {
            id: id.into(),
            initiators,
            min_confirmations: 0,
            created_at: Utc::now(),
        }
    }

    /// Returns `true` if any initiator is driven by on-chain logs.
    pub fn is_log_initiated(&self) -> bool {
        self.initiators.iter().any(|i| i.kind.is_log())
    }

    /// The log initiators of this job.
    pub fn log_initiators(&self) -> impl Iterator<Item = &Initiator> {
        self.initiators.iter().filter(|i| i.kind.is_log())
    }
}

// ─── Job runs ─────────────────────────────────────────────────────────────────

/// Lifecycle status of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    PendingConfirmations,
    InProgress,
    Completed,
    Errored,
}

impl RunStatus {
    /// Runs in these states are re-driven on every new head.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::PendingConfirmations)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingConfirmations => "pending_confirmations",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Errored => "errored",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: String,
    pub job_id: String,
    pub status: RunStatus,
    /// Height at which the run was created, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_height: Option<BigUint>,
    #[serde(default)]
    pub min_confirmations: u64,
    #[serde(default)]
    pub result: Option<RunResult>,
    pub created_at: DateTime<Utc>,
}

impl JobRun {
    pub fn new(id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            status: RunStatus::Pending,
            creation_height: None,
            min_confirmations: 0,
            result: None,
            created_at: Utc::now(),
        }
    }

    /// Builder: require `confirmations` blocks counted from `height`.
    pub fn awaiting(mut self, height: impl Into<BigUint>, confirmations: u64) -> Self {
        self.creation_height = Some(height.into());
        self.min_confirmations = confirmations;
        self
    }
}

/// A (possibly partial) result handed to and returned from the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default)]
    pub job_run_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
