//! SQLite storage backend for ChainHead.
//!
//! Persists block markers, jobs and job runs to a single SQLite file.
//! Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! Heights are stored as decimal text next to their digit count, so
//! `ORDER BY digits DESC, number DESC` yields the numerically highest marker
//! for heights of any width.
//!
//! # Usage
//! ```rust,no_run
//! use chainhead_storage::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./chainhead.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;

use async_trait::async_trait;
use num_bigint::BigUint;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainhead_core::error::TrackerError;
use chainhead_core::job::{Job, JobRun, RunStatus};
use chainhead_core::store::{HeadStore, JobStore};
use chainhead_core::types::BlockMarker;

/// SQLite-backed storage for block markers, jobs and job runs.
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn persistence(e: impl Display) -> TrackerError {
    TrackerError::Persistence(e.to_string())
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainhead.db"`) or a full
    /// SQLite URL (`"sqlite:./chainhead.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, TrackerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(persistence)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        debug!(path, "sqlite storage opened");
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. The pool is pinned to one
    /// connection since every `:memory:` connection is a separate database.
    pub async fn in_memory() -> Result<Self, TrackerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(persistence)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), TrackerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(persistence)?;

        // Every saved marker is kept; reads pick the highest.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS block_markers (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                number  TEXT    NOT NULL,
                digits  INTEGER NOT NULL,
                hash    TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_block_markers_height
             ON block_markers (digits, number);",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id          TEXT    PRIMARY KEY,
                created_at  INTEGER NOT NULL,
                body        TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS job_runs (
                id          TEXT    PRIMARY KEY,
                job_id      TEXT    NOT NULL,
                status      TEXT    NOT NULL,
                created_at  INTEGER NOT NULL,
                body        TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_runs_status ON job_runs (status);")
            .execute(&self.pool)
            .await
            .map_err(persistence)?;

        Ok(())
    }

    /// Number of markers stored.
    pub async fn marker_count(&self) -> Result<u64, TrackerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM block_markers")
            .fetch_one(&self.pool)
            .await
            .map_err(persistence)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

// ─── HeadStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl HeadStore for SqliteStorage {
    async fn last_marker(&self) -> Result<Option<BlockMarker>, TrackerError> {
        let row = sqlx::query(
            "SELECT number, hash FROM block_markers
             ORDER BY digits DESC, number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let number: String = row.get("number");
        let hash: String = row.get("hash");
        let number = BigUint::parse_bytes(number.as_bytes(), 10)
            .ok_or_else(|| persistence(format!("stored block number '{number}' is not decimal")))?;
        Ok(Some(BlockMarker::new(number, hash)))
    }

    async fn save_marker(&self, marker: &BlockMarker) -> Result<(), TrackerError> {
        // digits comes from the number itself, not the caller's field
        let number = marker.number_string();
        let digits = number.len() as i64;
        sqlx::query("INSERT INTO block_markers (number, digits, hash) VALUES (?, ?, ?)")
            .bind(number)
            .bind(digits)
            .bind(&marker.hash)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;

        debug!(block = %marker, hash = %marker.hash, "block marker saved");
        Ok(())
    }
}

// ─── JobStore impl ───────────────────────────────────────────────────────────

#[async_trait]
impl JobStore for SqliteStorage {
    async fn jobs(&self) -> Result<Vec<Job>, TrackerError> {
        let rows = sqlx::query("SELECT body FROM jobs ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;

        rows.iter()
            .map(|row| serde_json::from_str(row.get("body")).map_err(persistence))
            .collect()
    }

    async fn pending_job_runs(&self) -> Result<Vec<JobRun>, TrackerError> {
        let rows = sqlx::query(
            "SELECT body FROM job_runs WHERE status IN (?, ?)
             ORDER BY created_at, id",
        )
        .bind(RunStatus::Pending.as_str())
        .bind(RunStatus::PendingConfirmations.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        rows.iter()
            .map(|row| serde_json::from_str(row.get("body")).map_err(persistence))
            .collect()
    }

    async fn save_job(&self, job: &Job) -> Result<(), TrackerError> {
        let body = serde_json::to_string(job).map_err(persistence)?;
        sqlx::query("INSERT OR REPLACE INTO jobs (id, created_at, body) VALUES (?, ?, ?)")
            .bind(&job.id)
            .bind(job.created_at.timestamp_micros())
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;

        debug!(job = %job.id, "job saved");
        Ok(())
    }

    async fn save_job_run(&self, run: &JobRun) -> Result<(), TrackerError> {
        let body = serde_json::to_string(run).map_err(persistence)?;
        sqlx::query(
            "INSERT OR REPLACE INTO job_runs (id, job_id, status, created_at, body)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.job_id)
        .bind(run.status.as_str())
        .bind(run.created_at.timestamp_micros())
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        debug!(run = %run.id, job = %run.job_id, status = %run.status, "job run saved");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
