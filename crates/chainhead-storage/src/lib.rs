//! chainhead-storage — durable storage for ChainHead.
//!
//! Backends:
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! The in-memory store used by tests and ephemeral nodes lives in
//! `chainhead_core::store::MemoryStore`.

pub mod sqlite;

pub use sqlite::SqliteStorage;
