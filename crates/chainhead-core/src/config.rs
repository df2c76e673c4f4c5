//! Node configuration.

use serde::{Deserialize, Serialize};

use crate::sleeper::BackoffConfig;

/// Configuration for a head-tracking node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// WebSocket endpoint of the chain node (`ws://` or `wss://`).
    pub ws_url: String,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
    /// SQLite database path; `None` keeps everything in memory.
    pub database: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8546".into(),
            backoff: BackoffConfig::default(),
            database: None,
        }
    }
}
