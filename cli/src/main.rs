//! ChainHead CLI — follow a chain head and drive log-triggered jobs.
//!
//! # Commands
//! ```text
//! chainhead run   --url <ws-url> [--db <path>] [--config <file.json>] [--jobs <file.json>]
//! chainhead head  --db <path>
//! chainhead info
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use chainhead_core::{HeadStore, TrackerConfig};
use chainhead_storage::SqliteStorage;

mod cmd_run;
mod logging;

use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "chainhead",
    about = "Resilient chain head tracker — ChainHead CLI",
    long_about = "
ChainHead CLI: subscribe to new block heads over WebSocket, persist the
highest block seen, and re-drive log-triggered jobs on every new head.

ENVIRONMENT VARIABLES:
  CHAINHEAD_WS_URL   WebSocket endpoint of the chain node
  CHAINHEAD_DB       SQLite database path
  RUST_LOG           Log filter (overrides --log-level)
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the chain head until Ctrl-C
    Run {
        /// WebSocket endpoint (overrides the config file)
        #[arg(long, env = "CHAINHEAD_WS_URL")]
        url: Option<String>,
        /// JSON config file (TrackerConfig plus an optional "log" section)
        #[arg(long)]
        config: Option<PathBuf>,
        /// SQLite database path (default: in-memory)
        #[arg(long, env = "CHAINHEAD_DB")]
        db: Option<String>,
        /// JSON array of jobs to store before starting
        #[arg(long)]
        jobs: Option<PathBuf>,
        /// Default log level (overrides the config file)
        #[arg(long)]
        log_level: Option<String>,
        /// Emit JSON structured logs (overrides the config file)
        #[arg(long)]
        json_logs: bool,
    },

    /// Print the highest block marker stored in a database
    Head {
        #[arg(long, env = "CHAINHEAD_DB")]
        db: String,
    },

    /// Show ChainHead build and capability info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            url,
            config,
            db,
            jobs,
            log_level,
            json_logs,
        } => {
            let config = resolve_config(
                config.as_deref(),
                Overrides {
                    url,
                    db,
                    log_level,
                    json_logs,
                },
            )?;
            init_tracing(&config.log);
            cmd_run::run(config.tracker, jobs.as_deref()).await
        }

        Commands::Head { db } => cmd_head(&db).await,

        Commands::Info => cmd_info(),
    }
}

/// Contents of a `--config` file.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(flatten)]
    tracker: TrackerConfig,
    #[serde(default)]
    log: LogConfig,
}

/// Flag / environment values that win over the config file.
#[derive(Debug, Default)]
struct Overrides {
    url: Option<String>,
    db: Option<String>,
    log_level: Option<String>,
    json_logs: bool,
}

/// Config file first, then flags / environment on top.
fn resolve_config(path: Option<&std::path::Path>, overrides: Overrides) -> Result<FileConfig> {
    let mut config: FileConfig = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config '{}'", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config '{}'", path.display()))?
        }
        None => FileConfig::default(),
    };
    if let Some(url) = overrides.url {
        config.tracker.ws_url = url;
    }
    if overrides.db.is_some() {
        config.tracker.database = overrides.db;
    }
    if let Some(level) = overrides.log_level {
        config.log.level = level;
    }
    config.log.json |= overrides.json_logs;
    Ok(config)
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_head(db: &str) -> Result<()> {
    let store = SqliteStorage::open(db)
        .await
        .with_context(|| format!("opening database '{db}'"))?;
    match store.last_marker().await? {
        Some(marker) => {
            println!("Block:   {}", marker.number_string());
            println!("Hash:    {}", marker.hash);
            println!("Markers: {}", store.marker_count().await?);
        }
        None => println!("No block markers stored in '{db}'"),
    }
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("ChainHead v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Capabilities:");
    println!("  ✓ newHeads subscription     (eth_subscribe over WebSocket)");
    println!("  ✓ Highest-block tracking    (arbitrary-precision heights)");
    println!("  ✓ Auto-reconnect            (exponential backoff, no attempt limit)");
    println!("  ✓ Per-job log subscriptions (RunLog / EthLog initiators)");
    println!("  ✓ Confirmation counting     (pending job runs re-driven per head)");
    println!("  ✓ Persistence               (SQLite via sqlx, or in-memory)");
    Ok(())
}
