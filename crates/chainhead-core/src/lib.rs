//! chainhead-core — resilient head tracking and new-head fan-out.
//!
//! # Architecture
//!
//! ```text
//! HeadTransport ──► HeadTracker ──save──► HeadStore
//!                       │ (reconnect loop, BackoffSleeper)
//!                       └──on_new_head──► observers
//!                                           ├── EventListener ──► LogSubscriber (per job)
//!                                           │        └──────────► RunExecutor (pending runs)
//!                                           └── NoOpHeadTrackable / host observers
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod listener;
pub mod observer;
pub mod sleeper;
pub mod store;
pub mod tracker;
pub mod transport;
pub mod types;

pub use config::TrackerConfig;
pub use error::TrackerError;
pub use executor::{ConfirmationExecutor, RunExecutor};
pub use job::{Initiator, InitiatorKind, Job, JobRun, RunResult, RunStatus};
pub use listener::{EventListener, JobSubscription};
pub use observer::{HeadTrackable, NoOpHeadTrackable, ObserverId};
pub use sleeper::{BackoffConfig, BackoffSleeper, Sleeper};
pub use store::{HeadStore, JobStore, MemoryStore};
pub use tracker::{ConnectionState, HeadTracker};
pub use transport::{HeadTransport, LogSubscriber, Subscription};
pub use types::{BlockHeader, BlockMarker};
