//! Error types for the head tracker and event listener.

use thiserror::Error;

/// Errors that can occur while tracking heads or driving jobs.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The upstream subscription could not be opened or failed mid-stream.
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An observer's `connect()` failed.
    #[error("Observer '{observer}' failed to connect: {reason}")]
    Observer { observer: String, reason: String },

    /// One or more jobs failed to subscribe during a bulk connect.
    #[error("{} job(s) failed to subscribe: {}", .0.len(), join_errors(.0))]
    AggregateJob(Vec<TrackerError>),

    #[error("Execution error: {0}")]
    Execution(String),

    /// A header or log notification could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl TrackerError {
    /// Fold a list of per-job failures into one error, or `None` if empty.
    pub fn aggregate(errors: Vec<TrackerError>) -> Option<TrackerError> {
        if errors.is_empty() {
            None
        } else {
            Some(Self::AggregateJob(errors))
        }
    }

    /// Returns `true` if this error should trigger the reconnect loop.
    pub fn is_subscription(&self) -> bool {
        matches!(self, Self::Subscription(_))
    }

    /// The individual errors inside an aggregate, or the error itself.
    pub fn errors(&self) -> Vec<&TrackerError> {
        match self {
            Self::AggregateJob(errs) => errs.iter().collect(),
            other => vec![other],
        }
    }
}

fn join_errors(errors: &[TrackerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
