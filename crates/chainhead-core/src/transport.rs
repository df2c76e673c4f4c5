//! Subscription boundary: the chain transport the tracker and listener
//! consume.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::TrackerError;
use crate::job::Job;
use crate::types::{BlockHeader, BlockMarker};

/// Handle to a live push subscription.
///
/// The transport owns the producing side: it watches [`Subscription::token`]
/// for cancellation and reports at most one terminal error through the
/// sender paired with the receiver given to [`Subscription::new`]. Dropping
/// the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    errors: Option<oneshot::Receiver<TrackerError>>,
}

impl Subscription {
    pub fn new(cancel: CancellationToken, errors: oneshot::Receiver<TrackerError>) -> Self {
        Self {
            cancel,
            errors: Some(errors),
        }
    }

    /// A subscription plus the sender its producer reports failure on.
    pub fn channel() -> (Self, oneshot::Sender<TrackerError>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(CancellationToken::new(), rx), tx)
    }

    /// The token the producer watches. Cancelled by [`Subscription::unsubscribe`].
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Take the terminal-error receiver. Returns `None` after the first call.
    pub fn take_errors(&mut self) -> Option<oneshot::Receiver<TrackerError>> {
        self.errors.take()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens the upstream new-heads subscription.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
#[async_trait]
pub trait HeadTransport: Send + Sync {
    /// Subscribe to new block headers, pushing each one into `sink`.
    ///
    /// Must fail with [`TrackerError::Subscription`] if the subscription
    /// cannot be established.
    async fn subscribe_new_heads(
        &self,
        sink: mpsc::UnboundedSender<BlockHeader>,
    ) -> Result<Subscription, TrackerError>;

    /// The endpoint this transport talks to (URL or name), for logging.
    fn url(&self) -> &str;
}

/// Opens per-job log subscriptions.
#[async_trait]
pub trait LogSubscriber: Send + Sync {
    /// Subscribe to the logs matching `job`'s log initiators, starting from
    /// `from` when the transport supports it.
    async fn subscribe_logs(
        &self,
        job: &Job,
        from: Option<&BlockMarker>,
    ) -> Result<Subscription, TrackerError>;
}
