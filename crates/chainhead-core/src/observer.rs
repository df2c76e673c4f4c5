//! The observer capability set the head tracker fans events out to.

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::types::BlockHeader;

/// Opaque identifier returned by [`HeadTracker::attach`](crate::tracker::HeadTracker::attach).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything that reacts to new heads and to the tracker's connection
/// lifecycle.
///
/// Callbacks are awaited one observer at a time, so they should return
/// promptly. `connect` and `disconnect` are invoked while the tracker holds
/// its registry lock and must not call `attach` or `detach`.
#[async_trait]
pub trait HeadTrackable: Send + Sync {
    /// The tracker's upstream subscription is live.
    async fn connect(&self) -> Result<(), TrackerError>;

    /// The tracker's upstream subscription is gone.
    async fn disconnect(&self);

    /// A new head was saved. Errors are the observer's to handle.
    async fn on_new_head(&self, header: &BlockHeader);

    /// Name used in logs.
    fn name(&self) -> &str {
        "observer"
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHeadTrackable;

#[async_trait]
impl HeadTrackable for NoOpHeadTrackable {
    async fn connect(&self) -> Result<(), TrackerError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn on_new_head(&self, _header: &BlockHeader) {}

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = ObserverId::generate();
        let b = ObserverId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[tokio::test]
    async fn noop_connects() {
        let noop = NoOpHeadTrackable;
        assert!(noop.connect().await.is_ok());
        assert_eq!(noop.name(), "noop");
    }
}
