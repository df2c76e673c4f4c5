//! Backoff sleeper used between reconnect attempts.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Supplies increasing, resettable wait intervals.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Return to the initial interval.
    fn reset(&mut self);

    /// The interval the next [`Sleeper::sleep`] will wait.
    fn duration(&self) -> Duration;

    /// Wait for [`Sleeper::duration`], then grow the interval.
    async fn sleep(&mut self);
}

/// Configuration for [`BackoffSleeper`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First wait after a reset.
    #[serde(with = "millis")]
    pub initial: Duration,
    /// Cap on exponential growth.
    #[serde(with = "millis")]
    pub max: Duration,
    /// Multiplier applied after each sleep.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Exponential backoff with no attempt limit.
#[derive(Debug, Clone)]
pub struct BackoffSleeper {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffSleeper {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The delay before the `attempt`-th wait (0-based), capped at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(64) as i32;
        let base_ms = self.config.initial.as_millis() as f64 * self.config.multiplier.powi(exp);
        let cap_ms = self.config.max.as_millis() as f64;
        Duration::from_millis(base_ms.min(cap_ms) as u64)
    }
}

impl Default for BackoffSleeper {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[async_trait]
impl Sleeper for BackoffSleeper {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn duration(&self) -> Duration {
        self.delay_for(self.attempt)
    }

    async fn sleep(&mut self) {
        tokio::time::sleep(self.duration()).await;
        self.attempt = self.attempt.saturating_add(1);
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper(initial_ms: u64, max_ms: u64) -> BackoffSleeper {
        BackoffSleeper::new(BackoffConfig {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
            multiplier: 2.0,
        })
    }

    #[test]
    fn delays_double() {
        let s = sleeper(100, 30_000);
        assert_eq!(s.delay_for(0).as_millis(), 100);
        assert_eq!(s.delay_for(1).as_millis(), 200);
        assert_eq!(s.delay_for(2).as_millis(), 400);
    }

    #[test]
    fn delay_capped_at_max() {
        let s = sleeper(100, 500);
        assert_eq!(s.delay_for(10), Duration::from_millis(500));
        // never gives up, just stays at the cap
        assert_eq!(s.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn sleep_grows_and_reset_restores() {
        let mut s = sleeper(1, 1_000);
        assert_eq!(s.duration(), Duration::from_millis(1));
        s.sleep().await;
        s.sleep().await;
        assert_eq!(s.duration(), Duration::from_millis(4));
        s.reset();
        assert_eq!(s.duration(), Duration::from_millis(1));
    }

    #[test]
    fn config_serializes_millis() {
        let json = serde_json::to_value(BackoffConfig::default()).unwrap();
        assert_eq!(json["initial"], 1000);
        assert_eq!(json["max"], 60_000);
    }
}
