//! Pipeline configuration with `CHATFEED_*` environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_messages must be at least 1")]
    ZeroCap,
    #[error("queue_cap must be at least 1")]
    ZeroQueue,
    #[error("interval `{0}` must be non-zero")]
    ZeroInterval(&'static str),
}

/// Tunables for the ingestion/aggregation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    /// Retained list cap; overflow is trimmed oldest-first and counted.
    pub max_messages: usize,
    /// Age after which the reaper removes a message.
    pub max_age: Duration,
    /// Reaper period.
    pub cleanup_every: Duration,
    /// Synthetic generator period.
    pub generator_every: Duration,
    /// Aggregation pass period (drain + fold).
    pub aggregate_every: Duration,
    /// Minimum spacing between two throttled publishes.
    pub publish_every: Duration,
    /// Ingestion buffer bound; overflow drops the oldest pending message.
    pub queue_cap: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_messages: 5000,
            max_age: Duration::from_secs(10 * 60),
            cleanup_every: Duration::from_millis(30_000),
            generator_every: Duration::from_millis(100),
            aggregate_every: Duration::from_millis(15),
            publish_every: Duration::from_millis(75),
            queue_cap: 1000,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

impl FeedConfig {
    /// Defaults overridden by any parsable `CHATFEED_*` variable.
    pub fn from_env() -> Self {
        let d = Self::default();
        let ms = |key: &str, dflt: Duration| env_u64(key).map(Duration::from_millis).unwrap_or(dflt);
        Self {
            max_messages: env_u64("CHATFEED_MAX_MESSAGES").map(|v| v as usize).unwrap_or(d.max_messages),
            max_age: env_u64("CHATFEED_MAX_AGE_MINUTES").map(|m| Duration::from_secs(m.saturating_mul(60))).unwrap_or(d.max_age),
            cleanup_every: ms("CHATFEED_CLEANUP_MS", d.cleanup_every),
            generator_every: ms("CHATFEED_GENERATOR_MS", d.generator_every),
            aggregate_every: ms("CHATFEED_AGGREGATE_MS", d.aggregate_every),
            publish_every: ms("CHATFEED_PUBLISH_MS", d.publish_every),
            queue_cap: env_u64("CHATFEED_QUEUE_CAP").map(|v| v as usize).unwrap_or(d.queue_cap),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_messages == 0 {
            return Err(ConfigError::ZeroCap);
        }
        if self.queue_cap == 0 {
            return Err(ConfigError::ZeroQueue);
        }
        let intervals = [
            ("cleanup_every", self.cleanup_every),
            ("generator_every", self.generator_every),
            ("aggregate_every", self.aggregate_every),
            ("publish_every", self.publish_every),
        ];
        for (name, d) in intervals {
            if d.is_zero() {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        Ok(())
    }

    /// `max_age` as a chrono duration for cutoff arithmetic.
    pub fn max_age_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let c = FeedConfig::default();
        assert_eq!(c.max_messages, 5000);
        assert_eq!(c.publish_every, Duration::from_millis(75));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zeroes() {
        let c = FeedConfig { max_messages: 0, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::ZeroCap));
        let c = FeedConfig { queue_cap: 0, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::ZeroQueue));
        let c = FeedConfig { publish_every: Duration::ZERO, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::ZeroInterval("publish_every")));
    }

    #[test]
    fn max_age_converts() {
        let c = FeedConfig::default();
        assert_eq!(c.max_age_chrono(), chrono::Duration::minutes(10));
    }
}
