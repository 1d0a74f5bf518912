use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::{PollerConfig, SourceStrategy};

/// Live fan-out settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveConfig {
    pub strategy: SourceStrategy,
    pub poll_interval_ms: u64,
    pub safety_overlap_ms: u64,
    pub poll_query_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
    /// Per-connection outbound buffer, in frames.
    pub sink_capacity: usize,
    pub aggregate_by_asset: bool,
    pub feed_resubscribe_delay_ms: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            strategy: SourceStrategy::Poll,
            poll_interval_ms: 1000,
            safety_overlap_ms: 0,
            poll_query_timeout_ms: 5000,
            heartbeat_interval_secs: 30,
            sink_capacity: 256,
            aggregate_by_asset: false,
            feed_resubscribe_delay_ms: 1000,
            shutdown_timeout_secs: 10,
        }
    }
}

impl LiveConfig {
    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            safety_overlap: Duration::from_millis(self.safety_overlap_ms),
            query_timeout: Duration::from_millis(self.poll_query_timeout_ms.max(1)),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.feed_resubscribe_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LiveConfig::default();
        assert_eq!(config.strategy, SourceStrategy::Poll);
        assert_eq!(config.poller().interval, Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.sink_capacity, 256);
        assert!(!config.aggregate_by_asset);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: LiveConfig =
            serde_json::from_str(r#"{"strategy":"feed","heartbeatIntervalSecs":5}"#).unwrap();
        assert_eq!(config.strategy, SourceStrategy::Feed);
        assert_eq!(config.heartbeat_interval_secs, 5);
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = LiveConfig {
            poll_interval_ms: 0,
            heartbeat_interval_secs: 0,
            ..LiveConfig::default()
        };
        assert_eq!(config.poller().interval, Duration::from_millis(1));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
    }
}
