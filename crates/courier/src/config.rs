//! Node runtime configuration.

use std::time::Duration;

use courier_endpoint::DEFAULT_WORKER_POOL_SIZE;
use serde::{Deserialize, Serialize};

/// Configuration for one node's messengers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessengerConfig {
    /// Maximum number of invocation bodies running at once on this node.
    pub worker_pool_size: usize,

    /// How often `wait_for_remote` checks whether a name became known.
    pub wait_poll_interval: Duration,

    /// How long a spoke waits at start-up for the hub's directory snapshot.
    /// Zero means don't wait.
    pub directory_sync_timeout: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            wait_poll_interval: Duration::from_millis(50),
            directory_sync_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MessengerConfig::default();
        assert_eq!(config.worker_pool_size, 15);
        assert_eq!(config.wait_poll_interval, Duration::from_millis(50));
        assert_eq!(config.directory_sync_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_loads_from_json() {
        let json = r#"{
            "worker_pool_size": 4,
            "wait_poll_interval": { "secs": 0, "nanos": 10000000 },
            "directory_sync_timeout": { "secs": 1, "nanos": 0 }
        }"#;
        let config: MessengerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.wait_poll_interval, Duration::from_millis(10));
        assert_eq!(config.directory_sync_timeout, Duration::from_secs(1));
    }
}
