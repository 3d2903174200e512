//! Engine configuration types for Waypoint.
//!
//! `EngineConfig` represents the `waypoint.toml` file that controls polling,
//! worker-pool sizing, and the fallback error policy for steps that declare
//! none.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflow::ErrorPolicy;

/// Shortest poll interval the host will honour, in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Top-level configuration for the workflow host.
///
/// All fields have sensible defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the host polls for runnable instances and due events.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on instances executed concurrently by the worker pool.
    #[serde(default = "default_max_concurrent_workflows")]
    pub max_concurrent_workflows: usize,

    /// Delay used by `Retry` policies that do not specify their own interval.
    #[serde(default = "default_retry_interval_secs")]
    pub default_retry_interval_secs: u64,

    /// Policy applied to steps that declare no error policy.
    #[serde(default)]
    pub default_error_behavior: ErrorPolicy,

    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_concurrent_workflows() -> usize {
    4
}

fn default_retry_interval_secs() -> u64 {
    60
}

fn default_event_bus_capacity() -> usize {
    1024
}

impl EngineConfig {
    /// Host poll period, never shorter than [`MIN_POLL_INTERVAL_MS`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    /// Worker pool size with a floor of one.
    pub fn worker_count(&self) -> usize {
        self.max_concurrent_workflows.max(1)
    }

    pub fn default_retry_interval(&self) -> chrono::Duration {
        // Capped at roughly a century so `now + interval` cannot overflow.
        let secs = self.default_retry_interval_secs.min(100 * 365 * 24 * 60 * 60);
        chrono::Duration::seconds(secs as i64)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_workflows: default_max_concurrent_workflows(),
            default_retry_interval_secs: default_retry_interval_secs(),
            default_error_behavior: ErrorPolicy::default(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.worker_count(), 4);
        assert_eq!(config.default_retry_interval(), chrono::Duration::seconds(60));
        assert_eq!(
            config.default_error_behavior,
            ErrorPolicy::Retry { interval_secs: None }
        );
        assert_eq!(config.event_bus_capacity, 1024);
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.max_concurrent_workflows, 4);
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
poll_interval_ms = 250
max_concurrent_workflows = 16
default_retry_interval_secs = 5

[default_error_behavior]
type = "terminate"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.worker_count(), 16);
        assert_eq!(config.default_retry_interval_secs, 5);
        assert_eq!(config.default_error_behavior, ErrorPolicy::Terminate);
    }

    #[test]
    fn test_worker_count_has_floor() {
        let config = EngineConfig {
            max_concurrent_workflows: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.worker_count(), 1);
    }

    #[test]
    fn test_poll_interval_has_floor() {
        let config = EngineConfig {
            poll_interval_ms: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(MIN_POLL_INTERVAL_MS));
    }
}
