//! Engine configuration loader for Waypoint.
//!
//! Reads `waypoint.toml` from a directory and deserializes it into
//! [`EngineConfig`]. Falls back to defaults when the file is missing or
//! malformed, so a host can always start.

use std::path::Path;

use waypoint_types::config::{EngineConfig, MIN_POLL_INTERVAL_MS};

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "waypoint.toml";

/// Load engine configuration from `{config_dir}/waypoint.toml`.
///
/// - Missing file: returns [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
/// - Otherwise: the parsed config with the poll interval floor applied.
pub async fn load_engine_config(config_dir: &Path) -> EngineConfig {
    let config_path = config_dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(mut config) => {
            config.poll_interval_ms = resolve_poll_interval_ms(config.poll_interval_ms);
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Clamp a configured poll interval to the supported minimum.
pub fn resolve_poll_interval_ms(configured: u64) -> u64 {
    configured.max(MIN_POLL_INTERVAL_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use waypoint_types::workflow::ErrorPolicy;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.max_concurrent_workflows, 4);
        assert_eq!(config.default_error_behavior, ErrorPolicy::default());
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"
poll_interval_ms = 250
max_concurrent_workflows = 8
default_retry_interval_secs = 30

[default_error_behavior]
type = "suspend"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.worker_count(), 8);
        assert_eq!(config.default_retry_interval_secs, 30);
        assert_eq!(config.default_error_behavior, ErrorPolicy::Suspend);
        assert_eq!(config.event_bus_capacity, 1024);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE_NAME), "poll_interval_ms = [oops")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.poll_interval_ms, 1_000);
    }

    #[tokio::test]
    async fn tiny_poll_interval_is_raised_to_floor() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE_NAME), "poll_interval_ms = 0")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.poll_interval_ms, MIN_POLL_INTERVAL_MS);
    }

    #[test]
    fn resolve_poll_interval_keeps_sane_values() {
        assert_eq!(resolve_poll_interval_ms(500), 500);
        assert_eq!(resolve_poll_interval_ms(1), MIN_POLL_INTERVAL_MS);
    }
}
