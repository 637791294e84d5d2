//! Syncer configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Syncer configuration, read from `SYNCER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct SyncerConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health/metrics and event ingestion
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON-lines event log replayed before the syncer reports ready
    #[serde(default)]
    pub replay_path: Option<PathBuf>,

    /// Maximum number of events synchronized concurrently
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Capacity of the event channel between the API and the worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_instance() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "graph-syncer".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_in_flight() -> usize {
    16
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            api_port: default_api_port(),
            replay_path: None,
            max_in_flight: default_max_in_flight(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SyncerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("SYNCER"))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read syncer configuration")?
            .try_deserialize()
            .context("Invalid syncer configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("SYNCER").source(Some(vars))
    }

    #[test]
    fn test_defaults_apply_for_missing_values() {
        let config = SyncerConfig::from_source(environment(&[])).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.max_in_flight, 16);
        assert_eq!(config.channel_capacity, 1024);
        assert!(config.replay_path.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = SyncerConfig::from_source(environment(&[
            ("SYNCER_API_PORT", "9100"),
            ("SYNCER_REPLAY_PATH", "/var/lib/syncer/events.jsonl"),
            ("SYNCER_MAX_IN_FLIGHT", "4"),
        ]))
        .unwrap();

        assert_eq!(config.api_port, 9100);
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(
            config.replay_path,
            Some(PathBuf::from("/var/lib/syncer/events.jsonl"))
        );
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let err = SyncerConfig::from_source(environment(&[("SYNCER_API_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid syncer configuration"));
    }
}
