use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use luxlink_server::SessionConfig;
use serde::Deserialize;

/// Default control listen port ("LX" = 0x4C58).
pub const DEFAULT_LISTEN: &str = "0.0.0.0:19544";

/// Daemon configuration, loadable from a JSON file with CLI overrides
/// applied on top.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Control-channel listen address.
    pub listen: SocketAddr,
    /// Data-channel silence before session teardown, in milliseconds.
    pub idle_shutdown_ms: u64,
    /// Proactive stats report interval, in milliseconds.
    pub stats_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.parse().expect("default listen address"),
            idle_shutdown_ms: 15_000,
            stats_interval_ms: 1_000,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_shutdown: Duration::from_millis(self.idle_shutdown_ms),
            stats_interval: Duration::from_millis(self.stats_interval_ms),
            ..SessionConfig::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.listen.port(), 19544);
        assert_eq!(config.session_config().idle_shutdown, Duration::from_secs(15));
        assert_eq!(config.session_config().stats_interval, Duration::from_secs(1));
    }

    #[test]
    fn parses_partial_json() {
        let config: Config = serde_json::from_str(r#"{"idle_shutdown_ms": 5000}"#).unwrap();
        assert_eq!(config.idle_shutdown_ms, 5_000);
        assert_eq!(config.stats_interval_ms, 1_000);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = serde_json::from_str::<Config>(r#"{"idle_timeout": 1}"#);
        assert!(result.is_err());
    }
}
