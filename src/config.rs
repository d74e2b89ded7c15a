use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How long an accessor waits for an unattached wrapper before degrading
pub const DEFAULT_WRAPPER_TIMEOUT_MS: u64 = 10_000;

/// Per-request timeout for fetching a wrapped VAST document
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 3_000;

/// Maximum depth of VAST wrapper chain to follow
pub const DEFAULT_MAX_WRAPPER_DEPTH: usize = 10;

/// Playback position sampling cadence
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Settings for wrapper-chain resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Upper bound on waiting for `attach_wrapper`, in milliseconds
    pub wrapper_timeout_ms: u64,

    /// Timeout for a single wrapper fetch, in milliseconds
    pub fetch_timeout_ms: u64,

    /// Number of wrapper levels followed before giving up
    pub max_wrapper_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            wrapper_timeout_ms: DEFAULT_WRAPPER_TIMEOUT_MS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_wrapper_depth: DEFAULT_MAX_WRAPPER_DEPTH,
        }
    }
}

impl ResolverConfig {
    pub fn wrapper_timeout(&self) -> Duration {
        Duration::from_millis(self.wrapper_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Settings for a playback session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Playback position sampling cadence, in milliseconds
    pub poll_interval_ms: u64,

    /// Whether the session begins muted
    pub start_muted: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            start_muted: false,
        }
    }
}

impl PlayerConfig {
    pub fn poll_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Top-level configuration, loadable from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub player: PlayerConfig,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = Config::from_json(r#"{ "player": { "start_muted": true } }"#).unwrap();
        assert!(config.player.start_muted);
        assert_eq!(config.player.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.resolver, ResolverConfig::default());
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = PlayerConfig {
            poll_interval_ms: 0,
            start_muted: false,
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = Config::from_json("{ not json").unwrap_err();
        assert!(matches!(err, crate::error::VastError::ConfigError(_)));
    }
}
