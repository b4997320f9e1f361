//! Configuration for es-follow.

use crate::FollowError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Follow and fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowConfig {
    /// Backend URL, e.g. `https://localhost:9200`
    #[serde(default)]
    pub connect: Option<String>,

    /// Username for basic auth
    #[serde(default)]
    pub username: Option<String>,

    /// Password for basic auth
    #[serde(default)]
    pub password: Option<String>,

    /// Session cookie, used instead of basic auth when set
    #[serde(default)]
    pub cookie: Option<String>,

    /// Document field holding the event timestamp
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,

    /// How long the backend keeps a scroll cursor alive between pages
    #[serde(default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: String,

    /// Hits per page (backend default when unset)
    #[serde(default)]
    pub page_size: Option<usize>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Pause between two poll cycles in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Look-back window of `tail` in seconds
    #[serde(default = "default_timedelta_secs")]
    pub default_timedelta_secs: u64,

    /// Output line format
    #[serde(default = "default_format_string")]
    pub format_string: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_timestamp_field() -> String {
    "@timestamp".to_string()
}

fn default_scroll_keep_alive() -> String {
    "2m".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_timedelta_secs() -> u64 {
    60
}

fn default_format_string() -> String {
    "{@timestamp} {message}".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            connect: None,
            username: None,
            password: None,
            cookie: None,
            timestamp_field: default_timestamp_field(),
            scroll_keep_alive: default_scroll_keep_alive(),
            page_size: None,
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            default_timedelta_secs: default_timedelta_secs(),
            format_string: default_format_string(),
            log_level: default_log_level(),
        }
    }
}

impl FollowConfig {
    /// Default config file location: `<config dir>/es-follow/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("es-follow").join("config.yaml"))
    }

    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(config_path) = Self::default_path() else {
            return Self::default();
        };

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_yaml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config file: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, FollowError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FollowError::Config(format!("{}: {}", path.display(), e)))?;
        serde_yaml::from_str(&content)
            .map_err(|e| FollowError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn timedelta(&self) -> Duration {
        Duration::from_secs(self.default_timedelta_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = FollowConfig::default();
        assert_eq!(config.timestamp_field, "@timestamp");
        assert_eq!(config.scroll_keep_alive, "2m");
        assert_eq!(config.timedelta(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert!(config.connect.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = FollowConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: FollowConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.format_string, parsed.format_string);
        assert_eq!(config.request_timeout_secs, parsed.request_timeout_secs);
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "connect: https://es.internal:9200\ntimestamp_field: ts\npage_size: 500\n",
        )
        .unwrap();

        let config = FollowConfig::load_from(&path).unwrap();
        assert_eq!(config.connect.as_deref(), Some("https://es.internal:9200"));
        assert_eq!(config.timestamp_field, "ts");
        assert_eq!(config.page_size, Some(500));
        // untouched fields keep their defaults
        assert_eq!(config.scroll_keep_alive, "2m");
        assert_eq!(config.default_timedelta_secs, 60);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = FollowConfig::load_from(&dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(FollowError::Config(_))));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "page_size: [not, a, number]\n").unwrap();

        let result = FollowConfig::load_from(&path);
        assert!(matches!(result, Err(FollowError::Config(_))));
    }
}
