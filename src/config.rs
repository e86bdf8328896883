//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PAWS_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags

use paws_client::{BackoffConfig, ConnectionConfig};
use paws_protocol::{DEFAULT_HOST, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server connection.
    pub server: ServerConfig,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Loads configuration from an optional file, then applies environment
    /// variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("PAWS_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Applies overrides looked up by environment variable name.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("PAWS_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PAWS_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(key) = lookup("PAWS_API_KEY") {
            if !key.is_empty() {
                self.server.api_key = Some(key);
            }
        }
        if let Some(secs) = lookup("PAWS_REQUEST_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.server.request_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::ValidationError("server.host is empty".into()));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "server.request_timeout_secs must be positive".into(),
            ));
        }
        if self.reconnect.factor < 1.0 {
            return Err(ConfigError::ValidationError(
                "reconnect.factor must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Builds the client connection settings.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.server.host, self.server.port)
            .with_connect_timeout(Duration::from_secs(self.server.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.server.request_timeout_secs))
            .with_resubscribe(self.reconnect.resubscribe)
            .with_backoff(
                BackoffConfig::default()
                    .with_initial_delay(Duration::from_millis(self.reconnect.initial_delay_ms))
                    .with_max_delay(Duration::from_secs(self.reconnect.max_delay_secs))
                    .with_factor(self.reconnect.factor),
            );
        if let Some(key) = &self.server.api_key {
            config = config.with_api_key(key);
        }
        config
    }
}

/// Server connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// API key sent with every frame.
    pub api_key: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            api_key: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Reconnect configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_secs: u64,
    /// Growth factor between attempts.
    pub factor: f64,
    /// Re-send subscriptions after reconnecting.
    pub resubscribe: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_secs: 3600,
            factor: std::f64::consts::E,
            resubscribe: true,
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "beta.pachube.com");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.request_timeout_secs, 30);
        assert!(config.reconnect.resubscribe);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  host: localhost\n  api_key: abc\nreconnect:\n  max_delay_secs: 60"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.api_key.as_deref(), Some("abc"));
        assert_eq!(config.reconnect.max_delay_secs, 60);
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::IoError(..))
        ));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "server: [not, a, map]").unwrap();
        let err = Config::from_file(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PAWS_HOST", "127.0.0.1"),
            ("PAWS_PORT", "9000"),
            ("PAWS_API_KEY", "key"),
            ("PAWS_REQUEST_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.api_key.as_deref(), Some("key"));
        assert_eq!(config.server.request_timeout_secs, 30);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.server.request_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.reconnect.factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connection_config() {
        let mut config = Config::default();
        config.server.api_key = Some("key".into());
        config.reconnect.initial_delay_ms = 250;

        let conn = config.connection_config();
        assert_eq!(conn.addr(), "beta.pachube.com:8081");
        assert_eq!(conn.api_key.as_deref(), Some("key"));
        assert_eq!(conn.request_timeout, Duration::from_secs(30));
        assert_eq!(conn.backoff.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
