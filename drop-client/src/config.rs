//! Configuration loading for kvdrop clients and monitors.
//!
//! Configuration is loaded from a TOML file. Every field has a default, so
//! an empty file (or a missing section) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kvdrop_core::{RetryPolicy, SyncMode};
use kvdrop_types::{PutOptions, Token};

use crate::client::ClientConfig;
use crate::monitor::MonitorConfig;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvdropConfig {
    /// Remote call settings.
    #[serde(default)]
    pub client: ClientSettings,
    /// Monitor loop settings.
    #[serde(default)]
    pub monitor: MonitorSettings,
}

/// Remote call settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Timeout per remote call attempt in milliseconds (default: 10000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retry settings.
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Retry settings for retryable remote failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts including the first call (default: 4).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure in milliseconds (default: 250).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the delay in milliseconds (default: 8000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Monitor loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Seconds between ticks (default: 5).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Sync direction (default: push).
    #[serde(default = "default_mode")]
    pub mode: SyncMode,
    /// TTL for pushed records in seconds (default: none).
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

// Default value functions
fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_interval_secs() -> u64 {
    5
}

fn default_mode() -> SyncMode {
    SyncMode::Push
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            mode: default_mode(),
            ttl_secs: None,
        }
    }
}

impl KvdropConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })
    }

    /// Set the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the monitor interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.monitor.interval_secs = interval.as_secs();
        self
    }

    /// Set the monitor direction.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.monitor.mode = mode;
        self
    }

    /// Set the TTL for monitor pushes.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.monitor.ttl_secs = ttl.map(|t| t.as_secs());
        self
    }

    /// Build the client configuration.
    pub fn to_client_config(&self) -> Result<ClientConfig, ConfigError> {
        let client = &self.client;
        if client.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("client.request_timeout_ms must be non-zero".into()));
        }
        if client.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("client.retry.max_attempts must be at least 1".into()));
        }
        if client.retry.base_delay_ms > client.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "client.retry.base_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        Ok(ClientConfig {
            request_timeout: Duration::from_millis(client.request_timeout_ms),
            retry: RetryPolicy {
                max_attempts: client.retry.max_attempts,
                base_delay: Duration::from_millis(client.retry.base_delay_ms),
                max_delay: Duration::from_millis(client.retry.max_delay_ms),
            },
        })
    }

    /// Build the configuration for a monitor of `token`.
    pub fn to_monitor_config(&self, token: Token) -> Result<MonitorConfig, ConfigError> {
        let mut options = PutOptions::default();
        if let Some(ttl) = self.monitor.ttl_secs {
            options = options.with_ttl(Duration::from_secs(ttl));
        }
        let config = MonitorConfig::new(token, self.monitor.mode)
            .with_interval(Duration::from_secs(self.monitor.interval_secs))
            .with_put_options(options);
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Parsed values cannot be used.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = KvdropConfig::default();
        assert_eq!(config.client.request_timeout_ms, 10_000);
        assert_eq!(config.monitor.mode, SyncMode::Push);

        let client = config.to_client_config().unwrap();
        assert_eq!(client, ClientConfig::default());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[client]
request_timeout_ms = 2500

[client.retry]
max_attempts = 6
base_delay_ms = 100

[monitor]
interval_secs = 30
mode = "pull"
ttl_secs = 3600
"#;

        let config = KvdropConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.client.request_timeout_ms, 2500);
        assert_eq!(config.client.retry.max_attempts, 6);
        assert_eq!(config.client.retry.max_delay_ms, 8_000);
        assert_eq!(config.monitor.mode, SyncMode::Pull);

        let monitor = config
            .to_monitor_config(Token::new("office-ip").unwrap())
            .unwrap();
        assert_eq!(monitor.interval, Duration::from_secs(30));
        assert_eq!(monitor.put_options.ttl, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = KvdropConfig::from_toml_str("").unwrap();
        assert_eq!(config, KvdropConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_timeout = KvdropConfig::default().with_request_timeout(Duration::ZERO);
        assert!(matches!(zero_timeout.to_client_config(), Err(ConfigError::Invalid(_))));

        let zero_interval = KvdropConfig::default().with_interval(Duration::ZERO);
        let token = Token::new("t").unwrap();
        assert!(matches!(
            zero_interval.to_monitor_config(token.clone()),
            Err(ConfigError::Invalid(_))
        ));

        let long_ttl = KvdropConfig::default().with_ttl(Some(Duration::from_secs(90 * 24 * 3600)));
        assert!(matches!(long_ttl.to_monitor_config(token), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_mode_fails_to_parse() {
        let result = KvdropConfig::from_toml_str("[monitor]\nmode = \"sideways\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[monitor]\ninterval_secs = 12").unwrap();

        let config = KvdropConfig::from_file(file.path()).unwrap();
        assert_eq!(config.monitor.interval_secs, 12);
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = KvdropConfig::from_file(Path::new("/nonexistent/kvdrop.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
