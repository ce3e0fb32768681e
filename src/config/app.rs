//! Application configuration structures.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::DispatcherConfig;
use crate::limiter::RateLimitConfig;
use crate::plugin::{HousekeepingConfig, PushoverConfig};
use crate::retention;
use crate::server::DEFAULT_MAX_PAYLOAD_SIZE;

use super::validation::{ConfigError, expand_env_vars, expand_path};

// =============================================================================
// Constants
// =============================================================================

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:25478";

/// Default data directory.
pub const DEFAULT_DATA_PATH: &str = "./data";

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_data_path() -> String {
    DEFAULT_DATA_PATH.to_string()
}

fn default_max_file_size() -> usize {
    DEFAULT_MAX_PAYLOAD_SIZE
}

fn default_sweep_interval() -> Duration {
    retention::DEFAULT_INTERVAL
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default: "0.0.0.0:25478").
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

/// Record storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory; `~` is expanded (default: "./data").
    #[serde(default = "default_data_path")]
    pub path: String,

    /// Store-owned retention window in days; 0 disables it.
    #[serde(default)]
    pub retention_days: u32,

    /// Store-owned retention cadence (default: 1h).
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Maximum payload size in bytes; 0 disables the check (default: 5 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_data_path(),
            retention_days: 0,
            sweep_interval: default_sweep_interval(),
            max_file_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Record storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-source rate limiting.
    #[serde(default)]
    pub limits: RateLimitConfig,

    /// Dispatcher queue settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Pushover notifier; registered only when user and token are set.
    #[serde(default)]
    pub notifier: Option<PushoverConfig>,

    /// Retention as a registered plugin.
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// Notifier credentials go through `${VAR}` expansion before validation.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.expand_secrets();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if self.storage.path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage path must not be empty".to_string(),
            ));
        }

        if self.storage.retention_days > 0 && self.storage.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "storage sweep_interval must be positive".to_string(),
            ));
        }

        if !self.limits.rate.is_finite() || self.limits.rate <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "limits rate must be positive, got {}",
                self.limits.rate
            )));
        }

        if self.limits.burst == 0 {
            return Err(ConfigError::ValidationError(
                "limits burst must be positive".to_string(),
            ));
        }

        if self.dispatcher.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher queue_capacity must be positive".to_string(),
            ));
        }

        if let Some(notifier) = &self.notifier {
            if notifier.queue_capacity == 0 {
                return Err(ConfigError::ValidationError(
                    "notifier queue_capacity must be positive".to_string(),
                ));
            }
            if notifier.user.is_empty() != notifier.token.is_empty() {
                tracing::warn!("Notifier needs both user and token, it will stay disabled");
            }
        }

        if self.housekeeping.is_enabled() && self.housekeeping.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "housekeeping interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed listen address.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the address is not `ip:port`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen.parse::<SocketAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server listen address: '{}'",
                self.server.listen
            ))
        })
    }

    /// Data directory with `~` expanded, made absolute.
    ///
    /// # Errors
    /// Returns `ConfigError::IoError` if the working directory is unavailable.
    pub fn data_path(&self) -> Result<PathBuf, ConfigError> {
        expand_path(&self.storage.path)
    }

    /// Enabled notifier configuration, if any.
    pub fn enabled_notifier(&self) -> Option<&PushoverConfig> {
        self.notifier.as_ref().filter(|n| n.is_enabled())
    }

    fn expand_secrets(&mut self) {
        if let Some(notifier) = self.notifier.as_mut() {
            notifier.user = expand_env_vars(&notifier.user);
            notifier.token = expand_env_vars(&notifier.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:25478");
        assert_eq!(config.storage.path, "./data");
        assert_eq!(config.storage.max_file_size, 5 * 1024 * 1024);
        assert_eq!(config.storage.retention_days, 0);
        assert_eq!(config.limits.burst, 5);
        assert_eq!(config.dispatcher.queue_capacity, 100);
        assert!(config.enabled_notifier().is_none());
        assert!(!config.housekeeping.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.listen, DEFAULT_LISTEN);
        assert_eq!(config.storage.sweep_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  listen: "127.0.0.1:9000"
storage:
  path: /var/lib/inbox
  retention_days: 7
  sweep_interval: 30m
  max_file_size: 1024
limits:
  rate: 2.0
  burst: 10
  capacity: 50
  idle_timeout: 5m
dispatcher:
  queue_capacity: 20
  enqueue_timeout: 500ms
notifier:
  user: "${{INBOX_TEST_MISSING_USER:-u-key}}"
  token: t-key
housekeeping:
  days: 30
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        assert_eq!(config.storage.retention_days, 7);
        assert_eq!(config.storage.sweep_interval, Duration::from_secs(1800));
        assert_eq!(config.storage.max_file_size, 1024);
        assert_eq!(config.limits.burst, 10);
        assert_eq!(config.limits.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.dispatcher.enqueue_timeout, Duration::from_millis(500));

        let notifier = config.enabled_notifier().unwrap();
        assert_eq!(notifier.user, "u-key");
        assert_eq!(notifier.token, "t-key");
        assert_eq!(config.housekeeping.days, 30);
        assert_eq!(config.data_path().unwrap(), PathBuf::from("/var/lib/inbox"));
    }

    #[test]
    fn test_notifier_without_token_is_disabled() {
        let config: AppConfig = serde_yaml::from_str("notifier:\n  user: someone\n").unwrap();
        assert!(config.validate().is_ok());
        assert!(config.enabled_notifier().is_none());
    }

    #[test]
    fn test_invalid_listen_address() {
        let mut config = AppConfig::default();
        config.server.listen = "not-an-address".to_string();

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid server listen address")
        );
    }

    #[test]
    fn test_invalid_limits() {
        let mut config = AppConfig::default();
        config.limits.rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.limits.burst = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.dispatcher.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load("/nonexistent/inbox.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
