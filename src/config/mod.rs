//! Configuration module for the inbox service.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (listen address)
//! - Storage settings (data path, retention, size limit)
//! - Rate limiting, dispatcher queue, notifier and housekeeping

mod app;
mod validation;

pub use app::{AppConfig, ServerConfig, StorageConfig};
pub use validation::{ConfigError, expand_env_vars, expand_path};

// Re-export constants
pub use app::{DEFAULT_DATA_PATH, DEFAULT_LISTEN};
