//! Housekeeping plugin: retention as a registered consumer.
//!
//! Ignores records; owns a [`RetentionCollector`] loop that runs until the
//! plugin is closed. Useful when the store itself does not run retention.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::plugin::Plugin;
use crate::queue::Enqueued;
use crate::record::SharedRecord;
use crate::retention::{RetentionCollector, RetentionHandle};

/// Default housekeeping cadence (daily).
pub const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

fn default_interval() -> Duration {
    DEFAULT_HOUSEKEEPING_INTERVAL
}

/// Housekeeping configuration. `days == 0` disables the plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    /// Retention window in whole days.
    #[serde(default)]
    pub days: u32,
    /// Sweep interval (default: 24h).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Directory to sweep. Filled from the storage path when omitted.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            days: 0,
            interval: DEFAULT_HOUSEKEEPING_INTERVAL,
            path: None,
        }
    }
}

impl HousekeepingConfig {
    pub fn is_enabled(&self) -> bool {
        self.days > 0
    }
}

/// Plugin that runs a retention loop for its lifetime.
#[derive(Debug)]
pub struct RetentionCleaner {
    handle: Mutex<Option<RetentionHandle>>,
}

impl RetentionCleaner {
    /// Start the cleaner's retention loop.
    pub fn spawn(collector: RetentionCollector) -> Self {
        let handle = collector.spawn(CancellationToken::new());
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Build from configuration, sweeping `default_dir` unless the config names one.
    pub fn from_config(config: &HousekeepingConfig, default_dir: impl Into<PathBuf>) -> Self {
        let dir = config.path.clone().unwrap_or_else(|| default_dir.into());
        Self::spawn(RetentionCollector::new(dir, config.days).with_interval(config.interval))
    }
}

#[async_trait]
impl Plugin for RetentionCleaner {
    fn name(&self) -> &str {
        "housekeeping"
    }

    async fn process(&self, _record: SharedRecord) -> Enqueued {
        Enqueued::Accepted
    }

    async fn close(&self) {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}
