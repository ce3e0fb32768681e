//! Time-based garbage collection of persisted records.
//!
//! A [`RetentionCollector`] scans the store directory and deletes record files
//! whose age exceeds the retention window. It only ever touches regular files
//! whose name parses as a record identifier.
//!
//! The age reference is the earlier of the file's modification time and the
//! record's own `time` field, so rewriting a file in place never postpones its
//! deletion.
//!
//! # Cadence
//!
//! The background loop sweeps shortly after start, then every `interval`.
//! When the directory cannot even be listed it retries after `retry_interval`
//! instead. Only the cancellation token ends the loop.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::record::{STAMP_PREFIX_LEN, stamp_from_prefix};

/// Delay before the first sweep.
pub const STARTUP_DELAY: Duration = Duration::from_secs(1);

/// Steady-state sweep interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Retry delay after the directory listing failed.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Record files examined.
    pub scanned: usize,
    /// Expired records deleted.
    pub removed: usize,
    /// Expired records that could not be deleted.
    pub failed: usize,
    /// Entries ignored (directories, foreign files).
    pub skipped: usize,
}

/// Deletes records older than the retention window from one directory.
#[derive(Debug, Clone)]
pub struct RetentionCollector {
    dir: PathBuf,
    window: Duration,
    startup_delay: Duration,
    interval: Duration,
    retry_interval: Duration,
}

impl RetentionCollector {
    /// Collector for `dir` keeping records for `days` whole days.
    pub fn new(dir: impl AsRef<Path>, days: u32) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            window: Duration::from_secs(u64::from(days) * SECS_PER_DAY),
            startup_delay: STARTUP_DELAY,
            interval: DEFAULT_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Set the delay before the first sweep.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Set the steady-state sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the retry delay used after a listing failure.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Run one sweep against the current time.
    pub async fn sweep(&self) -> std::io::Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep, treating `now` as the current time.
    ///
    /// # Errors
    /// Fails only when the directory cannot be listed. Individual delete
    /// failures are logged and counted in [`SweepReport::failed`].
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> std::io::Result<SweepReport> {
        let window = TimeDelta::from_std(self.window).unwrap_or(TimeDelta::MAX);
        let mut report = SweepReport::default();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            let is_record = entry
                .file_name()
                .to_str()
                .is_some_and(|name| Uuid::parse_str(name).is_ok());
            if !is_file || !is_record {
                report.skipped += 1;
                continue;
            }
            report.scanned += 1;

            let path = entry.path();
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);

            // mtime alone settles most files; only fresh-looking ones need the stamp.
            let expired = match modified {
                Some(modified) if is_past(modified, window, now) => true,
                _ => match read_stamp(&path).await {
                    Some(created) => is_past(created, window, now),
                    None if modified.is_none() => {
                        report.skipped += 1;
                        continue;
                    }
                    None => false,
                },
            };
            if !expired {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "Removed expired record");
                    report.removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "Expired record already gone");
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to remove expired record");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Start the background loop. It stops when `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> RetentionHandle {
        let token = shutdown.clone();
        let task = tokio::spawn(self.run(shutdown));
        RetentionHandle { token, task }
    }

    async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            dir = %self.dir.display(),
            window = %humantime::format_duration(self.window),
            "Retention collector started"
        );

        let mut delay = self.startup_delay;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            delay = match self.sweep().await {
                Ok(report) => {
                    tracing::debug!(
                        scanned = report.scanned,
                        removed = report.removed,
                        failed = report.failed,
                        "Retention sweep complete"
                    );
                    self.interval
                }
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "Retention sweep failed, retrying");
                    self.retry_interval
                }
            };
        }

        tracing::info!(dir = %self.dir.display(), "Retention collector stopped");
    }
}

fn is_past(reference: DateTime<Utc>, window: TimeDelta, now: DateTime<Utc>) -> bool {
    let deadline = reference
        .checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    now > deadline
}

/// Creation time from the head of a record file.
async fn read_stamp(path: &Path) -> Option<DateTime<Utc>> {
    let file = tokio::fs::File::open(path).await.ok()?;
    let mut prefix = Vec::with_capacity(STAMP_PREFIX_LEN as usize);
    file.take(STAMP_PREFIX_LEN)
        .read_to_end(&mut prefix)
        .await
        .ok()?;
    stamp_from_prefix(&prefix)
}

/// Handle to a running retention loop.
#[derive(Debug)]
pub struct RetentionHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RetentionHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Retention task failed");
        }
    }
}
