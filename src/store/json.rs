//! Directory-backed JSON store.
//!
//! Each record lives in `<root>/<id>` as a single JSON document. Writes
//! truncate, so the last writer wins; ids are unique per record so this only
//! matters for explicit re-imports.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::record::Record;
use crate::retention::{DEFAULT_INTERVAL, RetentionCollector, RetentionHandle};
use crate::store::{RecordStore, StoreError};

/// Builder for [`JsonStore`].
#[derive(Debug, Clone)]
pub struct JsonStoreBuilder {
    root: PathBuf,
    retention_days: u32,
    sweep_interval: Duration,
    shutdown: Option<CancellationToken>,
}

impl JsonStoreBuilder {
    /// Keep records for `days` whole days. Zero disables retention.
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Set the steady-state retention sweep interval (default: 1 hour).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Tie the retention loop to a process-wide shutdown token.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Build the store, starting its retention loop when configured.
    ///
    /// Must be called from within a Tokio runtime when retention is enabled.
    pub fn build(self) -> JsonStore {
        let retention = (self.retention_days > 0).then(|| {
            // A child token lets `close` stop this loop without cancelling the parent.
            let token = self
                .shutdown
                .map(|t| t.child_token())
                .unwrap_or_default();
            RetentionCollector::new(&self.root, self.retention_days)
                .with_interval(self.sweep_interval)
                .spawn(token)
        });

        JsonStore {
            root: self.root,
            retention: Mutex::new(retention),
        }
    }
}

/// One-file-per-record JSON store.
pub struct JsonStore {
    root: PathBuf,
    retention: Mutex<Option<RetentionHandle>>,
}

impl std::fmt::Debug for JsonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl JsonStore {
    /// Start configuring a store rooted at `root`.
    pub fn builder(root: impl AsRef<Path>) -> JsonStoreBuilder {
        JsonStoreBuilder {
            root: root.as_ref().to_path_buf(),
            retention_days: 0,
            sweep_interval: DEFAULT_INTERVAL,
            shutdown: None,
        }
    }

    /// Store without retention.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::builder(root).build()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a record id.
    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    #[cfg(test)]
    fn has_retention(&self) -> bool {
        self.retention
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[async_trait]
impl RecordStore for JsonStore {
    async fn get(&self, id: Uuid) -> Result<Record, StoreError> {
        let bytes = match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt { id, source })
    }

    async fn set(&self, record: &Record) -> Result<Uuid, StoreError> {
        let id = record.id();
        let path = self.path_for(id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut bytes = serde_json::to_vec(record)?;
        bytes.push(b'\n');
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(id = %id, path = %path.display(), "Record stored");
        Ok(id)
    }

    async fn close(&self) {
        let handle = self
            .retention
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            tracing::info!(root = %self.root.display(), "Store retention stopped");
        }
    }
}
