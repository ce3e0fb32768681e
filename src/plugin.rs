//! Plugin Layer
//!
//! Consumers of accepted records. The [`Dispatcher`](crate::Dispatcher) hands
//! every record to every registered plugin in registration order.
//!
//! # Contract
//!
//! `process` is awaited inline by the dispatch loop, so it must return
//! quickly: a plugin with real work to do queues the record on its own bounded
//! queue (bounded wait, then drop) and does the work on its own task. `close`
//! stops that task.
//!
//! # Plugins
//!
//! - [`Notifier`]: formats a short message per record and submits it through a [`Transport`]
//! - [`RetentionCleaner`]: runs a retention loop for the lifetime of the plugin

mod housekeeping;
mod notifier;
mod pushover;

use async_trait::async_trait;
use thiserror::Error;

use crate::queue::Enqueued;
use crate::record::SharedRecord;

pub use housekeeping::{HousekeepingConfig, RetentionCleaner};
pub use notifier::{Message, Notifier, Transport};
pub use pushover::{PushoverConfig, PushoverTransport};

/// Errors raised while delivering notifications.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("delivery rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Invalid notifier configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// A consumer of accepted records.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Accept a record for processing. Must not block indefinitely.
    async fn process(&self, record: SharedRecord) -> Enqueued;

    /// Stop the plugin's background work.
    async fn close(&self);
}
