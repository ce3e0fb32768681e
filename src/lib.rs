//! Inbox - Drop-box Ingestion Service
//!
//! This crate accepts small file submissions over HTTP, persists each one as a
//! JSON record and fans accepted records out to plugins. It can be used as a
//! library, or run as a standalone binary with the `inbox` executable.
//!
//! # Architecture
//!
//! - **Server**: multipart ingestion endpoint behind a per-source rate limiter
//! - **Store**: one JSON file per record, keyed by UUID
//! - **Dispatcher**: bounded queue feeding every registered plugin in order
//! - **Plugins**: notification delivery and housekeeping
//! - **Retention**: periodic deletion of records older than a day window
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use inbox::{Dispatcher, DispatcherConfig, JsonStore, RecordStore, Record};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = JsonStore::builder("./data").retention_days(30).build();
//!     let dispatcher = Dispatcher::new(&DispatcherConfig::default());
//!
//!     let record = Record::new("hello").with_subject("hi");
//!     store.set(&record).await?;
//!     let _ = dispatcher.enqueue(Arc::new(record)).await;
//!
//!     dispatcher.shutdown().await;
//!     store.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod limiter;
pub mod plugin;
pub mod queue;
pub mod record;
pub mod retention;
pub mod server;
pub mod shutdown;
pub mod store;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use limiter::{RateLimitConfig, RateLimiter};
pub use plugin::{Notifier, Plugin, PushoverConfig, PushoverTransport, RetentionCleaner};
pub use queue::Enqueued;
pub use record::{Record, SharedRecord};
pub use retention::RetentionCollector;
pub use shutdown::Shutdown;
pub use store::{JsonStore, RecordStore, StoreError};
