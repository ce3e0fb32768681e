//! Record Store
//!
//! Durable key → record persistence behind the [`RecordStore`] trait.
//!
//! # Components
//!
//! - [`RecordStore`]: get / set / close contract shared by all backends
//! - [`JsonStore`]: one JSON file per record in a flat directory
//! - [`JsonStoreBuilder`]: configures a [`JsonStore`] and its optional retention loop

mod error;
mod json;

use async_trait::async_trait;
use uuid::Uuid;

use crate::record::Record;

pub use error::StoreError;
pub use json::{JsonStore, JsonStoreBuilder};

/// Durable record persistence.
///
/// Implementations must allow concurrent calls for distinct identifiers.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Load a record.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] when absent, [`StoreError::Corrupt`] when the
    /// stored form cannot be decoded.
    async fn get(&self, id: Uuid) -> Result<Record, StoreError>;

    /// Persist a record, overwriting any previous content under its id.
    /// Returns the identifier it was stored under.
    async fn set(&self, record: &Record) -> Result<Uuid, StoreError>;

    /// Stop background work owned by the store. Safe to call more than once.
    async fn close(&self);
}
