//! Store-specific error types.
//!
//! Every [`RecordStore`](super::RecordStore) operation returns [`StoreError`]
//! on failure, which callers match to tell a missing record from a damaged one
//! or an I/O problem.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this identifier exists.
    #[error("record {0} not found")]
    NotFound(Uuid),

    /// The stored bytes could not be decoded into a record.
    #[error("record {id} is corrupt: {source}")]
    Corrupt {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    /// Serializing a record failed.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
