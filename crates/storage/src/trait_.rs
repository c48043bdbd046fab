//! Collaborator trait abstractions.

use std::path::Path;

use async_trait::async_trait;
use tandem_core::{NewRecord, OpError, Record, RecordFilter, RecordId};

/// Error type for collaborator operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while talking to a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<StorageError> for OpError {
    fn from(err: StorageError) -> Self {
        OpError::ComputationFailure(err.to_string())
    }
}

/// Store of employee-like records.
///
/// Used as the data-dependent payload for the aggregator and the
/// propagation chain. Implementations must be safe to share between
/// concurrently running operations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record and return its ID.
    async fn create(&self, record: NewRecord) -> Result<RecordId>;

    /// All records matching the filter, in insertion order.
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>>;

    /// The first record matching the filter.
    async fn first(&self, filter: &RecordFilter) -> Result<Option<Record>>;
}

/// Source of whole text blobs (config files and the like).
///
/// Whatever handle an implementation acquires must be released on every
/// exit path before `read_all` returns.
#[async_trait]
pub trait TextSource: Send + Sync {
    /// Read the whole blob at `path`.
    async fn read_all(&self, path: &Path) -> Result<String>;
}
