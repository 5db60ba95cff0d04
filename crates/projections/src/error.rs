//! Projection error types.

use domain::QueueClosed;
use event_store::StorageError;
use thiserror::Error;

/// Errors that can occur while reading or updating a global projection.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the storage backend.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The projection queue stopped before the operation completed.
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
