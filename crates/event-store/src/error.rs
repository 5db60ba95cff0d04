use thiserror::Error;

use crate::{EntityId, Sequence};

/// Errors that can occur when interacting with a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An event with the same sequence already exists for this entity.
    #[error("Duplicate sequence {sequence} for {aggregate}/{id}")]
    DuplicateSequence {
        aggregate: String,
        id: EntityId,
        sequence: Sequence,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend could not serve the request (connection lost, timeout...).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
