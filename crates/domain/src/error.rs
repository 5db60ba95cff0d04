//! Domain error types.

use event_store::{EntityId, StorageError};
use thiserror::Error;

use crate::command::Rejection;
use crate::queue::QueueClosed;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the storage backend.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A command handler rejected the command.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// No handler is registered under this command name.
    #[error("Unknown command {command} for aggregate {aggregate}")]
    UnknownCommand { aggregate: String, command: String },

    /// No entity projection is registered under this name.
    #[error("Unknown projection {projection} for aggregate {aggregate}")]
    UnknownProjection {
        aggregate: String,
        projection: String,
    },

    /// A projection with this name is already registered.
    #[error("Projection {projection} is already registered for aggregate {aggregate}")]
    DuplicateProjection {
        aggregate: String,
        projection: String,
    },

    /// A command handler emitted the reserved initialization event type.
    #[error("Command {command} for {aggregate}/{id} emitted the reserved init event type")]
    ReservedEventType {
        aggregate: String,
        id: EntityId,
        command: String,
    },

    /// The serial queue stopped before the operation completed.
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
