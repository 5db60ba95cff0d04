//! Top-level error types.

use domain::{DomainError, Rejection};
use event_store::StorageError;
use projections::ProjectionError;
use thiserror::Error;

/// Errors returned by [`EventCloset`](crate::EventCloset) operations.
#[derive(Debug, Error)]
pub enum ClosetError {
    /// No aggregate is registered under this name.
    #[error("Unknown aggregate: {0}")]
    UnknownAggregate(String),

    /// No global projection is registered under this name.
    #[error("Unknown projection: {0}")]
    UnknownProjection(String),

    /// A component with this name is already registered.
    #[error("{kind} {name} is already registered")]
    DuplicateRegistration { kind: &'static str, name: String },

    /// An aggregate operation failed.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A global projection operation failed.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ClosetError {
    /// Returns the command handler's rejection, if that is what failed.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ClosetError::Domain(DomainError::Rejected(rejection)) => Some(rejection),
            _ => None,
        }
    }
}

/// Result type for top-level operations.
pub type Result<T> = std::result::Result<T, ClosetError>;
