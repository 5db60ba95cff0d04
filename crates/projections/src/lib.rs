//! Store-wide projections for the query side.
//!
//! A [`GlobalProjection`] folds the events of a set of aggregates into one
//! named value persisted through the storage port. Live bus deliveries are
//! applied one at a time on the projection's own queue; a full rebuild goes
//! through its [`Replayer`](domain::Replayer) instead.

pub mod error;
pub mod global;

pub use error::{ProjectionError, Result};
pub use global::{ChangeCallback, GlobalProjection, GlobalProjectionOptions};
