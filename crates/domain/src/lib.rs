//! Domain layer of the event-sourcing kernel.
//!
//! This crate provides the write side and the entity-scoped read side:
//! - [`EventBus`] for synchronous, ordered in-process publication
//! - [`Reducer`] and the initialization marker convention
//! - [`EntityProjection`] with optional snapshot checkpoints
//! - [`Aggregate`] owning command handlers and a serial queue per entity id
//! - [`Replayer`] used to rebuild derived state from the full log

pub mod aggregate;
pub mod bus;
pub mod command;
pub mod entity_projection;
pub mod error;
pub mod options;
pub mod queue;
pub mod reducer;
pub mod replay;

pub use aggregate::{Aggregate, DECISION_PROJECTION};
pub use bus::{EventBus, InternalFields, SubscriptionId, Topic};
pub use command::{CommandHandler, Emitted, Rejection};
pub use entity_projection::EntityProjection;
pub use error::{DomainError, Result};
pub use options::{AggregateOptions, EntityProjectionOptions, SnapshotPolicy};
pub use queue::{KeyedQueues, QueueClosed, SerialQueue};
pub use reducer::{Reducer, reducer, typed, zero_state};
pub use replay::Replayer;
