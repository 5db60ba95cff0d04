//! Embeddable event-sourcing kernel.
//!
//! An [`EventCloset`] owns a storage backend, an in-process event bus,
//! aggregates and global projections:
//! - commands are handled per entity on a serial queue, appended to the log
//!   and published on the bus
//! - entity projections fold one entity's events, optionally from a snapshot
//! - global projections fold the events of several aggregates into one
//!   persisted value
//! - [`EventCloset::rebuild`] re-derives every projection and snapshot from
//!   the log
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use event_closet::{
//!     AggregateOptions, EntityId, EventCloset, InMemoryStorage, NewEvent, Rejection, reducer,
//! };
//! use serde_json::json;
//!
//! # async fn run() -> event_closet::Result<()> {
//! let mut closet = EventCloset::new(Arc::new(InMemoryStorage::new()));
//! closet.register_aggregate(
//!     "user",
//!     reducer(|state, event| match event.event_type.as_str() {
//!         "created" => json!({"created": true}),
//!         _ => state.unwrap_or_else(|| json!({"created": false})),
//!     }),
//!     AggregateOptions::default(),
//! )?;
//! closet.register_command("user", "create", |state, data| {
//!     if state["created"] == json!(true) {
//!         return Err(Rejection::new("user already created"));
//!     }
//!     Ok(NewEvent::new("created").with("name", data["name"].clone()).into())
//! })?;
//!
//! closet
//!     .handle_command("user", &EntityId::from("u1"), "create", json!({"name": "Ann"}))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod closet;
pub mod config;
pub mod error;

pub use closet::{EventCloset, RebuildStats};
pub use config::StoreConfig;
pub use error::{ClosetError, Result};

pub use domain::{
    AggregateOptions, DECISION_PROJECTION, DomainError, Emitted, EntityProjectionOptions,
    InternalFields, Reducer, Rejection, SnapshotPolicy, SubscriptionId, reducer, typed,
    zero_state,
};
pub use event_store::{
    EntityId, Event, INIT_EVENT_TYPE, InMemoryStorage, NewEvent, PostgresStorage, Sequence,
    Snapshot, Storage, StorageError, Version,
};
pub use projections::{ChangeCallback, GlobalProjectionOptions, ProjectionError};
