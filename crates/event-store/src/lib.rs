pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::EntityId;
pub use error::{Result, StorageError};
pub use event::{Event, INIT_EVENT_TYPE, NewEvent, Sequence, Version};
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use snapshot::Snapshot;
pub use store::{EventStream, Storage, StorageExt};
