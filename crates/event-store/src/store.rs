use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::TryStreamExt;
use serde_json::Value;

use crate::{EntityId, Event, Result, Sequence, Snapshot};

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Storage port for the event log, projection rows and snapshot rows.
///
/// The event log is append-only. Projection rows are keyed by name and
/// snapshot rows by `(aggregate, id, projection)`; both have last-writer-wins
/// semantics. Concurrent writers to the same row are prevented by the
/// component owning the row, never by the backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Durably appends one event to the log.
    async fn store_event(&self, event: &Event) -> Result<()>;

    /// Streams the events of one entity with `sequence >= from`, ascending by sequence.
    async fn get_events(&self, aggregate: &str, id: &EntityId, from: Sequence)
    -> Result<EventStream>;

    /// Streams every event in global order: ascending by `(insert_date, sequence)`.
    async fn get_all_events(&self) -> Result<EventStream>;

    /// Stores the state of a global projection, replacing any previous value.
    async fn store_projection(&self, name: &str, state: &Value) -> Result<()>;

    /// Retrieves the state of a global projection.
    ///
    /// Returns None if the projection was never stored.
    async fn get_projection(&self, name: &str) -> Result<Option<Value>>;

    /// Stores a snapshot, replacing any previous snapshot for the same key.
    async fn store_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        projection: &str,
        snapshot: &Snapshot,
    ) -> Result<()>;

    /// Retrieves a snapshot.
    ///
    /// Returns None if no snapshot exists.
    async fn get_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        projection: &str,
    ) -> Result<Option<Snapshot>>;
}

/// Extension trait providing convenience methods for storage backends.
#[async_trait]
pub trait StorageExt: Storage {
    /// Collects every event of one entity, ascending by sequence.
    async fn events_for(&self, aggregate: &str, id: &EntityId) -> Result<Vec<Event>> {
        self.get_events(aggregate, id, Sequence::first())
            .await?
            .try_collect()
            .await
    }

    /// Collects the whole log in global order.
    async fn all_events(&self) -> Result<Vec<Event>> {
        self.get_all_events().await?.try_collect().await
    }
}

// Blanket implementation for all Storage implementations
impl<T: Storage + ?Sized> StorageExt for T {}
