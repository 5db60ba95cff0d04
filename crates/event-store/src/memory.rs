use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::stream;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    EntityId, Event, Result, Sequence, Snapshot, StorageError,
    store::{EventStream, Storage},
};

type SnapshotKey = (String, EntityId, String);

/// In-memory storage backend.
///
/// Events live in a single vector in append order. Intended for tests and
/// for embedding the kernel without a database.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    events: Arc<RwLock<Vec<Event>>>,
    projections: Arc<RwLock<HashMap<String, Value>>>,
    snapshots: Arc<RwLock<HashMap<SnapshotKey, Snapshot>>>,
    projection_writes: Arc<AtomicU64>,
    snapshot_writes: Arc<AtomicU64>,
}

impl InMemoryStorage {
    /// Creates a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage pre-populated with an existing event history.
    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: Arc::new(RwLock::new(events)),
            ..Self::default()
        }
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Returns how many times any projection row was written.
    pub fn projection_writes(&self) -> u64 {
        self.projection_writes.load(Ordering::SeqCst)
    }

    /// Returns how many times any snapshot row was written.
    pub fn snapshot_writes(&self) -> u64 {
        self.snapshot_writes.load(Ordering::SeqCst)
    }

    /// Returns every stored snapshot, keyed by `(aggregate, id, projection)`.
    pub async fn snapshots(&self) -> HashMap<(String, EntityId, String), Snapshot> {
        self.snapshots.read().await.clone()
    }

    /// Returns every stored projection row.
    pub async fn projections(&self) -> HashMap<String, Value> {
        self.projections.read().await.clone()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn store_event(&self, event: &Event) -> Result<()> {
        let mut store = self.events.write().await;

        // Unique constraint simulation on (aggregate, id, sequence)
        let duplicate = store.iter().any(|e| {
            e.sequence == event.sequence && e.id == event.id && e.aggregate == event.aggregate
        });
        if duplicate {
            return Err(StorageError::DuplicateSequence {
                aggregate: event.aggregate.clone(),
                id: event.id.clone(),
                sequence: event.sequence,
            });
        }

        store.push(event.clone());
        Ok(())
    }

    async fn get_events(
        &self,
        aggregate: &str,
        id: &EntityId,
        from: Sequence,
    ) -> Result<EventStream> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate == aggregate && &e.id == id && e.sequence >= from)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence);

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok::<_, StorageError>))))
    }

    async fn get_all_events(&self) -> Result<EventStream> {
        let store = self.events.read().await;
        let mut events = store.clone();
        // Stable sort keeps append order between exact ties
        events.sort_by(|a, b| {
            a.insert_date
                .cmp(&b.insert_date)
                .then(a.sequence.cmp(&b.sequence))
        });

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok::<_, StorageError>))))
    }

    async fn store_projection(&self, name: &str, state: &Value) -> Result<()> {
        let mut projections = self.projections.write().await;
        projections.insert(name.to_string(), state.clone());
        self.projection_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_projection(&self, name: &str) -> Result<Option<Value>> {
        let projections = self.projections.read().await;
        Ok(projections.get(name).cloned())
    }

    async fn store_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        projection: &str,
        snapshot: &Snapshot,
    ) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(
            (aggregate.to_string(), id.clone(), projection.to_string()),
            snapshot.clone(),
        );
        self.snapshot_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        projection: &str,
    ) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(&(aggregate.to_string(), id.clone(), projection.to_string()))
            .cloned())
    }
}
