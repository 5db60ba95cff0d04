//! The top-level router owning aggregates, global projections and the bus.

use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    Aggregate, AggregateOptions, Emitted, EntityProjectionOptions, EventBus, Reducer, Rejection,
    Replayer, SnapshotPolicy, SubscriptionId, Topic,
};
use event_store::{EntityId, Event, NewEvent, Snapshot, Storage};
use futures_util::TryStreamExt;
use projections::{GlobalProjection, GlobalProjectionOptions};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::StoreConfig;
use crate::error::{ClosetError, Result};

/// Outcome of a [`EventCloset::rebuild`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    /// Number of events streamed from storage.
    pub events: u64,
    /// Number of replayers that consumed the stream.
    pub replayers: usize,
}

/// An event store: routes commands and queries to registered aggregates and
/// projections, and rebuilds derived state from the log.
///
/// Registration takes `&mut self`; once set up, every operation takes `&self`
/// and the store can be shared behind an `Arc`.
///
/// Commands hold a shared guard and [`rebuild`](Self::rebuild) an exclusive
/// one, so no event is appended between the log scan of a rebuild and the
/// projection rows it writes.
pub struct EventCloset {
    storage: Arc<dyn Storage>,
    bus: Arc<EventBus>,
    config: StoreConfig,
    aggregates: HashMap<String, Aggregate>,
    projections: HashMap<String, GlobalProjection>,
    appends: RwLock<()>,
}

impl EventCloset {
    /// Creates a store with the default configuration.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_config(storage, StoreConfig::default())
    }

    /// Creates a store with the given configuration.
    pub fn with_config(storage: Arc<dyn Storage>, config: StoreConfig) -> Self {
        Self {
            storage,
            bus: Arc::new(EventBus::new()),
            config,
            aggregates: HashMap::new(),
            projections: HashMap::new(),
            appends: RwLock::new(()),
        }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Returns the event bus shared by every component of this store.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Returns a registered aggregate.
    pub fn aggregate(&self, name: &str) -> Result<&Aggregate> {
        self.aggregates
            .get(name)
            .ok_or_else(|| ClosetError::UnknownAggregate(name.to_string()))
    }

    /// Returns a registered global projection.
    pub fn projection(&self, name: &str) -> Result<&GlobalProjection> {
        self.projections
            .get(name)
            .ok_or_else(|| ClosetError::UnknownProjection(name.to_string()))
    }

    /// Registers an aggregate with its decision reducer.
    pub fn register_aggregate(
        &mut self,
        name: impl Into<String>,
        decision: Reducer,
        options: AggregateOptions,
    ) -> Result<&Aggregate> {
        let name = name.into();
        if self.aggregates.contains_key(&name) {
            return Err(ClosetError::DuplicateRegistration {
                kind: "aggregate",
                name,
            });
        }

        let snapshots = SnapshotPolicy::resolve(options.snapshots, self.config.snapshot_every);
        let aggregate = Aggregate::new(
            name.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.bus),
            decision,
            snapshots,
        );
        tracing::debug!(aggregate = %name, ?snapshots, "aggregate registered");
        Ok(self.aggregates.entry(name).or_insert(aggregate))
    }

    /// Registers a command handler on an aggregate.
    pub fn register_command<F>(
        &self,
        aggregate: &str,
        name: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&Value, &Value) -> std::result::Result<Emitted<NewEvent>, Rejection>
            + Send
            + Sync
            + 'static,
    {
        self.aggregate(aggregate)?.register_command(name, handler);
        Ok(())
    }

    /// Registers a named entity projection on an aggregate.
    pub fn register_entity_projection(
        &self,
        aggregate: &str,
        name: impl Into<String>,
        reducer: Reducer,
        options: EntityProjectionOptions,
    ) -> Result<()> {
        self.aggregate(aggregate)?
            .register_read_projection(name, reducer, options)?;
        Ok(())
    }

    /// Registers a global projection over the events of `aggregates`.
    ///
    /// Aggregates do not need to be registered yet.
    pub fn register_projection<I, A>(
        &mut self,
        name: impl Into<String>,
        aggregates: I,
        reducer: Reducer,
        options: GlobalProjectionOptions,
    ) -> Result<&GlobalProjection>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let name = name.into();
        if self.projections.contains_key(&name) {
            return Err(ClosetError::DuplicateRegistration {
                kind: "projection",
                name,
            });
        }

        let projection = GlobalProjection::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.bus),
            name.clone(),
            aggregates,
            reducer,
            options,
        );
        tracing::debug!(projection = %name, "global projection registered");
        Ok(self.projections.entry(name).or_insert(projection))
    }

    /// Handles a command against one entity and returns the stamped events.
    #[tracing::instrument(skip(self, data))]
    pub async fn handle_command(
        &self,
        aggregate: &str,
        id: &EntityId,
        command: &str,
        data: Value,
    ) -> Result<Emitted<Event>> {
        let aggregate = self.aggregate(aggregate)?;
        let _appending = self.appends.read().await;
        Ok(aggregate.handle_command(id, command, data).await?)
    }

    /// Returns the current state of a named entity projection.
    #[tracing::instrument(skip(self))]
    pub async fn get_entity_projection(
        &self,
        aggregate: &str,
        id: &EntityId,
        name: &str,
    ) -> Result<Value> {
        Ok(self.aggregate(aggregate)?.get_projection(id, name).await?)
    }

    /// Returns the current state and version of a named entity projection.
    pub async fn get_entity_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        name: &str,
    ) -> Result<Snapshot> {
        Ok(self.aggregate(aggregate)?.get_snapshot(id, name).await?)
    }

    /// Recomputes and persists the snapshot of a named entity projection.
    pub async fn store_entity_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        name: &str,
    ) -> Result<Snapshot> {
        Ok(self.aggregate(aggregate)?.store_snapshot(id, name).await?)
    }

    /// Returns the persisted state of a global projection.
    #[tracing::instrument(skip(self))]
    pub async fn get_projection(&self, name: &str) -> Result<Value> {
        Ok(self.projection(name)?.get_state().await?)
    }

    /// Subscribes a listener to live events.
    ///
    /// Listeners receive the event JSON rendered through the configured
    /// internal fields policy. Rebuilds never reach them.
    pub fn on_event<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let internal_fields = self.config.internal_fields;
        self.bus
            .subscribe(Topic::Live, move |event| match internal_fields.render(event) {
                Ok(rendered) => listener(&rendered),
                Err(err) => tracing::error!(
                    error = %err,
                    aggregate = %event.aggregate,
                    id = %event.id,
                    "event could not be rendered for listener"
                ),
            })
    }

    /// Removes a listener added with [`on_event`](Self::on_event).
    pub fn off_event(&self, subscription: SubscriptionId) -> bool {
        self.bus.unsubscribe(subscription)
    }

    /// Re-derives every global projection and entity snapshot from the log.
    ///
    /// Streams the whole log once in global order through one replayer per
    /// projection, then finalizes them in turn. Nothing is published on the
    /// bus. Commands wait until the run is over. Any failure aborts the run;
    /// rows already finalized stay written, and running it again is safe.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<RebuildStats> {
        let _exclusive = self.appends.write().await;

        let mut replayers: Vec<Box<dyn Replayer>> = self
            .projections
            .values()
            .map(GlobalProjection::replayer)
            .collect();
        for aggregate in self.aggregates.values() {
            replayers.extend(aggregate.get_replayers());
        }

        let mut events = self.storage.get_all_events().await?;
        let mut count: u64 = 0;
        while let Some(event) = events.try_next().await? {
            for replayer in replayers.iter_mut() {
                replayer.handle_event(&event);
            }
            count += 1;
        }

        let stats = RebuildStats {
            events: count,
            replayers: replayers.len(),
        };
        for replayer in replayers {
            let name = replayer.name().to_string();
            replayer.finalize().await.inspect_err(|err| {
                tracing::error!(error = %err, projection = %name, "replayer failed to finalize");
            })?;
        }

        metrics::counter!("event_closet_rebuild_events").increment(count);
        tracing::info!(events = stats.events, replayers = stats.replayers, "rebuild complete");
        Ok(stats)
    }
}
