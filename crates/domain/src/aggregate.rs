//! Aggregates: command handling for one entity type.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::Utc;
use event_store::{EntityId, Event, INIT_EVENT_TYPE, NewEvent, Snapshot, Storage};
use serde_json::Value;

use crate::bus::{EventBus, SubscriptionId, Topic};
use crate::command::{CommandHandler, Emitted, Rejection};
use crate::entity_projection::EntityProjection;
use crate::error::{DomainError, Result};
use crate::options::{EntityProjectionOptions, SnapshotPolicy};
use crate::queue::KeyedQueues;
use crate::reducer::Reducer;
use crate::replay::Replayer;

/// Name of the entity projection holding an aggregate's decision state.
pub const DECISION_PROJECTION: &str = "__decision__";

/// One entity type: its command handlers, its entity projections and a
/// serial queue per entity id.
///
/// Every command and projection read for an id runs on that id's queue, so
/// the decision-state read and the event append of a command never interleave
/// with another operation on the same entity. Different ids never wait on
/// each other.
///
/// Cloning is cheap; clones share the same registries and queues.
#[derive(Clone)]
pub struct Aggregate {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    storage: Arc<dyn Storage>,
    bus: Arc<EventBus>,
    snapshots: SnapshotPolicy,
    projections: RwLock<HashMap<String, Arc<EntityProjection>>>,
    commands: RwLock<HashMap<String, CommandHandler>>,
    queues: KeyedQueues<EntityId>,
    snapshot_trigger: SubscriptionId,
}

impl Aggregate {
    /// Creates an aggregate with its decision projection.
    ///
    /// `snapshots` is the already resolved policy of the decision projection
    /// and the default of every entity projection registered later.
    pub fn new(
        name: impl Into<String>,
        storage: Arc<dyn Storage>,
        bus: Arc<EventBus>,
        decision: Reducer,
        snapshots: SnapshotPolicy,
    ) -> Self {
        let name = name.into();
        let decision = Arc::new(EntityProjection::new(
            Arc::clone(&storage),
            name.clone(),
            DECISION_PROJECTION,
            decision,
            snapshots,
        ));

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let snapshot_trigger = bus.subscribe(Topic::Live, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.schedule_snapshots(event);
                }
            });

            Inner {
                name,
                storage,
                bus: Arc::clone(&bus),
                snapshots,
                projections: RwLock::new(HashMap::from([(
                    DECISION_PROJECTION.to_string(),
                    decision,
                )])),
                commands: RwLock::new(HashMap::new()),
                queues: KeyedQueues::new(),
                snapshot_trigger,
            }
        });

        Self { inner }
    }

    /// Returns the aggregate name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the snapshot policy inherited by entity projections.
    pub fn snapshots(&self) -> SnapshotPolicy {
        self.inner.snapshots
    }

    /// Registers a named entity projection.
    pub fn register_read_projection(
        &self,
        name: impl Into<String>,
        reducer: Reducer,
        options: EntityProjectionOptions,
    ) -> Result<()> {
        let name = name.into();
        let mut projections = self
            .inner
            .projections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if projections.contains_key(&name) {
            return Err(DomainError::DuplicateProjection {
                aggregate: self.inner.name.clone(),
                projection: name,
            });
        }

        let snapshots = SnapshotPolicy::resolve(options.snapshots, self.inner.snapshots);
        let projection = EntityProjection::new(
            Arc::clone(&self.inner.storage),
            self.inner.name.clone(),
            name.clone(),
            reducer,
            snapshots,
        );
        projections.insert(name, Arc::new(projection));
        Ok(())
    }

    /// Registers a command handler. A handler registered under an existing
    /// name replaces it.
    pub fn register_command<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Value, &Value) -> std::result::Result<Emitted<NewEvent>, Rejection>
            + Send
            + Sync
            + 'static,
    {
        self.inner
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(handler));
    }

    /// Returns true if a command handler is registered under this name.
    pub fn has_command(&self, name: &str) -> bool {
        self.inner
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Handles a command against one entity.
    ///
    /// Returns the stamped events in the shape the handler produced them.
    /// Events are appended one at a time, each followed by its publication
    /// on the live topic; if an append fails, events appended before it stay.
    pub async fn handle_command(
        &self,
        id: &EntityId,
        command: &str,
        data: Value,
    ) -> Result<Emitted<Event>> {
        let handler = self.inner.command(command)?;
        let inner = Arc::clone(&self.inner);
        let entity = id.clone();
        let command = command.to_string();

        self.inner
            .queues
            .queue(id)
            .submit(async move { inner.execute(&entity, &command, handler, data).await })
            .await?
    }

    /// Returns the current state of a named entity projection.
    pub async fn get_projection(&self, id: &EntityId, name: &str) -> Result<Value> {
        Ok(self.get_snapshot(id, name).await?.state)
    }

    /// Returns the current state and version of a named entity projection.
    pub async fn get_snapshot(&self, id: &EntityId, name: &str) -> Result<Snapshot> {
        let projection = self.inner.projection(name)?;
        let entity = id.clone();
        self.inner
            .queues
            .queue(id)
            .submit(async move { projection.get_snapshot(&entity).await })
            .await?
    }

    /// Recomputes and persists the snapshot of a named entity projection.
    pub async fn store_snapshot(&self, id: &EntityId, name: &str) -> Result<Snapshot> {
        let projection = self.inner.projection(name)?;
        let entity = id.clone();
        self.inner
            .queues
            .queue(id)
            .submit(async move { projection.store_snapshot(&entity).await })
            .await?
    }

    /// Returns one replayer per entity projection, decision projection included.
    pub fn get_replayers(&self) -> Vec<Box<dyn Replayer>> {
        self.inner
            .projections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|projection| projection.replayer())
            .collect()
    }

    /// Returns the number of entity queues created so far.
    pub fn queue_count(&self) -> usize {
        self.inner.queues.len()
    }
}

impl Inner {
    fn command(&self, name: &str) -> Result<CommandHandler> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::UnknownCommand {
                aggregate: self.name.clone(),
                command: name.to_string(),
            })
    }

    fn projection(&self, name: &str) -> Result<Arc<EntityProjection>> {
        self.projections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::UnknownProjection {
                aggregate: self.name.clone(),
                projection: name.to_string(),
            })
    }

    #[tracing::instrument(skip(self, handler, data), fields(aggregate = %self.name))]
    async fn execute(
        &self,
        id: &EntityId,
        command: &str,
        handler: CommandHandler,
        data: Value,
    ) -> Result<Emitted<Event>> {
        let decision = self.projection(DECISION_PROJECTION)?.get_snapshot(id).await?;

        let emitted = handler(&decision.state, &data).inspect_err(|rejection| {
            metrics::counter!("event_closet_commands_rejected", "aggregate" => self.name.clone())
                .increment(1);
            tracing::debug!(reason = %rejection, "command rejected");
        })?;

        if emitted.iter().any(|event| event.event_type == INIT_EVENT_TYPE) {
            return Err(DomainError::ReservedEventType {
                aggregate: self.name.clone(),
                id: id.clone(),
                command: command.to_string(),
            });
        }

        let insert_date = Utc::now();
        let mut sequence = decision.version.next_sequence();
        let events = emitted.map(|event| {
            let stamped = event.stamp(&self.name, id.clone(), sequence, insert_date);
            sequence = sequence.next();
            stamped
        });

        for event in events.iter() {
            self.storage.store_event(event).await?;
            metrics::counter!("event_closet_events_appended", "aggregate" => self.name.clone())
                .increment(1);
            self.bus.emit(Topic::Live, event);
        }

        metrics::counter!("event_closet_commands_handled", "aggregate" => self.name.clone())
            .increment(1);
        tracing::debug!(events = events.len(), "command handled");
        Ok(events)
    }

    /// Queues snapshot writes for projections whose interval boundary the
    /// event reaches. Runs inside the bus emission of the command that
    /// appended the event, so the write lands after that command completes.
    fn schedule_snapshots(&self, event: &Event) {
        if !event.belongs_to(&self.name) {
            return;
        }
        let version = event.sequence.version_after();
        let due: Vec<Arc<EntityProjection>> = self
            .projections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|projection| projection.snapshots().is_boundary(version))
            .cloned()
            .collect();
        if due.is_empty() {
            return;
        }

        let queue = self.queues.queue(&event.id);
        for projection in due {
            let id = event.id.clone();
            let scheduled = queue.enqueue(async move {
                if let Err(err) = projection.store_snapshot(&id).await {
                    tracing::warn!(
                        error = %err,
                        aggregate = %projection.aggregate(),
                        projection = %projection.name(),
                        %id,
                        "background snapshot failed"
                    );
                }
            });
            if let Err(err) = scheduled {
                tracing::warn!(error = %err, aggregate = %self.name, "snapshot not scheduled");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.snapshot_trigger);
    }
}
