//! Global projections: one named value folded across several aggregates.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use domain::{EventBus, Reducer, Replayer, SerialQueue, SubscriptionId, Topic, zero_state};
use event_store::{Event, Storage};
use serde_json::Value;

use crate::error::{ProjectionError, Result};

/// Called with the new state and the live event that produced it.
///
/// The event is always the stamped one, whatever internal fields policy the
/// store applies to its event listeners.
pub type ChangeCallback = Arc<dyn Fn(&Value, &Event) + Send + Sync>;

/// Options for registering a global projection.
#[derive(Clone, Default)]
pub struct GlobalProjectionOptions {
    /// Invoked after a live event changed the persisted state.
    pub on_change: Option<ChangeCallback>,
}

impl GlobalProjectionOptions {
    /// Sets the change callback.
    pub fn on_change<F>(callback: F) -> Self
    where
        F: Fn(&Value, &Event) + Send + Sync + 'static,
    {
        Self {
            on_change: Some(Arc::new(callback)),
        }
    }
}

impl std::fmt::Debug for GlobalProjectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalProjectionOptions")
            .field("on_change", &self.on_change.is_some())
            .finish()
    }
}

/// A store-wide projection over the events of a set of aggregates.
///
/// The persisted row is the authoritative value: reads never replay the log.
/// Every matching bus delivery is applied on the projection's own serial
/// queue, so reads and updates of this projection never interleave.
#[derive(Clone)]
pub struct GlobalProjection {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    aggregates: HashSet<String>,
    storage: Arc<dyn Storage>,
    bus: Arc<EventBus>,
    reducer: Reducer,
    on_change: Option<ChangeCallback>,
    queue: SerialQueue,
    subscriptions: [SubscriptionId; 2],
}

impl GlobalProjection {
    /// Creates the projection and subscribes it to both bus topics.
    pub fn new<I, A>(
        storage: Arc<dyn Storage>,
        bus: Arc<EventBus>,
        name: impl Into<String>,
        aggregates: I,
        reducer: Reducer,
        options: GlobalProjectionOptions,
    ) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let name = name.into();
        let aggregates = aggregates.into_iter().map(Into::into).collect();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let subscriptions = [Topic::Live, Topic::Replay].map(|topic| {
                let weak = weak.clone();
                bus.subscribe(topic, move |event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.schedule(topic, event);
                    }
                })
            });

            Inner {
                name,
                aggregates,
                storage,
                bus: Arc::clone(&bus),
                reducer,
                on_change: options.on_change,
                queue: SerialQueue::new(),
                subscriptions,
            }
        });

        Self { inner }
    }

    /// Returns the projection name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns true if events of this aggregate are folded in.
    pub fn handles(&self, aggregate: &str) -> bool {
        self.inner.aggregates.contains(aggregate)
    }

    /// Returns the persisted state, or the zero-state if none was stored yet.
    ///
    /// Waits for every event delivered before the call to be applied.
    pub async fn get_state(&self) -> Result<Value> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .queue
            .submit(async move { inner.load_state().await })
            .await?
    }

    /// Overwrites the persisted state with the zero-state.
    pub async fn reset(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .queue
            .submit(async move {
                let zero = zero_state(&inner.reducer);
                inner.storage.store_projection(&inner.name, &zero).await?;
                tracing::debug!(projection = %inner.name, "projection reset");
                Ok::<_, ProjectionError>(())
            })
            .await?
    }

    /// Creates a replayer folding the full log in memory.
    pub fn replayer(&self) -> Box<dyn Replayer> {
        Box::new(GlobalReplayer {
            state: zero_state(&self.inner.reducer),
            inner: Arc::clone(&self.inner),
        })
    }
}

impl Inner {
    fn handles(&self, event: &Event) -> bool {
        self.aggregates.contains(&event.aggregate)
    }

    fn schedule(self: Arc<Self>, topic: Topic, event: &Event) {
        if !self.handles(event) {
            return;
        }
        let event = event.clone();
        let inner = Arc::clone(&self);
        let scheduled = self.queue.enqueue(async move {
            if let Err(err) = inner.apply(topic, &event).await {
                tracing::error!(
                    error = %err,
                    projection = %inner.name,
                    %topic,
                    aggregate = %event.aggregate,
                    id = %event.id,
                    "projection update failed"
                );
            }
        });
        if let Err(err) = scheduled {
            tracing::error!(error = %err, projection = %self.name, "projection update not scheduled");
        }
    }

    async fn load_state(&self) -> Result<Value> {
        Ok(self
            .storage
            .get_projection(&self.name)
            .await?
            .unwrap_or_else(|| zero_state(&self.reducer)))
    }

    #[tracing::instrument(skip(self, event), fields(projection = %self.name, aggregate = %event.aggregate))]
    async fn apply(&self, topic: Topic, event: &Event) -> Result<()> {
        let current = self.load_state().await?;
        let next = (self.reducer)(Some(current.clone()), event);
        if next == current {
            return Ok(());
        }

        self.storage.store_projection(&self.name, &next).await?;
        metrics::counter!("event_closet_projection_writes", "projection" => self.name.clone())
            .increment(1);

        if topic == Topic::Live
            && let Some(on_change) = &self.on_change
        {
            on_change(&next, event);
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for subscription in self.subscriptions {
            self.bus.unsubscribe(subscription);
        }
    }
}

struct GlobalReplayer {
    inner: Arc<Inner>,
    state: Value,
}

#[async_trait]
impl Replayer for GlobalReplayer {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn handle_event(&mut self, event: &Event) {
        if self.inner.handles(event) {
            let state = std::mem::take(&mut self.state);
            self.state = (self.inner.reducer)(Some(state), event);
        }
    }

    async fn finalize(self: Box<Self>) -> domain::Result<()> {
        let GlobalReplayer { inner, state } = *self;
        let writer = Arc::clone(&inner);
        // Queued so the write cannot interleave with a live update of the same row
        inner
            .queue
            .submit(async move { writer.storage.store_projection(&writer.name, &state).await })
            .await??;

        metrics::counter!("event_closet_projection_writes", "projection" => inner.name.clone())
            .increment(1);
        tracing::debug!(projection = %inner.name, "global projection rebuilt");
        Ok(())
    }
}
