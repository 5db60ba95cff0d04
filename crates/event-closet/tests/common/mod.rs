//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_closet::{
    AggregateOptions, EntityId, EntityProjectionOptions, Event, EventCloset,
    GlobalProjectionOptions, InMemoryStorage, NewEvent, Reducer, Rejection, Sequence, Snapshot,
    Storage, StorageError, StoreConfig, reducer,
};
use event_store::{EventStream, Result};
use serde_json::{Value, json};
use tokio::sync::Notify;

/// Installs a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Decision reducer of the `user` aggregate.
pub fn user_decision() -> Reducer {
    reducer(|state, event| {
        let mut state = state.unwrap_or_else(|| json!({"created": false, "renames": 0}));
        match event.event_type.as_str() {
            "created" => state["created"] = json!(true),
            "renamed" => {
                let renames = state["renames"].as_u64().unwrap_or(0);
                state["renames"] = json!(renames + 1);
            }
            _ => {}
        }
        state
    })
}

/// Entity projection keeping the current name of a user.
pub fn user_name() -> Reducer {
    reducer(|state, event| match event.get("name") {
        Some(name) if !event.is_init() => name.clone(),
        _ => state.unwrap_or(Value::Null),
    })
}

/// Global projection counting created users.
pub fn nb_users() -> Reducer {
    reducer(|state, event| {
        let count = state.and_then(|s| s.as_u64()).unwrap_or(0);
        if event.event_type == "created" {
            json!(count + 1)
        } else {
            json!(count)
        }
    })
}

/// Builds a store with the `user` aggregate, its `name` entity projection and
/// the `nbUsers` global projection.
pub fn user_closet(
    storage: Arc<dyn Storage>,
    config: StoreConfig,
    options: GlobalProjectionOptions,
) -> EventCloset {
    init_tracing();
    let mut closet = EventCloset::with_config(storage, config);

    closet
        .register_aggregate("user", user_decision(), AggregateOptions::default())
        .unwrap();
    closet
        .register_command("user", "create", |state, data| {
            if state["created"] == json!(true) {
                return Err(Rejection::new("user already created"));
            }
            Ok(NewEvent::new("created")
                .with("name", data["name"].clone())
                .into())
        })
        .unwrap();
    closet
        .register_command("user", "rename", |state, data| {
            if state["created"] != json!(true) {
                return Err(Rejection::new("user does not exist"));
            }
            Ok(NewEvent::new("renamed")
                .with("name", data["name"].clone())
                .with("renamesBefore", state["renames"].clone())
                .into())
        })
        .unwrap();
    closet
        .register_command("user", "import", |_, data| {
            Ok(vec![
                NewEvent::new("created").with("name", data["name"].clone()),
                NewEvent::new("renamed").with("name", data["alias"].clone()),
                NewEvent::new("renamed").with("name", data["name"].clone()),
            ]
            .into())
        })
        .unwrap();
    closet
        .register_entity_projection("user", "name", user_name(), EntityProjectionOptions::default())
        .unwrap();
    closet
        .register_projection("nbUsers", ["user"], nb_users(), options)
        .unwrap();

    closet
}

/// In-memory store with default configuration.
pub fn memory_closet(config: StoreConfig) -> (InMemoryStorage, EventCloset) {
    let storage = InMemoryStorage::new();
    let closet = user_closet(
        Arc::new(storage.clone()),
        config,
        GlobalProjectionOptions::default(),
    );
    (storage, closet)
}

pub fn stamped(aggregate: &str, id: &str, sequence: u64, event_type: &str) -> Event {
    stamped_at(aggregate, id, sequence, event_type, Utc::now())
}

pub fn stamped_at(
    aggregate: &str,
    id: &str,
    sequence: u64,
    event_type: &str,
    insert_date: DateTime<Utc>,
) -> Event {
    NewEvent::new(event_type).stamp(
        aggregate,
        EntityId::from(id),
        Sequence::new(sequence),
        insert_date,
    )
}

/// Gates of a paused log scan.
pub struct ScanGate {
    /// Notified once the scan has read the log and is waiting.
    pub paused: Arc<Notify>,
    /// Notify to let the scan continue.
    pub release: Arc<Notify>,
}

/// Storage double failing or stalling chosen operations.
#[derive(Clone, Default)]
pub struct FlakyStorage {
    pub inner: InMemoryStorage,
    appends_left: Arc<Mutex<Option<u64>>>,
    fail_snapshot_writes: Arc<AtomicBool>,
    fail_projection_writes: Arc<AtomicBool>,
    held: Arc<Mutex<HashMap<EntityId, Arc<Notify>>>>,
    held_scan: Arc<Mutex<Option<(Arc<Notify>, Arc<Notify>)>>>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `count` more appends through, then fails every append.
    pub fn fail_appends_after(&self, count: u64) {
        *self.appends_left.lock().unwrap() = Some(count);
    }

    pub fn allow_appends(&self) {
        *self.appends_left.lock().unwrap() = None;
    }

    pub fn fail_snapshot_writes(&self, fail: bool) {
        self.fail_snapshot_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_projection_writes(&self, fail: bool) {
        self.fail_projection_writes.store(fail, Ordering::SeqCst);
    }

    /// Stalls the next append for `id` until the returned gate is notified.
    pub fn hold_next_append(&self, id: &EntityId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.held
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::clone(&gate));
        gate
    }

    /// Pauses the next full log scan right after it has read the log.
    pub fn hold_next_scan(&self) -> ScanGate {
        let paused = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.held_scan.lock().unwrap() = Some((Arc::clone(&paused), Arc::clone(&release)));
        ScanGate { paused, release }
    }
}

fn unavailable(operation: &str) -> StorageError {
    StorageError::Unavailable(format!("{operation} failed"))
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn store_event(&self, event: &Event) -> Result<()> {
        let gate = self.held.lock().unwrap().remove(&event.id);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        {
            let mut left = self.appends_left.lock().unwrap();
            match left.as_mut() {
                Some(0) => return Err(unavailable("append")),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.inner.store_event(event).await
    }

    async fn get_events(
        &self,
        aggregate: &str,
        id: &EntityId,
        from: Sequence,
    ) -> Result<EventStream> {
        self.inner.get_events(aggregate, id, from).await
    }

    async fn get_all_events(&self) -> Result<EventStream> {
        let events = self.inner.get_all_events().await?;
        let held = self.held_scan.lock().unwrap().take();
        if let Some((paused, release)) = held {
            paused.notify_one();
            release.notified().await;
        }
        Ok(events)
    }

    async fn store_projection(&self, name: &str, state: &Value) -> Result<()> {
        if self.fail_projection_writes.load(Ordering::SeqCst) {
            return Err(unavailable("projection write"));
        }
        self.inner.store_projection(name, state).await
    }

    async fn get_projection(&self, name: &str) -> Result<Option<Value>> {
        self.inner.get_projection(name).await
    }

    async fn store_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        projection: &str,
        snapshot: &Snapshot,
    ) -> Result<()> {
        if self.fail_snapshot_writes.load(Ordering::SeqCst) {
            return Err(unavailable("snapshot write"));
        }
        self.inner
            .store_snapshot(aggregate, id, projection, snapshot)
            .await
    }

    async fn get_snapshot(
        &self,
        aggregate: &str,
        id: &EntityId,
        projection: &str,
    ) -> Result<Option<Snapshot>> {
        self.inner.get_snapshot(aggregate, id, projection).await
    }
}
