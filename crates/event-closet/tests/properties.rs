//! Behavioral guarantees of command handling, snapshots and rebuild.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use common::{FlakyStorage, memory_closet, stamped_at, user_closet};
use event_closet::{
    EntityId, EventCloset, GlobalProjectionOptions, InMemoryStorage, StoreConfig, reducer,
};
use event_store::StorageExt;
use futures_util::future::join_all;
use serde_json::json;

#[tokio::test]
async fn sequencing_has_no_gaps_across_commands() {
    let (storage, closet) = memory_closet(StoreConfig::default());
    let id = EntityId::from("u1");

    closet
        .handle_command("user", &id, "create", json!({"name": "Ann"}))
        .await
        .unwrap();
    closet
        .handle_command("user", &id, "import", json!({"name": "Ann", "alias": "A"}))
        .await
        .unwrap();
    for name in ["Bob", "Cid"] {
        closet
            .handle_command("user", &id, "rename", json!({"name": name}))
            .await
            .unwrap();
    }

    let sequences: Vec<u64> = storage
        .events_for("user", &id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.sequence.as_u64())
        .collect();
    assert_eq!(sequences, (0..6).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commands_on_one_entity_are_serialized() {
    let (storage, closet) = memory_closet(StoreConfig::default());
    let closet = Arc::new(closet);
    let id = EntityId::from("u1");
    closet
        .handle_command("user", &id, "create", json!({"name": "Ann"}))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|n| {
            let closet = Arc::clone(&closet);
            let id = id.clone();
            tokio::spawn(async move {
                closet
                    .handle_command("user", &id, "rename", json!({"name": n}))
                    .await
            })
        })
        .collect();
    for task in join_all(tasks).await {
        task.unwrap().unwrap();
    }

    // Each rename saw every earlier rename as history
    let events = storage.events_for("user", &id).await.unwrap();
    for event in &events[1..] {
        assert_eq!(
            event.get("renamesBefore"),
            Some(&json!(event.sequence.as_u64() - 1))
        );
    }
    assert_eq!(events.len(), 9);
}

#[tokio::test]
async fn failing_commands_do_not_affect_other_entities() {
    let (storage, closet) = memory_closet(StoreConfig::default());
    let a = EntityId::from("a");
    let b = EntityId::from("b");
    closet
        .handle_command("user", &b, "create", json!({"name": "B"}))
        .await
        .unwrap();

    let commands = (0..5).flat_map(|n| {
        [
            closet.handle_command("user", &a, "rename", json!({"name": n})),
            closet.handle_command("user", &b, "rename", json!({"name": n})),
        ]
    });
    let results = join_all(commands).await;

    for (index, result) in results.iter().enumerate() {
        assert_eq!(result.is_ok(), index % 2 == 1, "result {index}: {result:?}");
    }
    assert_eq!(storage.events_for("user", &a).await.unwrap().len(), 0);
    let sequences: Vec<u64> = storage
        .events_for("user", &b)
        .await
        .unwrap()
        .iter()
        .map(|e| e.sequence.as_u64())
        .collect();
    assert_eq!(sequences, (0..6).collect::<Vec<_>>());
}

#[tokio::test]
async fn stalled_entity_does_not_block_other_entities() {
    let storage = FlakyStorage::new();
    let closet = Arc::new(user_closet(
        Arc::new(storage.clone()),
        StoreConfig::default(),
        GlobalProjectionOptions::default(),
    ));
    let a = EntityId::from("a");
    let b = EntityId::from("b");
    let gate = storage.hold_next_append(&a);

    let stalled = {
        let closet = Arc::clone(&closet);
        let a = a.clone();
        tokio::spawn(async move {
            closet
                .handle_command("user", &a, "create", json!({"name": "A"}))
                .await
        })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        closet
            .handle_command("user", &b, "create", json!({"name": "B"}))
            .await
            .unwrap();
        closet
            .handle_command("user", &b, "rename", json!({"name": "Bee"}))
            .await
            .unwrap();
    })
    .await
    .expect("entity b was blocked by entity a");
    assert!(!stalled.is_finished());

    gate.notify_one();
    stalled.await.unwrap().unwrap();
    assert_eq!(storage.inner.events_for("user", &a).await.unwrap().len(), 1);
}

#[tokio::test]
async fn snapshots_do_not_change_entity_state() {
    let storage = InMemoryStorage::new();
    let id = EntityId::from("u1");
    {
        let writer = user_closet(
            Arc::new(storage.clone()),
            StoreConfig::default(),
            GlobalProjectionOptions::default(),
        );
        writer
            .handle_command("user", &id, "import", json!({"name": "Ann", "alias": "A"}))
            .await
            .unwrap();
        for name in ["Bob", "Cid", "Dan", "Eve"] {
            writer
                .handle_command("user", &id, "rename", json!({"name": name}))
                .await
                .unwrap();
        }
    }

    let plain = user_closet(
        Arc::new(storage.clone()),
        StoreConfig::default(),
        GlobalProjectionOptions::default(),
    );
    let expected_name = plain.get_entity_projection("user", &id, "name").await.unwrap();
    let expected_decision = plain
        .get_entity_projection("user", &id, event_closet::DECISION_PROJECTION)
        .await
        .unwrap();

    for interval in 1..=8 {
        let snapshotted = user_closet(
            Arc::new(storage.clone()),
            StoreConfig::default().with_snapshot_every(interval),
            GlobalProjectionOptions::default(),
        );
        snapshotted
            .store_entity_snapshot("user", &id, "name")
            .await
            .unwrap();
        snapshotted.rebuild().await.unwrap();

        assert_eq!(
            snapshotted.get_entity_projection("user", &id, "name").await.unwrap(),
            expected_name,
            "interval {interval}"
        );
        assert_eq!(
            snapshotted
                .get_entity_projection("user", &id, event_closet::DECISION_PROJECTION)
                .await
                .unwrap(),
            expected_decision,
            "interval {interval}"
        );
    }
}

async fn populated(config: StoreConfig) -> (InMemoryStorage, EventCloset) {
    let (storage, closet) = memory_closet(config);
    for (id, name) in [("u1", "Ann"), ("u2", "Bob"), ("u3", "Cid")] {
        closet
            .handle_command("user", &EntityId::from(id), "create", json!({"name": name}))
            .await
            .unwrap();
    }
    closet
        .handle_command("user", &EntityId::from("u1"), "rename", json!({"name": "Anna"}))
        .await
        .unwrap();
    closet
        .handle_command(
            "user",
            &EntityId::from("u4"),
            "import",
            json!({"name": "Dee", "alias": "D"}),
        )
        .await
        .unwrap();
    (storage, closet)
}

#[tokio::test]
async fn rebuild_twice_yields_identical_rows() {
    let (storage, closet) = populated(StoreConfig::default().with_snapshot_every(2)).await;

    let first = closet.rebuild().await.unwrap();
    let projections = storage.projections().await;
    let snapshots = storage.snapshots().await;

    let second = closet.rebuild().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.events, 7);
    assert_eq!(storage.projections().await, projections);
    assert_eq!(storage.snapshots().await, snapshots);
}

#[tokio::test]
async fn rebuild_matches_live_global_state() {
    let (storage, closet) = populated(StoreConfig::default()).await;
    let live = closet.get_projection("nbUsers").await.unwrap();

    // A fresh store over the same log, which never saw a live event
    let replayed = user_closet(
        Arc::new(InMemoryStorage::with_events(storage.all_events().await.unwrap())),
        StoreConfig::default(),
        GlobalProjectionOptions::default(),
    );
    assert_eq!(replayed.get_projection("nbUsers").await.unwrap(), json!(0));

    replayed.rebuild().await.unwrap();

    assert_eq!(live, json!(4));
    assert_eq!(replayed.get_projection("nbUsers").await.unwrap(), live);
}

#[tokio::test]
async fn rebuild_does_not_notify_live_listeners() {
    let changes = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&changes);
    let storage = InMemoryStorage::new();
    let closet = user_closet(
        Arc::new(storage.clone()),
        StoreConfig::default(),
        GlobalProjectionOptions::on_change(move |_, _| *counter.lock().unwrap() += 1),
    );
    let listened = Arc::new(Mutex::new(0));
    let listener = Arc::clone(&listened);
    closet.on_event(move |_| *listener.lock().unwrap() += 1);

    closet
        .handle_command("user", &EntityId::from("u1"), "create", json!({"name": "Ann"}))
        .await
        .unwrap();
    closet.get_projection("nbUsers").await.unwrap();
    closet.rebuild().await.unwrap();
    closet.get_projection("nbUsers").await.unwrap();

    assert_eq!(*changes.lock().unwrap(), 1);
    assert_eq!(*listened.lock().unwrap(), 1);
}

#[tokio::test]
async fn rebuild_follows_global_insertion_order() {
    let t0 = Utc::now();
    let at = |seconds| t0 + chrono::Duration::seconds(seconds);
    // Appended out of global order: u2 was created first
    let log = vec![
        stamped_at("user", "u1", 0, "created", at(1)),
        stamped_at("user", "u1", 1, "renamed", at(2)),
        stamped_at("user", "u2", 0, "created", at(0)),
    ];
    let storage = InMemoryStorage::with_events(log);
    let mut closet = user_closet(
        Arc::new(storage.clone()),
        StoreConfig::default().with_snapshot_every(1),
        GlobalProjectionOptions::default(),
    );
    closet
        .register_projection(
            "creationOrder",
            ["user"],
            reducer(|state, event| {
                let mut ids = state.unwrap_or_else(|| json!([]));
                if event.event_type == "created"
                    && let Some(ids) = ids.as_array_mut()
                {
                    ids.push(json!(event.id));
                }
                ids
            }),
            GlobalProjectionOptions::default(),
        )
        .unwrap();

    let stats = closet.rebuild().await.unwrap();

    assert_eq!(stats.events, 3);
    assert_eq!(
        closet.get_projection("creationOrder").await.unwrap(),
        json!(["u2", "u1"])
    );
    assert_eq!(closet.get_projection("nbUsers").await.unwrap(), json!(2));
    let snapshot = closet
        .get_entity_snapshot("user", &EntityId::from("u1"), event_closet::DECISION_PROJECTION)
        .await
        .unwrap();
    assert_eq!(snapshot.version, event_closet::Version::new(2));
    assert_eq!(snapshot.state, json!({"created": true, "renames": 1}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commands_during_rebuild_are_kept_in_global_projections() {
    let storage = FlakyStorage::new();
    let closet = Arc::new(user_closet(
        Arc::new(storage.clone()),
        StoreConfig::default(),
        GlobalProjectionOptions::default(),
    ));
    closet
        .handle_command("user", &EntityId::from("u1"), "create", json!({"name": "Ann"}))
        .await
        .unwrap();
    closet.get_projection("nbUsers").await.unwrap();

    let gate = storage.hold_next_scan();
    let rebuild = {
        let closet = Arc::clone(&closet);
        tokio::spawn(async move { closet.rebuild().await })
    };
    gate.paused.notified().await;

    let command = {
        let closet = Arc::clone(&closet);
        tokio::spawn(async move {
            closet
                .handle_command("user", &EntityId::from("u2"), "create", json!({"name": "Bob"}))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!command.is_finished(), "command ran while the log was being replayed");

    gate.release.notify_one();
    let stats = rebuild.await.unwrap().unwrap();
    command.await.unwrap().unwrap();

    assert_eq!(stats.events, 1);
    assert_eq!(storage.inner.all_events().await.unwrap().len(), 2);
    assert_eq!(closet.get_projection("nbUsers").await.unwrap(), json!(2));
}
