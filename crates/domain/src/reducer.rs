//! Reducers and the initialization marker convention.
//!
//! A reducer folds one event into a state. Called with no state and the
//! initialization marker ([`Event::init`]) it must return its zero-state;
//! that is the only way "no history yet" is represented.

use std::sync::Arc;

use event_store::{Event, Snapshot};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

/// A pure, deterministic fold step over dynamic state.
pub type Reducer = Arc<dyn Fn(Option<Value>, &Event) -> Value + Send + Sync>;

/// Wraps a closure into a [`Reducer`].
pub fn reducer<F>(f: F) -> Reducer
where
    F: Fn(Option<Value>, &Event) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Builds a [`Reducer`] over a concrete state type.
///
/// The zero-state is `S::default()`; the initialization marker never reaches `f`.
pub fn typed<S, F>(f: F) -> Reducer
where
    S: Default + Serialize + DeserializeOwned + 'static,
    F: Fn(S, &Event) -> S + Send + Sync + 'static,
{
    Arc::new(move |state: Option<Value>, event: &Event| {
        let current = match state {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "state does not match reducer type, using default");
                S::default()
            }),
            None => S::default(),
        };
        let next = if event.is_init() {
            current
        } else {
            f(current, event)
        };
        serde_json::to_value(next).unwrap_or_else(|err| {
            tracing::error!(error = %err, "reducer state failed to serialize");
            Value::Null
        })
    })
}

/// Returns the zero-state of a reducer.
pub fn zero_state(reducer: &Reducer) -> Value {
    reducer(None, Event::init())
}

/// Folds one event into a snapshot, advancing its version.
pub(crate) fn fold(reducer: &Reducer, snapshot: &mut Snapshot, event: &Event) {
    let state = std::mem::take(&mut snapshot.state);
    snapshot.state = reducer(Some(state), event);
    snapshot.version = event.sequence.version_after();
}
