use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::EntityId;

/// Event type of the initialization marker.
///
/// Reducers receive an event of this type together with an absent state
/// and must answer with their zero-state. Commands can never emit it.
pub const INIT_EVENT_TYPE: &str = "@@event-closet/INIT";

/// Field names owned by the event envelope. Payload keys with these names
/// are dropped when an event is stamped.
const ENVELOPE_FIELDS: [&str; 5] = ["aggregate", "id", "type", "sequence", "insertDate"];

static INIT_EVENT: LazyLock<Event> = LazyLock::new(|| Event {
    aggregate: String::new(),
    id: EntityId::new(""),
    event_type: INIT_EVENT_TYPE.to_string(),
    payload: Map::new(),
    sequence: Sequence::first(),
    insert_date: DateTime::UNIX_EPOCH,
});

/// Position of an event within the stream of one `(aggregate, id)` pair.
///
/// The first event of an entity carries sequence 0; every following event
/// carries the previous sequence plus one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(u64);

impl Sequence {
    /// Creates a sequence from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the sequence of the first event of an entity (0).
    pub fn first() -> Self {
        Self(0)
    }

    /// Returns the next sequence.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the version of a state once this event has been folded in.
    pub fn version_after(&self) -> Version {
        Version(self.0 + 1)
    }

    /// Returns the raw sequence value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Sequence {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Number of events folded into a projection state.
///
/// A state at version `v` has seen sequences `0..v`; the next event appended
/// for that entity receives `Sequence(v)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the version of a state that has not folded any event.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the sequence the next event folded into this state will carry.
    pub fn next_sequence(&self) -> Sequence {
        Sequence(self.0)
    }

    /// Returns the raw version value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// An event as returned by a command handler, before the system stamps it.
///
/// Serializes as `{"type": ..., ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Domain tag of the event (e.g. `"created"`).
    #[serde(rename = "type")]
    pub event_type: String,

    /// Domain payload fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl NewEvent {
    /// Creates an event of the given type with an empty payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Map::new(),
        }
    }

    /// Adds a payload field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replaces the payload with the fields of a serializable value.
    ///
    /// Values that do not serialize to a JSON object are stored under `"data"`.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = match serde_json::to_value(payload)? {
            Value::Object(fields) => fields,
            other => Map::from_iter([("data".to_string(), other)]),
        };
        Ok(self)
    }

    /// Stamps the event with its envelope fields.
    pub fn stamp(
        self,
        aggregate: impl Into<String>,
        id: EntityId,
        sequence: Sequence,
        insert_date: DateTime<Utc>,
    ) -> Event {
        let mut payload = self.payload;
        payload.retain(|key, _| !ENVELOPE_FIELDS.contains(&key.as_str()));
        Event {
            aggregate: aggregate.into(),
            id,
            event_type: self.event_type,
            payload,
            sequence,
            insert_date,
        }
    }
}

/// An immutable, sequenced fact belonging to one `(aggregate, id)` pair.
///
/// Serializes as `{"aggregate", "id", "type", ...payload, "sequence", "insertDate"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// The aggregate type this event belongs to (e.g. `"user"`).
    pub aggregate: String,

    /// The entity this event belongs to.
    pub id: EntityId,

    /// Domain tag of the event.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Domain payload fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,

    /// Position within the entity's stream, assigned by the system.
    pub sequence: Sequence,

    /// When the event was stamped; primary key of the global order.
    pub insert_date: DateTime<Utc>,
}

impl Event {
    /// Returns the initialization marker handed to reducers to obtain their zero-state.
    pub fn init() -> &'static Event {
        &INIT_EVENT
    }

    /// Returns true for the initialization marker.
    pub fn is_init(&self) -> bool {
        self.event_type == INIT_EVENT_TYPE
    }

    /// Returns a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Returns true if the event belongs to the given aggregate type.
    pub fn belongs_to(&self, aggregate: &str) -> bool {
        self.aggregate == aggregate
    }
}
