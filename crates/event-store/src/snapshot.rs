use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::Version;

/// A checkpoint of an entity projection's state.
///
/// Snapshots are keyed by `(aggregate, id, projection name)` and only ever
/// act as a cache: replaying the entity's events `0..version` through the
/// projection's reducer from its zero-state must yield `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of events folded into `state`.
    pub version: Version,

    /// The folded projection state.
    pub state: Value,
}

impl Snapshot {
    /// Creates a new snapshot.
    pub fn new(version: Version, state: Value) -> Self {
        Self { version, state }
    }

    /// Creates the snapshot of an entity without history.
    pub fn initial(zero_state: Value) -> Self {
        Self {
            version: Version::initial(),
            state: zero_state,
        }
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}
