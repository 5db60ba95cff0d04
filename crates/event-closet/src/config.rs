//! Store configuration loaded from environment variables.

use domain::{InternalFields, SnapshotPolicy};

/// Environment variable holding the default snapshot interval.
pub const SNAPSHOT_EVERY_VAR: &str = "EVENT_CLOSET_SNAPSHOT_EVERY";

/// Environment variable holding the internal fields policy.
pub const INTERNAL_FIELDS_VAR: &str = "EVENT_CLOSET_INTERNAL_FIELDS";

/// Store-wide defaults.
///
/// Reads from environment variables:
/// - `EVENT_CLOSET_SNAPSHOT_EVERY`: default snapshot interval (default: `0`, disabled)
/// - `EVENT_CLOSET_INTERNAL_FIELDS`: `expose` or `strip` (default: `expose`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreConfig {
    /// Snapshot policy inherited by aggregates registered without one.
    pub snapshot_every: SnapshotPolicy,
    /// Whether `on_event` listeners see `sequence` and `insertDate`.
    pub internal_fields: InternalFields,
}

impl StoreConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// Unparseable values are logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let snapshot_every = match lookup(SNAPSHOT_EVERY_VAR) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(interval) => SnapshotPolicy::every(interval),
                Err(err) => {
                    tracing::warn!(value = %raw, error = %err, "invalid {SNAPSHOT_EVERY_VAR}, snapshots disabled");
                    defaults.snapshot_every
                }
            },
            None => defaults.snapshot_every,
        };

        let internal_fields = match lookup(INTERNAL_FIELDS_VAR) {
            Some(raw) => raw.parse::<InternalFields>().unwrap_or_else(|err: String| {
                tracing::warn!(error = %err, "invalid {INTERNAL_FIELDS_VAR}, exposing internal fields");
                defaults.internal_fields
            }),
            None => defaults.internal_fields,
        };

        Self {
            snapshot_every,
            internal_fields,
        }
    }

    /// Sets the default snapshot interval; 0 disables snapshots.
    pub fn with_snapshot_every(mut self, interval: u64) -> Self {
        self.snapshot_every = SnapshotPolicy::every(interval);
        self
    }

    /// Sets the internal fields policy.
    pub fn with_internal_fields(mut self, internal_fields: InternalFields) -> Self {
        self.internal_fields = internal_fields;
        self
    }
}
