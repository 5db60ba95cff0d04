//! Snapshot policy and registration options.

use std::num::NonZeroU64;

use event_store::Version;

/// How often an entity projection checkpoints its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotPolicy {
    /// Never snapshot; every read replays the entity's full history.
    #[default]
    Disabled,
    /// Snapshot every N applied events.
    Every(NonZeroU64),
}

impl SnapshotPolicy {
    /// Creates a policy from a raw interval; 0 disables snapshotting.
    pub fn every(interval: u64) -> Self {
        NonZeroU64::new(interval).map_or(SnapshotPolicy::Disabled, SnapshotPolicy::Every)
    }

    /// Returns the interval, if snapshotting is enabled.
    pub fn interval(&self) -> Option<u64> {
        match self {
            SnapshotPolicy::Disabled => None,
            SnapshotPolicy::Every(n) => Some(n.get()),
        }
    }

    /// Returns true if snapshots are taken.
    pub fn is_enabled(&self) -> bool {
        matches!(self, SnapshotPolicy::Every(_))
    }

    /// Returns true if a state reaching `version` crosses a checkpoint boundary.
    pub fn is_boundary(&self, version: Version) -> bool {
        match self {
            SnapshotPolicy::Disabled => false,
            SnapshotPolicy::Every(n) => version.as_u64() > 0 && version.as_u64() % n.get() == 0,
        }
    }

    /// Returns true if a state at `version` is worth persisting after a rebuild.
    pub fn qualifies(&self, version: Version) -> bool {
        match self {
            SnapshotPolicy::Disabled => false,
            SnapshotPolicy::Every(n) => version.as_u64() >= n.get(),
        }
    }

    /// Resolves a registration override against the inherited policy.
    ///
    /// Only an explicitly supplied override replaces the inherited value; an
    /// explicit `Disabled` stays disabled.
    pub fn resolve(overridden: Option<SnapshotPolicy>, inherited: SnapshotPolicy) -> Self {
        overridden.unwrap_or(inherited)
    }
}

/// Options for registering an aggregate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateOptions {
    /// Snapshot policy for the decision projection and the default for the
    /// aggregate's entity projections. `None` inherits the store default.
    pub snapshots: Option<SnapshotPolicy>,
}

impl AggregateOptions {
    /// Snapshot every `interval` events.
    pub fn snapshot_every(interval: u64) -> Self {
        Self {
            snapshots: Some(SnapshotPolicy::every(interval)),
        }
    }

    /// Explicitly disable snapshots, whatever the store default is.
    pub fn without_snapshots() -> Self {
        Self {
            snapshots: Some(SnapshotPolicy::Disabled),
        }
    }
}

/// Options for registering an entity projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityProjectionOptions {
    /// Snapshot policy; `None` inherits the aggregate's policy.
    pub snapshots: Option<SnapshotPolicy>,
}

impl EntityProjectionOptions {
    /// Snapshot every `interval` events.
    pub fn snapshot_every(interval: u64) -> Self {
        Self {
            snapshots: Some(SnapshotPolicy::every(interval)),
        }
    }

    /// Explicitly disable snapshots, whatever the aggregate default is.
    pub fn without_snapshots() -> Self {
        Self {
            snapshots: Some(SnapshotPolicy::Disabled),
        }
    }
}
