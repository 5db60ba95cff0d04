//! Replay of the full event log into derived state.

use async_trait::async_trait;
use event_store::Event;

use crate::error::Result;

/// Consumer of a full-log replay.
///
/// A replayer receives every event of the log in global order through
/// [`handle_event`](Replayer::handle_event), accumulating state in memory,
/// and persists what it built once in [`finalize`](Replayer::finalize).
#[async_trait]
pub trait Replayer: Send {
    /// Name of the projection being rebuilt.
    fn name(&self) -> &str;

    /// Folds one event. Events of other aggregates must be ignored.
    fn handle_event(&mut self, event: &Event);

    /// Persists the accumulated state.
    async fn finalize(self: Box<Self>) -> Result<()>;
}
