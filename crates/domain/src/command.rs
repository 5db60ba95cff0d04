//! Command handlers and their outcomes.

use std::sync::Arc;

use event_store::NewEvent;
use serde_json::Value;
use thiserror::Error;

/// A domain-level refusal of a command.
///
/// Returned by a command handler when the decision state does not allow the
/// command. Nothing is persisted or published for a rejected command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Rejection {
    message: String,
}

impl Rejection {
    /// Creates a rejection with a human readable reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the rejection reason.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One event or an ordered list of events.
///
/// The shape a command handler returns is preserved in the result of
/// `handle_command`: a single event stays single, a list stays a list.
#[derive(Debug, Clone, PartialEq)]
pub enum Emitted<T> {
    /// Exactly one event.
    One(T),
    /// An ordered, possibly empty, list of events.
    Many(Vec<T>),
}

impl<T> Emitted<T> {
    /// Maps every event, preserving the shape.
    pub fn map<U, F>(self, mut f: F) -> Emitted<U>
    where
        F: FnMut(T) -> U,
    {
        match self {
            Emitted::One(event) => Emitted::One(f(event)),
            Emitted::Many(events) => Emitted::Many(events.into_iter().map(f).collect()),
        }
    }

    /// Returns the events as a slice.
    pub fn as_slice(&self) -> &[T] {
        match self {
            Emitted::One(event) => std::slice::from_ref(event),
            Emitted::Many(events) => events,
        }
    }

    /// Iterates the events in order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Returns true for an empty list.
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Flattens into a vector.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Emitted::One(event) => vec![event],
            Emitted::Many(events) => events,
        }
    }
}

impl<T> IntoIterator for Emitted<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

impl From<NewEvent> for Emitted<NewEvent> {
    fn from(event: NewEvent) -> Self {
        Emitted::One(event)
    }
}

impl From<Vec<NewEvent>> for Emitted<NewEvent> {
    fn from(events: Vec<NewEvent>) -> Self {
        Emitted::Many(events)
    }
}

/// Decides which events a command produces.
///
/// Called with the decision state of the target entity and the command
/// payload. Must be pure; the result is stamped and persisted by the aggregate.
pub type CommandHandler =
    Arc<dyn Fn(&Value, &Value) -> Result<Emitted<NewEvent>, Rejection> + Send + Sync>;
