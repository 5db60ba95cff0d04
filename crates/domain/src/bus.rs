//! In-process publish/subscribe channel for stamped events.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use event_store::Event;
use serde_json::Value;

/// Bus topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Notifications for events that were just appended.
    Live,
    /// Historical notifications; never trigger live side effects.
    Replay,
}

impl Topic {
    /// Returns the topic name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Live => "event",
            Topic::Replay => "event-replay",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// Synchronous observer list per topic.
///
/// `emit` calls every subscriber of the topic in subscription order, on the
/// caller's task, before returning. Subscribers that need to do I/O must
/// hand the event off (e.g. to a [`SerialQueue`](crate::SerialQueue)).
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Topic, Subscriber)>>,
}

impl EventBus {
    /// Creates a bus without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for one topic.
    pub fn subscribe<F>(&self, topic: Topic, subscriber: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, topic, Arc::new(subscriber)));
        id
    }

    /// Removes a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _, _)| *sub_id != id);
        subscribers.len() != before
    }

    /// Delivers an event to every subscriber of the topic, in order.
    pub fn emit(&self, topic: Topic, event: &Event) {
        // Snapshot the list so subscribers may (un)subscribe while being called
        let targets: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, sub_topic, _)| *sub_topic == topic)
            .map(|(_, _, subscriber)| Arc::clone(subscriber))
            .collect();

        for subscriber in targets {
            subscriber(event);
        }
    }

    /// Returns the number of subscribers of a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, sub_topic, _)| *sub_topic == topic)
            .count()
    }
}

/// Whether external listeners see the `sequence` and `insertDate` bookkeeping fields.
///
/// Internal subscribers (snapshot triggers, global projections) always see
/// the stamped event, and `handle_command` always returns stamped events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InternalFields {
    /// Deliver the full stamped event.
    #[default]
    Expose,
    /// Remove `sequence` and `insertDate` before delivery.
    Strip,
}

impl InternalFields {
    /// Renders an event as delivered to external listeners.
    pub fn render(&self, event: &Event) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(event)?;
        if let (InternalFields::Strip, Value::Object(fields)) = (self, &mut value) {
            fields.remove("sequence");
            fields.remove("insertDate");
        }
        Ok(value)
    }
}

impl FromStr for InternalFields {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expose" => Ok(InternalFields::Expose),
            "strip" => Ok(InternalFields::Strip),
            other => Err(format!("unknown internal fields policy: {other}")),
        }
    }
}
