//! In-process publish/subscribe bus
//!
//! Topic-keyed handler lists. Handlers run synchronously on the publisher's
//! thread, each behind its own panic boundary.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error};

use crate::domain::events::InboundEvent;

pub type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct EventBus {
    topics: DashMap<String, Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let topic = topic.into();
        debug!(topic = %topic, subscription = id.0, "subscribed");
        self.topics
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut entry in self.topics.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|(sid, _)| *sid != id);
            removed |= entry.value().len() != before;
        }
        self.topics.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    /// Deliver to every handler registered on the event's topic.
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: &InboundEvent) -> usize {
        // snapshot so handlers may (un)subscribe without deadlocking the shard
        let handlers: Vec<(SubscriptionId, Handler)> = match self.topics.get(&event.name) {
            Some(entry) => entry.value().clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic".to_string());
                    error!(
                        topic = %event.name,
                        subscription = id.0,
                        panic = %message,
                        "event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|e| e.value().len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use wayfarer_common::Priority;

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("damage", |_| panic!("boom"));
        let sink = seen.clone();
        bus.subscribe("damage", move |e: &InboundEvent| sink.lock().push(e.payload.clone()));

        let delivered = bus.publish(&InboundEvent::new("damage", json!({"amount": 1}), Priority::Urgent));
        assert_eq!(delivered, 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_topics_and_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = bus.subscribe("entity_appear", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(&InboundEvent::new("entity_leave", json!(null), Priority::Low)), 0);
        bus.publish(&InboundEvent::new("entity_appear", json!(null), Priority::Normal));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&InboundEvent::new("entity_appear", json!(null), Priority::Normal));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("entity_appear"), 0);
    }
}
