//! Event buffer and inbound queue
//!
//! The [`EventBuffer`] is the bounded, priority-aware inbox read by the next
//! reasoning cycle. The [`EventInbox`] is the non-blocking hand-off between
//! producers (bus handlers, completion forwarder, external callers) and the
//! tick loop.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use wayfarer_common::Priority;

/// Event names produced inside the core
pub mod names {
    pub const ENTITY_APPEAR: &str = "entity_appear";
    pub const ENTITY_LEAVE: &str = "entity_leave";
    pub const DAMAGE: &str = "damage";
    pub const BEHAVIOR_END: &str = "behavior_end";
}

/// One buffered event; immutable once pushed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedEvent {
    pub name: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub tick_id: u64,
    pub timestamp: DateTime<Utc>,
}

impl BufferedEvent {
    /// Compact one-line rendering for prompts and episode summaries
    pub fn describe(&self) -> String {
        if self.payload.is_null() {
            format!("[{}] {}", self.priority, self.name)
        } else {
            format!("[{}] {} {}", self.priority, self.name, self.payload)
        }
    }
}

/// Bounded priority-aware event buffer
///
/// Overflow policy when full: drop the first Low entry, else the first
/// Normal entry, else (incoming Urgent only) the oldest entry. Otherwise the
/// incoming event is discarded.
pub struct EventBuffer {
    events: Mutex<VecDeque<BufferedEvent>>,
    capacity: usize,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Push with tick id 0
    pub fn push(&self, name: impl Into<String>, payload: serde_json::Value, priority: Priority) -> bool {
        self.push_at(name, payload, priority, 0)
    }

    /// Push an event stamped with a tick id. Returns false if it was discarded.
    pub fn push_at(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
        tick_id: u64,
    ) -> bool {
        let event = BufferedEvent {
            name: name.into(),
            payload,
            priority,
            tick_id,
            timestamp: Utc::now(),
        };

        let mut events = self.events.lock();
        if events.len() >= self.capacity && !Self::make_room(&mut events, priority) {
            debug!(event = %event.name, %priority, "event buffer full, discarding incoming event");
            return false;
        }
        events.push_back(event);
        true
    }

    fn make_room(events: &mut VecDeque<BufferedEvent>, incoming: Priority) -> bool {
        for victim in [Priority::Low, Priority::Normal] {
            if let Some(idx) = events.iter().position(|e| e.priority == victim) {
                if let Some(dropped) = events.remove(idx) {
                    debug!(event = %dropped.name, priority = %victim, "event buffer evicted entry");
                }
                return true;
            }
        }
        if incoming == Priority::Urgent {
            if let Some(dropped) = events.pop_front() {
                debug!(event = %dropped.name, "event buffer evicted oldest urgent entry");
            }
            return true;
        }
        false
    }

    /// Empty the buffer, returning events in insertion order
    pub fn drain_all(&self) -> Vec<BufferedEvent> {
        self.events.lock().drain(..).collect()
    }

    pub fn has_urgent(&self) -> bool {
        self.events.lock().iter().any(|e| e.priority == Priority::Urgent)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Event waiting in the inbound queue
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub name: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
}

impl InboundEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value, priority: Priority) -> Self {
        Self {
            name: name.into(),
            payload,
            priority,
        }
    }
}

/// Best-effort bounded queue between producers and the tick loop
///
/// `try_push` never blocks. On a full queue an Urgent event evicts one
/// queued item (the oldest non-urgent one, else the oldest) and is
/// admitted; anything else is dropped.
pub struct EventInbox {
    queue: Mutex<VecDeque<InboundEvent>>,
    capacity: usize,
}

impl EventInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn try_push(&self, event: InboundEvent) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() < self.capacity {
            queue.push_back(event);
            return true;
        }
        if event.priority != Priority::Urgent {
            debug!(event = %event.name, "inbox full, dropping event");
            return false;
        }
        let victim = queue
            .iter()
            .position(|e| e.priority != Priority::Urgent)
            .unwrap_or(0);
        if let Some(dropped) = queue.remove(victim) {
            debug!(event = %dropped.name, "inbox full, evicted for urgent event");
        }
        queue.push_back(event);
        true
    }

    /// Take everything queued, in arrival order
    pub fn drain(&self) -> Vec<InboundEvent> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
