//! Perception diffing
//!
//! Compares consecutive world snapshots and reports what changed.

use std::collections::HashSet;

use serde_json::json;

use wayfarer_common::{EntitySnapshot, Priority, Snapshot, Vec3};

use super::events::names;

const HEALTH_EPSILON: f32 = 1e-4;

/// One change between two snapshots
#[derive(Debug, Clone, PartialEq)]
pub enum PerceptionEvent {
    Appear(EntitySnapshot),
    Leave {
        id: i64,
        name: String,
        last_position: Vec3,
    },
    Damage {
        amount: f32,
        new_hp: f32,
    },
}

impl PerceptionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PerceptionEvent::Appear(_) => names::ENTITY_APPEAR,
            PerceptionEvent::Leave { .. } => names::ENTITY_LEAVE,
            PerceptionEvent::Damage { .. } => names::DAMAGE,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            PerceptionEvent::Appear(_) => Priority::Normal,
            PerceptionEvent::Leave { .. } => Priority::Low,
            PerceptionEvent::Damage { .. } => Priority::Urgent,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            PerceptionEvent::Appear(e) => json!({
                "id": e.id,
                "name": e.name,
                "kind": e.kind,
                "position": e.position,
            }),
            PerceptionEvent::Leave {
                id,
                name,
                last_position,
            } => json!({
                "id": id,
                "name": name,
                "position": last_position,
            }),
            PerceptionEvent::Damage { amount, new_hp } => json!({
                "amount": amount,
                "new_hp": new_hp,
            }),
        }
    }
}

/// Keeps the previous snapshot and diffs each new one against it
#[derive(Debug, Default)]
pub struct Perception {
    previous: Option<Snapshot>,
}

impl Perception {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `current` against the previous snapshot and remember it.
    /// On the first call every entity is reported as appearing.
    pub fn diff(&mut self, current: &Snapshot) -> Vec<PerceptionEvent> {
        let mut events = Vec::new();

        let previous_ids: HashSet<i64> = self
            .previous
            .as_ref()
            .map(|p| p.entities.iter().map(|e| e.id).collect())
            .unwrap_or_default();
        let current_ids: HashSet<i64> = current.entities.iter().map(|e| e.id).collect();

        for entity in &current.entities {
            if !previous_ids.contains(&entity.id) {
                events.push(PerceptionEvent::Appear(entity.clone()));
            }
        }

        if let Some(previous) = &self.previous {
            for entity in &previous.entities {
                if !current_ids.contains(&entity.id) {
                    events.push(PerceptionEvent::Leave {
                        id: entity.id,
                        name: entity.name.clone(),
                        last_position: entity.position,
                    });
                }
            }

            let lost = previous.health - current.health;
            if lost > HEALTH_EPSILON {
                events.push(PerceptionEvent::Damage {
                    amount: lost,
                    new_hp: current.health,
                });
            }
        }

        self.previous = Some(current.clone());
        events
    }

    pub fn previous(&self) -> Option<&Snapshot> {
        self.previous.as_ref()
    }
}
