//! World snapshot
//!
//! What the protocol client reports about the world once per tick.

use serde::{Deserialize, Serialize};

use super::geometry::{BlockPos, Vec3};

/// One observed entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Protocol entity id
    pub id: i64,
    /// Entity name (player name or mob type)
    pub name: String,
    /// Coarse category ("player", "hostile", "animal", "item", ...)
    pub kind: String,
    pub position: Vec3,
}

impl EntitySnapshot {
    pub fn new(id: i64, name: impl Into<String>, kind: impl Into<String>, position: Vec3) -> Self {
        Self {
            id,
            name: name.into(),
            kind: kind.into(),
            position,
        }
    }
}

/// One observed block of interest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub position: BlockPos,
    pub name: String,
}

impl BlockSnapshot {
    pub fn new(position: BlockPos, name: impl Into<String>) -> Self {
        Self {
            position,
            name: name.into(),
        }
    }
}

/// Pulled world state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub position: Vec3,
    /// Live head yaw in degrees
    pub yaw: f32,
    /// Live head pitch in degrees
    pub pitch: f32,
    pub health: f32,
    pub food: f32,
    pub dimension: String,
    pub entities: Vec<EntitySnapshot>,
    pub blocks: Vec<BlockSnapshot>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            position: Vec3::default(),
            yaw: 0.0,
            pitch: 0.0,
            health: 20.0,
            food: 20.0,
            dimension: "overworld".to_string(),
            entities: Vec::new(),
            blocks: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Find an entity by protocol id
    pub fn entity(&self, id: i64) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|e| e.id == id)
    }
}
