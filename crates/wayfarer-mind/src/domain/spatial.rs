//! Spatial memory
//!
//! Short-lived perceptual cache keyed by entity id and block position.
//! Records are refreshed by world diffs and expire by age; nothing here is
//! touched on read, so eviction is pure recency.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use wayfarer_common::{BlockPos, BlockSnapshot, EntitySnapshot, Vec3};

/// Last known state of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMemory {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub position: Vec3,
    pub last_seen: DateTime<Utc>,
    pub tick_id: u64,
    /// True only while the entity is currently observed
    pub in_fov: bool,
}

/// Last known state of a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMemory {
    pub position: BlockPos,
    pub name: String,
    pub last_seen: DateTime<Utc>,
    pub tick_id: u64,
}

/// Result of a radius query, both lists sorted by ascending distance
#[derive(Debug, Clone, Default)]
pub struct Nearby {
    pub entities: Vec<EntityMemory>,
    pub blocks: Vec<BlockMemory>,
}

/// Counts removed by one garbage collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub entities_removed: usize,
    pub blocks_removed: usize,
}

#[derive(Default)]
struct SpatialState {
    entities: HashMap<i64, EntityMemory>,
    blocks: HashMap<BlockPos, BlockMemory>,
}

/// Per-entity / per-block recency cache
pub struct SpatialMemory {
    state: RwLock<SpatialState>,
    entity_max_age: Duration,
    block_cap: usize,
    summary_entity_limit: usize,
}

impl SpatialMemory {
    pub fn new(entity_max_age: Duration, block_cap: usize) -> Self {
        Self {
            state: RwLock::new(SpatialState::default()),
            entity_max_age,
            block_cap,
            summary_entity_limit: 8,
        }
    }

    pub fn with_summary_limit(mut self, limit: usize) -> Self {
        self.summary_entity_limit = limit;
        self
    }

    pub fn update_entities(&self, entities: &[EntitySnapshot], tick: u64) {
        self.update_entities_at(entities, tick, Utc::now());
    }

    /// Upsert observed entities, marking them visible
    pub fn update_entities_at(&self, entities: &[EntitySnapshot], tick: u64, now: DateTime<Utc>) {
        let mut state = self.state.write();
        for e in entities {
            let record = state.entities.entry(e.id).or_insert_with(|| EntityMemory {
                id: e.id,
                name: e.name.clone(),
                kind: e.kind.clone(),
                position: e.position,
                last_seen: now,
                tick_id: tick,
                in_fov: true,
            });
            record.name.clone_from(&e.name);
            record.kind.clone_from(&e.kind);
            record.position = e.position;
            record.last_seen = now;
            record.tick_id = tick;
            record.in_fov = true;
        }
    }

    pub fn update_blocks(&self, blocks: &[BlockSnapshot], tick: u64) {
        self.update_blocks_at(blocks, tick, Utc::now());
    }

    pub fn update_blocks_at(&self, blocks: &[BlockSnapshot], tick: u64, now: DateTime<Utc>) {
        let mut state = self.state.write();
        for b in blocks {
            state.blocks.insert(
                b.position,
                BlockMemory {
                    position: b.position,
                    name: b.name.clone(),
                    last_seen: now,
                    tick_id: tick,
                },
            );
        }
    }

    /// Flip an entity to not-visible, keeping its last known state.
    /// Returns false if the entity was never remembered.
    pub fn mark_entity_left(&self, id: i64, tick: u64) -> bool {
        let mut state = self.state.write();
        match state.entities.get_mut(&id) {
            Some(record) => {
                record.in_fov = false;
                debug!(entity_id = id, tick, "entity left view");
                true
            }
            None => false,
        }
    }

    pub fn entity(&self, id: i64) -> Option<EntityMemory> {
        self.state.read().entities.get(&id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn block_count(&self) -> usize {
        self.state.read().blocks.len()
    }

    pub fn query_nearby(&self, center: Vec3, radius: f64, max_age: Duration) -> Nearby {
        self.query_nearby_at(center, radius, max_age, Utc::now())
    }

    /// Entities and blocks within `radius` seen no longer than `max_age` ago
    /// (floored to one second). Sorted by distance, then newest tick, then id.
    pub fn query_nearby_at(
        &self,
        center: Vec3,
        radius: f64,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Nearby {
        let max_age = max_age.max(Duration::seconds(1));
        let radius_sq = radius * radius;
        let state = self.state.read();

        let mut entities: Vec<(f64, EntityMemory)> = state
            .entities
            .values()
            .filter(|e| now - e.last_seen <= max_age)
            .map(|e| (center.distance_squared(&e.position), e))
            .filter(|(d, _)| *d <= radius_sq)
            .map(|(d, e)| (d, e.clone()))
            .collect();
        entities.sort_by(|(da, a), (db, b)| {
            OrderedFloat(*da)
                .cmp(&OrderedFloat(*db))
                .then_with(|| b.tick_id.cmp(&a.tick_id))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut blocks: Vec<(f64, BlockMemory)> = state
            .blocks
            .values()
            .filter(|b| now - b.last_seen <= max_age)
            .map(|b| (center.distance_squared(&b.position.center()), b))
            .filter(|(d, _)| *d <= radius_sq)
            .map(|(d, b)| (d, b.clone()))
            .collect();
        blocks.sort_by(|(da, a), (db, b)| {
            OrderedFloat(*da)
                .cmp(&OrderedFloat(*db))
                .then_with(|| b.tick_id.cmp(&a.tick_id))
                .then_with(|| a.position.cmp(&b.position))
        });

        Nearby {
            entities: entities.into_iter().map(|(_, e)| e).collect(),
            blocks: blocks.into_iter().map(|(_, b)| b).collect(),
        }
    }

    pub fn gc(&self) -> GcStats {
        self.gc_at(Utc::now())
    }

    /// Drop entities older than the max age, then trim blocks to the cap
    /// oldest-first by (last seen, tick, position).
    pub fn gc_at(&self, now: DateTime<Utc>) -> GcStats {
        let mut state = self.state.write();
        let before = state.entities.len();
        let max_age = self.entity_max_age;
        state.entities.retain(|_, e| now - e.last_seen <= max_age);
        let entities_removed = before - state.entities.len();

        let mut blocks_removed = 0;
        if state.blocks.len() > self.block_cap {
            let mut order: Vec<(DateTime<Utc>, u64, BlockPos)> = state
                .blocks
                .values()
                .map(|b| (b.last_seen, b.tick_id, b.position))
                .collect();
            order.sort();
            let excess = state.blocks.len() - self.block_cap;
            for (_, _, pos) in order.into_iter().take(excess) {
                state.blocks.remove(&pos);
                blocks_removed += 1;
            }
        }

        if entities_removed > 0 || blocks_removed > 0 {
            debug!(entities_removed, blocks_removed, "spatial memory gc");
        }
        GcStats {
            entities_removed,
            blocks_removed,
        }
    }

    pub fn summary(&self, center: Vec3, radius: f64) -> String {
        self.summary_at(center, radius, Utc::now())
    }

    /// Compact grouped text view for prompts
    pub fn summary_at(&self, center: Vec3, radius: f64, now: DateTime<Utc>) -> String {
        let nearby = self.query_nearby_at(center, radius, self.entity_max_age, now);
        let mut out = String::new();

        if nearby.entities.is_empty() {
            out.push_str("entities: none\n");
        } else {
            let _ = writeln!(out, "entities ({}):", nearby.entities.len());
            for e in nearby.entities.iter().take(self.summary_entity_limit) {
                let seen = if e.in_fov {
                    "visible".to_string()
                } else {
                    format!("last seen {}s ago", (now - e.last_seen).num_seconds())
                };
                let _ = writeln!(
                    out,
                    "- {} [{}] #{} at {} dist {:.1} {}",
                    e.name,
                    e.kind,
                    e.id,
                    e.position,
                    center.distance(&e.position),
                    seen
                );
            }
        }

        if nearby.blocks.is_empty() {
            out.push_str("blocks: none\n");
            return out;
        }

        let mut groups: BTreeMap<&str, Vec<BlockPos>> = BTreeMap::new();
        for b in &nearby.blocks {
            groups.entry(b.name.as_str()).or_default().push(b.position);
        }
        out.push_str("blocks:\n");
        for (name, positions) in groups {
            match bounding_box(&positions) {
                Some((min, max)) => {
                    let _ = writeln!(
                        out,
                        "- {} x{} in x {}..{} y {}..{} z {}..{}",
                        name,
                        positions.len(),
                        min.x,
                        max.x,
                        min.y,
                        max.y,
                        min.z,
                        max.z
                    );
                }
                None => {
                    let coords: Vec<String> = positions.iter().map(|p| p.to_string()).collect();
                    let _ = writeln!(out, "- {} x{} at {}", name, positions.len(), coords.join(" "));
                }
            }
        }
        out
    }
}

/// Bounds of a group that exactly fills an axis-aligned box of at least four
/// blocks.
fn bounding_box(positions: &[BlockPos]) -> Option<(BlockPos, BlockPos)> {
    if positions.len() < 4 {
        return None;
    }
    let mut min = positions[0];
    let mut max = positions[0];
    for p in positions {
        min = BlockPos::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
        max = BlockPos::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
    }
    let volume = i64::from(max.x - min.x + 1) * i64::from(max.y - min.y + 1) * i64::from(max.z - min.z + 1);
    (volume == positions.len() as i64).then_some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zombie(id: i64, x: f64) -> EntitySnapshot {
        EntitySnapshot::new(id, "zombie", "hostile", Vec3::new(x, 64.0, 0.0))
    }

    #[test]
    fn test_left_entity_stays_queryable_until_gc() {
        let memory = SpatialMemory::new(Duration::seconds(60), 100);
        let t0 = Utc::now();
        memory.update_entities_at(&[zombie(42, 3.0)], 10, t0);
        assert!(memory.mark_entity_left(42, 11));

        let nearby = memory.query_nearby_at(Vec3::default(), 16.0, Duration::seconds(30), t0);
        assert_eq!(nearby.entities.len(), 1);
        let e = &nearby.entities[0];
        assert!(!e.in_fov);
        assert_eq!(e.position, Vec3::new(3.0, 64.0, 0.0));

        let later = t0 + Duration::seconds(61);
        let stats = memory.gc_at(later);
        assert_eq!(stats.entities_removed, 1);
        assert!(memory.entity(42).is_none());
    }

    #[test]
    fn test_update_marks_visible_again() {
        let memory = SpatialMemory::new(Duration::seconds(60), 100);
        memory.update_entities(&[zombie(1, 1.0)], 1);
        memory.mark_entity_left(1, 2);
        memory.update_entities(&[zombie(1, 2.0)], 3);
        let e = memory.entity(1).unwrap();
        assert!(e.in_fov);
        assert_eq!(e.tick_id, 3);
    }

    #[test]
    fn test_query_sorting_and_age_filter() {
        let memory = SpatialMemory::new(Duration::seconds(60), 100);
        let t0 = Utc::now();
        memory.update_entities_at(&[zombie(5, 2.0), zombie(3, -2.0)], 1, t0);
        memory.update_entities_at(&[zombie(9, 1.0)], 2, t0 - Duration::seconds(20));
        memory.update_entities_at(&[zombie(7, 2.0)], 4, t0);

        let nearby = memory.query_nearby_at(Vec3::new(0.0, 64.0, 0.0), 5.0, Duration::seconds(10), t0);
        let ids: Vec<i64> = nearby.entities.iter().map(|e| e.id).collect();
        // id 9 is too old; at equal distance newer tick wins, then lower id
        assert_eq!(ids, vec![7, 3, 5]);
    }

    #[test]
    fn test_max_age_floored_to_one_second() {
        let memory = SpatialMemory::new(Duration::seconds(60), 100);
        let t0 = Utc::now();
        memory.update_entities_at(&[zombie(1, 1.0)], 1, t0 - Duration::milliseconds(500));
        let nearby = memory.query_nearby_at(Vec3::default(), 100.0, Duration::zero(), t0);
        assert_eq!(nearby.entities.len(), 1);
    }

    #[test]
    fn test_block_cap_evicts_oldest() {
        let memory = SpatialMemory::new(Duration::seconds(60), 2);
        let t0 = Utc::now();
        memory.update_blocks_at(&[BlockSnapshot::new(BlockPos::new(0, 0, 0), "stone")], 1, t0);
        memory.update_blocks_at(&[BlockSnapshot::new(BlockPos::new(1, 0, 0), "stone")], 2, t0 + Duration::seconds(1));
        memory.update_blocks_at(&[BlockSnapshot::new(BlockPos::new(2, 0, 0), "stone")], 3, t0 + Duration::seconds(2));

        let stats = memory.gc_at(t0 + Duration::seconds(3));
        assert_eq!(stats.blocks_removed, 1);
        assert_eq!(memory.block_count(), 2);
        let nearby = memory.query_nearby_at(Vec3::default(), 10.0, Duration::seconds(30), t0 + Duration::seconds(3));
        assert!(nearby.blocks.iter().all(|b| b.position != BlockPos::new(0, 0, 0)));
    }

    #[test]
    fn test_summary_groups_boxes() {
        let memory = SpatialMemory::new(Duration::seconds(60), 100);
        let mut logs = Vec::new();
        for x in 0..2 {
            for y in 64..66 {
                logs.push(BlockSnapshot::new(BlockPos::new(x, y, 0), "oak_log"));
            }
        }
        logs.push(BlockSnapshot::new(BlockPos::new(5, 60, 5), "iron_ore"));
        logs.push(BlockSnapshot::new(BlockPos::new(6, 61, 5), "iron_ore"));
        memory.update_blocks(&logs, 1);
        memory.update_entities(&[zombie(42, 3.0)], 1);

        let text = memory.summary(Vec3::new(0.0, 64.0, 0.0), 32.0);
        assert!(text.contains("zombie [hostile] #42"));
        assert!(text.contains("oak_log x4 in x 0..1 y 64..65 z 0..0"));
        assert!(text.contains("iron_ore x2 at"));
    }

    #[test]
    fn test_bounding_box_rejects_sparse_group() {
        let positions = vec![
            BlockPos::new(0, 0, 0),
            BlockPos::new(2, 0, 0),
            BlockPos::new(0, 0, 2),
            BlockPos::new(2, 0, 2),
        ];
        assert!(bounding_box(&positions).is_none());
    }
}
