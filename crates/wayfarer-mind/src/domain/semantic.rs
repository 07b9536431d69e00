//! Semantic Memory Store
//!
//! Bounded long-term store of tagged natural-language facts.
//!
//! Recall is hybrid:
//! 1. Explicit filter tags are a hard, case-insensitive AND gate
//! 2. Survivors score `2 * keyword + cosine + soft boost`
//! 3. Entries scoring <= 0 are dropped, the rest ranked and truncated
//!
//! Every returned entry has its hit count and last-hit tick refreshed, which
//! feeds the cold score used for eviction.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use wayfarer_common::{Result, Vec3, WayfarerError};

use crate::infra::embedding::{cosine_similarity, tokenize, Embedder};

pub const TAG_PLAYER: &str = "player";
pub const TAG_DIMENSION: &str = "dim";
pub const TAG_TYPE: &str = "type";

const WHOLE_QUERY_BONUS: f32 = 1.2;
const TOKEN_BONUS: f32 = 0.5;
const KEYWORD_WEIGHT: f32 = 2.0;
const PLAYER_MATCH_BOOST: f32 = 0.35;
const DIMENSION_MATCH_BOOST: f32 = 0.20;
const MISMATCH_PENALTY: f32 = 0.05;
const HIT_WEIGHT: i64 = 1000;

/// One long-term fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: u64,
    pub content: String,
    pub tags: BTreeMap<String, String>,
    pub position: Option<Vec3>,
    pub tick_id: u64,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub hit_count: u32,
    pub last_hit_tick: u64,
    /// Who wrote it ("tool", "auto:<rule>", ...)
    pub source: String,
}

impl MemoryEntry {
    /// `hit_count * 1000 - age`, age measured from the last hit (or creation)
    pub fn cold_score(&self, now_tick: u64) -> i64 {
        let reference = if self.hit_count > 0 {
            self.last_hit_tick
        } else {
            self.tick_id
        };
        let age = now_tick.saturating_sub(reference) as i64;
        i64::from(self.hit_count) * HIT_WEIGHT - age
    }

    fn tag_matches(&self, key: &str, value: &str) -> bool {
        self.tags
            .get(key)
            .map(|v| v.eq_ignore_ascii_case(value))
            .unwrap_or(false)
    }
}

/// Ambient context for remember/recall
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    /// Player the agent is currently dealing with
    pub player: Option<String>,
    pub dimension: Option<String>,
    /// Default `type` tag for new facts
    pub kind: Option<String>,
    pub position: Option<Vec3>,
    pub tick: u64,
}

impl MemoryContext {
    pub fn at_tick(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    pub fn with_player(mut self, player: impl Into<String>) -> Self {
        self.player = Some(player.into());
        self
    }

    pub fn with_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimension = Some(dimension.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }
}

/// A recalled fact with its relevance score
#[derive(Debug, Clone)]
pub struct RecallHit {
    pub entry: MemoryEntry,
    pub score: f32,
}

struct StoreState {
    entries: Vec<MemoryEntry>,
    next_id: u64,
}

/// Capacity-bounded semantic fact store
pub struct SemanticMemoryStore {
    state: Mutex<StoreState>,
    embedder: Arc<dyn Embedder>,
    capacity: usize,
    default_top_k: usize,
}

impl SemanticMemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            state: Mutex::new(StoreState {
                entries: Vec::new(),
                next_id: 1,
            }),
            embedder,
            capacity: capacity.max(1),
            default_top_k: 5,
        }
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k.max(1);
        self
    }

    /// Store a fact. Fills `player`/`dim`/`type` from the context when the
    /// caller left them out, then evicts the coldest other entry if over
    /// capacity.
    pub fn remember(
        &self,
        content: &str,
        tags: BTreeMap<String, String>,
        context: &MemoryContext,
        source: &str,
    ) -> Result<MemoryEntry> {
        let content = content.trim();
        if content.is_empty() {
            return Err(WayfarerError::InvalidArgument(
                "memory content must not be empty".to_string(),
            ));
        }

        let mut tags = normalize_tags(tags);
        for (key, value) in [
            (TAG_PLAYER, &context.player),
            (TAG_DIMENSION, &context.dimension),
            (TAG_TYPE, &context.kind),
        ] {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                tags.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
        }

        let embedding = self
            .embedder
            .embed(&embedding_text(content, &tags, context.position.as_ref()));

        let mut state = self.state.lock();
        let entry = MemoryEntry {
            id: state.next_id,
            content: content.to_string(),
            tags,
            position: context.position,
            tick_id: context.tick,
            embedding,
            hit_count: 0,
            last_hit_tick: 0,
            source: source.to_string(),
        };
        state.next_id += 1;
        state.entries.push(entry.clone());

        while state.entries.len() > self.capacity {
            let victim = state
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.id != entry.id)
                .min_by_key(|(_, e)| (e.cold_score(context.tick), e.id))
                .map(|(idx, _)| idx);
            match victim {
                Some(idx) => {
                    let evicted = state.entries.remove(idx);
                    debug!(
                        memory_id = evicted.id,
                        cold_score = evicted.cold_score(context.tick),
                        "evicted memory"
                    );
                }
                None => break,
            }
        }

        debug!(memory_id = entry.id, tick = entry.tick_id, source, "remembered fact");
        Ok(entry)
    }

    /// Ranked recall; refreshes hit statistics of every returned entry
    pub fn recall(
        &self,
        query: &str,
        filter: &BTreeMap<String, String>,
        context: &MemoryContext,
        top_k: usize,
    ) -> Vec<RecallHit> {
        let top_k = if top_k == 0 { self.default_top_k } else { top_k };
        let filter = normalize_tags(filter.clone());
        let query_lower = query.trim().to_lowercase();
        let mut seen = HashSet::new();
        let query_tokens: Vec<String> = tokenize(&query_lower)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        let query_embedding = self.embedder.embed(&query_lower);
        let explicit_player = filter.contains_key(TAG_PLAYER);
        let explicit_dimension = filter.contains_key(TAG_DIMENSION);

        let mut state = self.state.lock();
        let mut scored: Vec<(usize, f32)> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| filter.iter().all(|(k, v)| e.tag_matches(k, v)))
            .map(|(idx, e)| {
                let keyword = keyword_score(e, &query_lower, &query_tokens);
                let semantic = cosine_similarity(&query_embedding, &e.embedding);
                let boost = soft_boost(
                    e,
                    TAG_PLAYER,
                    context.player.as_deref(),
                    explicit_player,
                    PLAYER_MATCH_BOOST,
                ) + soft_boost(
                    e,
                    TAG_DIMENSION,
                    context.dimension.as_deref(),
                    explicit_dimension,
                    DIMENSION_MATCH_BOOST,
                );
                (idx, KEYWORD_WEIGHT * keyword + semantic + boost)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|(ia, sa), (ib, sb)| {
            let (a, b) = (&state.entries[*ia], &state.entries[*ib]);
            OrderedFloat(*sb)
                .cmp(&OrderedFloat(*sa))
                .then_with(|| b.tick_id.cmp(&a.tick_id))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(idx, score)| {
                let entry = &mut state.entries[idx];
                entry.hit_count = entry.hit_count.saturating_add(1);
                entry.last_hit_tick = context.tick;
                RecallHit {
                    entry: entry.clone(),
                    score,
                }
            })
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<MemoryEntry> {
        self.state.lock().entries.iter().find(|e| e.id == id).cloned()
    }

    /// Most recent facts first
    pub fn recent(&self, limit: usize) -> Vec<MemoryEntry> {
        let state = self.state.lock();
        state.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn normalize_tags(tags: BTreeMap<String, String>) -> BTreeMap<String, String> {
    tags.into_iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

fn embedding_text(content: &str, tags: &BTreeMap<String, String>, position: Option<&Vec3>) -> String {
    let mut text = content.to_string();
    for (k, v) in tags {
        text.push(' ');
        text.push_str(k);
        text.push(' ');
        text.push_str(v);
    }
    if let Some(p) = position {
        let block = p.block();
        text.push_str(&format!(" {} {} {}", block.x, block.y, block.z));
    }
    text
}

fn keyword_score(entry: &MemoryEntry, query_lower: &str, query_tokens: &[String]) -> f32 {
    if query_lower.is_empty() {
        return 0.0;
    }
    let mut haystack = entry.content.to_lowercase();
    for v in entry.tags.values() {
        haystack.push(' ');
        haystack.push_str(&v.to_lowercase());
    }

    let mut score = 0.0;
    if haystack.contains(query_lower) {
        score += WHOLE_QUERY_BONUS;
    }
    for token in query_tokens {
        if haystack.contains(token.as_str()) {
            score += TOKEN_BONUS;
        }
    }
    score
}

fn soft_boost(
    entry: &MemoryEntry,
    key: &str,
    wanted: Option<&str>,
    explicit_filter: bool,
    match_boost: f32,
) -> f32 {
    let Some(wanted) = wanted.map(str::trim).filter(|w| !w.is_empty()) else {
        return 0.0;
    };
    match entry.tags.get(key) {
        Some(v) if v.eq_ignore_ascii_case(wanted) => match_boost,
        Some(_) if !explicit_filter => -MISMATCH_PENALTY,
        _ => 0.0,
    }
}
