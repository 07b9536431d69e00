//! Auto-memory rules
//!
//! Turns closed episodes and notable events into long-term facts. Each rule
//! has a cooldown per subject so a looping failure does not flood the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use wayfarer_common::{Vec3, NO_RUN_ID};

use super::episodes::{Episode, OUTCOME_BEHAVIOR_TIMEOUT};
use super::semantic::{MemoryContext, MemoryEntry, SemanticMemoryStore, TAG_TYPE};

pub const RULE_BEHAVIOR_FAILED: &str = "behavior_failed";
pub const RULE_BEHAVIOR_COMPLETED: &str = "behavior_completed";
pub const RULE_TOOK_DAMAGE: &str = "took_damage";

/// How a behavior episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Failure,
    Other,
}

/// Classify an episode outcome string ("<action>: <reason>" or a bare code)
pub fn classify_outcome(outcome: &str) -> OutcomeKind {
    let reason = outcome
        .split_once(": ")
        .map(|(_, r)| r)
        .unwrap_or(outcome)
        .trim()
        .to_ascii_lowercase();
    if matches!(reason.as_str(), "completed" | "done" | "success") {
        OutcomeKind::Success
    } else if reason == OUTCOME_BEHAVIOR_TIMEOUT
        || reason.starts_with("fail")
        || reason.starts_with("error")
        || reason.contains("timeout")
    {
        OutcomeKind::Failure
    } else {
        OutcomeKind::Other
    }
}

/// "<action> failed: <detail>", without repeating a "failed:" prefix
/// the behavior already put on its reason
fn failure_text(action: &str, reason: &str) -> String {
    let trimmed = reason.trim();
    let detail = match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("failed:") => trimmed[7..].trim(),
        _ if trimmed.eq_ignore_ascii_case("failed") => "",
        _ => trimmed,
    };
    if detail.is_empty() {
        format!("{} failed", action)
    } else {
        format!("{} failed: {}", action, detail)
    }
}

/// Rule engine writing into the semantic store
pub struct AutoMemory {
    store: Arc<SemanticMemoryStore>,
    /// "<rule>:<subject>" -> tick the rule last fired
    cooldowns: Mutex<HashMap<String, u64>>,
    cooldown_ticks: u64,
}

impl AutoMemory {
    pub fn new(store: Arc<SemanticMemoryStore>, cooldown_ticks: u64) -> Self {
        Self {
            store,
            cooldowns: Mutex::new(HashMap::new()),
            cooldown_ticks,
        }
    }

    fn try_fire(&self, rule: &str, subject: &str, tick: u64) -> bool {
        let key = format!("{}:{}", rule, subject.to_ascii_lowercase());
        let mut cooldowns = self.cooldowns.lock();
        if let Some(last) = cooldowns.get(&key) {
            if tick.saturating_sub(*last) < self.cooldown_ticks {
                debug!(rule, subject, tick, "auto-memory rule cooling down");
                return false;
            }
        }
        cooldowns.insert(key, tick);
        true
    }

    /// Apply outcome rules to a newly closed behavior episode.
    /// Meta episodes (no bound run) are ignored.
    pub fn on_episode_closed(&self, episode: &Episode, context: &MemoryContext) -> Option<MemoryEntry> {
        if episode.behavior_run_id == NO_RUN_ID {
            return None;
        }
        let (action, reason) = episode
            .outcome
            .split_once(": ")
            .map(|(a, r)| (a.to_string(), r.to_string()))
            .unwrap_or_else(|| (episode.decision.clone(), episode.outcome.clone()));

        let (rule, content, kind) = match classify_outcome(&episode.outcome) {
            OutcomeKind::Failure => (RULE_BEHAVIOR_FAILED, failure_text(&action, &reason), "failure"),
            OutcomeKind::Success => (
                RULE_BEHAVIOR_COMPLETED,
                format!("{} completed", episode.decision),
                "success",
            ),
            OutcomeKind::Other => return None,
        };

        if !self.try_fire(rule, &action, context.tick) {
            return None;
        }

        let mut tags = BTreeMap::new();
        tags.insert(TAG_TYPE.to_string(), kind.to_string());
        tags.insert("action".to_string(), action);
        self.remember(&content, tags, context, rule)
    }

    /// Remember where damage was taken
    pub fn on_damage(&self, amount: f32, position: Vec3, context: &MemoryContext) -> Option<MemoryEntry> {
        let subject = position.block().to_string();
        if !self.try_fire(RULE_TOOK_DAMAGE, &subject, context.tick) {
            return None;
        }
        let mut tags = BTreeMap::new();
        tags.insert(TAG_TYPE.to_string(), "danger".to_string());
        let content = format!("Took {:.1} damage at {}", amount, position.block());
        self.remember(&content, tags, &context.clone().with_position(position), RULE_TOOK_DAMAGE)
    }

    fn remember(
        &self,
        content: &str,
        tags: BTreeMap<String, String>,
        context: &MemoryContext,
        rule: &str,
    ) -> Option<MemoryEntry> {
        match self
            .store
            .remember(content, tags, context, &format!("auto:{}", rule))
        {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(rule, error = %e, "auto-memory rule failed");
                None
            }
        }
    }
}
