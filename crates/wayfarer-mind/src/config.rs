//! Wayfarer mind configuration

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use wayfarer_common::WayfarerError;

/// Top-level configuration for the decision core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MindConfig {
    /// Tick loop and think-trigger settings
    #[serde(rename = "loop")]
    pub loop_settings: LoopSettings,
    /// Event buffer / inbox sizing
    pub buffer: BufferSettings,
    /// Spatial memory settings
    pub spatial: SpatialSettings,
    /// Semantic memory settings
    pub semantic: SemanticSettings,
    /// Episode log settings
    pub episodes: EpisodeSettings,
    /// Reasoning loop settings
    pub thinker: ThinkerSettings,
}

impl MindConfig {
    /// Load configuration from `.env` and `WAYFARER_*` variables
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();

        override_from_env("WAYFARER_TICK_INTERVAL_MS", &mut cfg.loop_settings.tick_interval_ms);
        override_from_env("WAYFARER_THINK_TIMEOUT_SECS", &mut cfg.loop_settings.think_timeout_secs);
        override_from_env("WAYFARER_THINK_COOLDOWN_MS", &mut cfg.loop_settings.think_cooldown_ms);
        override_from_env("WAYFARER_BACKLOG_THRESHOLD", &mut cfg.loop_settings.backlog_threshold);
        override_from_env("WAYFARER_IDLE_INTERVAL_MS", &mut cfg.loop_settings.idle_interval_ms);
        override_from_env("WAYFARER_HEAD_SPEED_DEG", &mut cfg.loop_settings.head_speed_deg);
        override_from_env("WAYFARER_IDLE_POLL_MS", &mut cfg.loop_settings.idle_poll_ms);

        override_from_env("WAYFARER_BUFFER_CAPACITY", &mut cfg.buffer.capacity);
        override_from_env("WAYFARER_INBOX_CAPACITY", &mut cfg.buffer.inbox_capacity);

        override_from_env("WAYFARER_SPATIAL_ENTITY_MAX_AGE_SECS", &mut cfg.spatial.entity_max_age_secs);
        override_from_env("WAYFARER_SPATIAL_BLOCK_CAP", &mut cfg.spatial.block_cap);
        override_from_env("WAYFARER_SPATIAL_SUMMARY_LIMIT", &mut cfg.spatial.summary_entity_limit);
        override_from_env("WAYFARER_SPATIAL_SUMMARY_RADIUS", &mut cfg.spatial.summary_radius);

        override_from_env("WAYFARER_MEMORY_CAPACITY", &mut cfg.semantic.capacity);
        override_from_env("WAYFARER_MEMORY_EMBEDDING_DIM", &mut cfg.semantic.embedding_dimension);
        override_from_env("WAYFARER_MEMORY_TOP_K", &mut cfg.semantic.default_top_k);

        override_from_env("WAYFARER_EPISODE_CAPACITY", &mut cfg.episodes.capacity);
        override_from_env("WAYFARER_EPISODE_OPEN_TIMEOUT_SECS", &mut cfg.episodes.open_timeout_secs);
        override_from_env("WAYFARER_PENDING_TTL_TICKS", &mut cfg.episodes.pending_ttl_ticks);
        override_from_env("WAYFARER_PENDING_MAX", &mut cfg.episodes.pending_max);
        override_from_env(
            "WAYFARER_AUTO_MEMORY_COOLDOWN_TICKS",
            &mut cfg.episodes.auto_memory_cooldown_ticks,
        );

        override_from_env("WAYFARER_RECENT_EPISODES", &mut cfg.thinker.recent_episodes);
        override_from_env("WAYFARER_RECALLED_FACTS", &mut cfg.thinker.recalled_facts);

        if let Ok(prompt) = std::env::var("WAYFARER_SYSTEM_PROMPT") {
            cfg.thinker.system_prompt = prompt;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the loop cannot run with
    pub fn validate(&self) -> wayfarer_common::Result<()> {
        if self.loop_settings.think_timeout_secs == 0 {
            return Err(WayfarerError::Config(
                "think timeout must be at least one second".to_string(),
            ));
        }
        if self.episodes.open_timeout_secs <= 0 {
            return Err(WayfarerError::Config(
                "episode open timeout must be positive".to_string(),
            ));
        }
        if self.spatial.entity_max_age_secs <= 0 {
            return Err(WayfarerError::Config(
                "entity max age must be positive".to_string(),
            ));
        }
        if !self.spatial.summary_radius.is_finite() || self.spatial.summary_radius < 0.0 {
            return Err(WayfarerError::Config(format!(
                "invalid summary radius {}",
                self.spatial.summary_radius
            )));
        }
        Ok(())
    }
}

fn override_from_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "ignoring unparsable config override"),
        }
    }
}

/// Tick loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Fixed tick period
    pub tick_interval_ms: u64,
    /// Deadline for one reasoning invocation
    pub think_timeout_secs: u64,
    /// Minimum gap between the end of one invocation and the next
    pub think_cooldown_ms: u64,
    /// Buffered-event count that forces a think
    pub backlog_threshold: usize,
    /// Idle time with no behavior that forces a think
    pub idle_interval_ms: u64,
    /// Head interpolation speed in degrees per tick
    pub head_speed_deg: f32,
    /// Poll interval used by `wait_for_idle`
    pub idle_poll_ms: u64,
}

impl LoopSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn think_timeout(&self) -> Duration {
        Duration::from_secs(self.think_timeout_secs)
    }

    pub fn think_cooldown(&self) -> Duration {
        Duration::from_millis(self.think_cooldown_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: crate::DEFAULT_TICK_INTERVAL_MS,
            think_timeout_secs: crate::DEFAULT_THINK_TIMEOUT_SECS,
            think_cooldown_ms: 3_000,
            backlog_threshold: 4,
            idle_interval_ms: 6_000,
            head_speed_deg: 15.0,
            idle_poll_ms: 100,
        }
    }
}

/// Event buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSettings {
    /// Event buffer capacity (events awaiting the next think)
    pub capacity: usize,
    /// Inbound queue capacity (events awaiting the next tick)
    pub inbox_capacity: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: 64,
            inbox_capacity: 256,
        }
    }
}

/// Spatial memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialSettings {
    /// Entities not seen for this long are garbage collected
    pub entity_max_age_secs: i64,
    /// Hard cap on remembered blocks
    pub block_cap: usize,
    /// Entities listed in the prompt summary
    pub summary_entity_limit: usize,
    /// Radius of the prompt summary
    pub summary_radius: f64,
}

impl Default for SpatialSettings {
    fn default() -> Self {
        Self {
            entity_max_age_secs: 60,
            block_cap: 4096,
            summary_entity_limit: 8,
            summary_radius: 32.0,
        }
    }
}

/// Semantic memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSettings {
    /// Maximum stored facts
    pub capacity: usize,
    /// Hashed embedding dimensionality
    pub embedding_dimension: usize,
    /// Results returned when the caller does not ask for a count
    pub default_top_k: usize,
}

impl Default for SemanticSettings {
    fn default() -> Self {
        Self {
            capacity: crate::DEFAULT_MEMORY_CAPACITY,
            embedding_dimension: crate::DEFAULT_EMBEDDING_DIMENSION,
            default_top_k: 5,
        }
    }
}

/// Episode log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSettings {
    /// Maximum retained episodes
    pub capacity: usize,
    /// Open episodes older than this are force-closed
    pub open_timeout_secs: i64,
    /// Unmatched completions are dropped after this many ticks
    pub pending_ttl_ticks: u64,
    /// Maximum buffered unmatched completions
    pub pending_max: usize,
    /// Per-rule auto-memory cooldown
    pub auto_memory_cooldown_ticks: u64,
}

impl Default for EpisodeSettings {
    fn default() -> Self {
        Self {
            capacity: 256,
            open_timeout_secs: 90,
            pending_ttl_ticks: 200,
            pending_max: 128,
            auto_memory_cooldown_ticks: 600,
        }
    }
}

/// Reasoning loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkerSettings {
    pub system_prompt: String,
    /// Closed episodes included in the prompt digest
    pub recent_episodes: usize,
    /// Facts recalled into the prompt digest
    pub recalled_facts: usize,
}

impl Default for ThinkerSettings {
    fn default() -> Self {
        Self {
            system_prompt: crate::thinker::DEFAULT_SYSTEM_PROMPT.to_string(),
            recent_episodes: 5,
            recalled_facts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MindConfig::default();
        assert_eq!(cfg.loop_settings.tick_interval(), Duration::from_millis(50));
        assert_eq!(cfg.loop_settings.think_timeout(), Duration::from_secs(120));
        assert_eq!(cfg.loop_settings.backlog_threshold, 4);
        assert_eq!(cfg.loop_settings.idle_interval(), Duration::from_secs(6));
        assert_eq!(cfg.spatial.entity_max_age_secs, 60);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("WAYFARER_TEST_OVERRIDE", "17");
        let mut slot = 3usize;
        override_from_env("WAYFARER_TEST_OVERRIDE", &mut slot);
        assert_eq!(slot, 17);

        std::env::set_var("WAYFARER_TEST_OVERRIDE", "many");
        override_from_env("WAYFARER_TEST_OVERRIDE", &mut slot);
        assert_eq!(slot, 17);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut cfg = MindConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.loop_settings.think_timeout_secs = 0;
        assert!(matches!(cfg.validate(), Err(WayfarerError::Config(_))));

        let mut cfg = MindConfig::default();
        cfg.spatial.summary_radius = f64::NAN;
        assert!(matches!(cfg.validate(), Err(WayfarerError::Config(_))));
    }

    #[test]
    fn test_load_reads_digest_overrides() {
        std::env::set_var("WAYFARER_RECALLED_FACTS", "7");
        std::env::set_var("WAYFARER_SPATIAL_SUMMARY_RADIUS", "12.5");
        let cfg = MindConfig::load().unwrap();
        std::env::remove_var("WAYFARER_RECALLED_FACTS");
        std::env::remove_var("WAYFARER_SPATIAL_SUMMARY_RADIUS");

        assert_eq!(cfg.thinker.recalled_facts, 7);
        assert_eq!(cfg.spatial.summary_radius, 12.5);
    }

    #[test]
    fn test_serde_uses_loop_key() {
        let json = serde_json::to_value(MindConfig::default()).unwrap();
        assert!(json.get("loop").is_some());
    }
}
