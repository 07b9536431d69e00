//! Episode Log
//!
//! Append-only record of each decision cycle, mutable until closed.
//!
//! ```text
//!   open ──close_by_behavior_end──┐
//!     │  ──close_by_id────────────┼──▶ closed (terminal)
//!     └──close_expired_open───────┘
//! ```
//!
//! Closing is idempotent: re-closing returns the stored snapshot unchanged
//! and reports `newly_closed = false`, so callers can gate side effects.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use wayfarer_common::NO_RUN_ID;

/// Outcome recorded by the open-timeout safety net
pub const OUTCOME_BEHAVIOR_TIMEOUT: &str = "behavior_timeout";

/// One decision cycle or direct action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: u64,
    /// Tick the episode was opened on (0 = unknown, backfilled on close)
    pub tick_id: u64,
    pub trigger: String,
    pub thought: String,
    pub decision: String,
    /// Empty until closed
    pub outcome: String,
    /// Bound behavior run; 0 never matches a completion
    pub behavior_run_id: u64,
    pub actions: Vec<String>,
    pub events: Vec<String>,
    pub closed: bool,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Episode {
    pub fn is_open(&self) -> bool {
        !self.closed
    }
}

/// Fields supplied when opening an episode
#[derive(Debug, Clone, Default)]
pub struct NewEpisode {
    pub tick_id: u64,
    pub trigger: String,
    pub thought: String,
    pub decision: String,
    pub behavior_run_id: u64,
    pub actions: Vec<String>,
    pub events: Vec<String>,
}

/// Result of a close attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Closed {
    pub episode: Episode,
    /// False when the episode had already been closed
    pub newly_closed: bool,
}

struct LogState {
    episodes: VecDeque<Episode>,
    next_id: u64,
}

/// Bounded episode log
pub struct EpisodeLog {
    state: Mutex<LogState>,
    capacity: usize,
}

impl EpisodeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LogState {
                episodes: VecDeque::new(),
                next_id: 1,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn open(&self, new: NewEpisode) -> Episode {
        self.open_at(new, Utc::now())
    }

    /// Open a record, trimming the oldest closed record (or the oldest
    /// overall if none is closed) when over capacity.
    pub fn open_at(&self, new: NewEpisode, now: DateTime<Utc>) -> Episode {
        let mut state = self.state.lock();
        let episode = Episode {
            id: state.next_id,
            tick_id: new.tick_id,
            trigger: new.trigger,
            thought: new.thought,
            decision: new.decision,
            outcome: String::new(),
            behavior_run_id: new.behavior_run_id,
            actions: new.actions,
            events: new.events,
            closed: false,
            created_at: now,
            closed_at: None,
        };
        state.next_id += 1;
        state.episodes.push_back(episode.clone());

        while state.episodes.len() > self.capacity {
            let victim = state.episodes.iter().position(|e| e.closed).unwrap_or(0);
            if let Some(trimmed) = state.episodes.remove(victim) {
                debug!(episode_id = trimmed.id, closed = trimmed.closed, "trimmed episode");
            }
        }

        debug!(
            episode_id = episode.id,
            run_id = episode.behavior_run_id,
            tick = episode.tick_id,
            "opened episode"
        );
        episode
    }

    /// Close the open episode bound to `run_id`
    pub fn close_by_behavior_end(
        &self,
        run_id: u64,
        action: &str,
        reason: &str,
        tick: u64,
    ) -> Option<Closed> {
        self.close_by_behavior_end_at(run_id, action, reason, tick, Utc::now())
    }

    pub fn close_by_behavior_end_at(
        &self,
        run_id: u64,
        action: &str,
        reason: &str,
        tick: u64,
        now: DateTime<Utc>,
    ) -> Option<Closed> {
        if run_id == NO_RUN_ID {
            return None;
        }
        let mut state = self.state.lock();
        let episode = state
            .episodes
            .iter_mut()
            .find(|e| !e.closed && e.behavior_run_id == run_id)?;
        let outcome = format!("{}: {}", action, reason);
        close_in_place(episode, outcome, tick, now);
        Some(Closed {
            episode: episode.clone(),
            newly_closed: true,
        })
    }

    /// Close by episode id; an already closed episode is returned unchanged
    pub fn close_by_id(&self, id: u64, outcome: &str, tick: u64) -> Option<Closed> {
        self.close_by_id_at(id, outcome, tick, Utc::now())
    }

    pub fn close_by_id_at(&self, id: u64, outcome: &str, tick: u64, now: DateTime<Utc>) -> Option<Closed> {
        let mut state = self.state.lock();
        let episode = state.episodes.iter_mut().find(|e| e.id == id)?;
        if episode.closed {
            return Some(Closed {
                episode: episode.clone(),
                newly_closed: false,
            });
        }
        close_in_place(episode, outcome.to_string(), tick, now);
        Some(Closed {
            episode: episode.clone(),
            newly_closed: true,
        })
    }

    /// Force-close every open episode older than `max_age`
    pub fn close_expired_open(&self, max_age: Duration, now: DateTime<Utc>, tick: u64) -> Vec<Episode> {
        let mut state = self.state.lock();
        let mut expired = Vec::new();
        for episode in state.episodes.iter_mut() {
            if !episode.closed && now - episode.created_at > max_age {
                close_in_place(episode, OUTCOME_BEHAVIOR_TIMEOUT.to_string(), tick, now);
                expired.push(episode.clone());
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), tick, "force-closed expired episodes");
        }
        expired
    }

    pub fn get(&self, id: u64) -> Option<Episode> {
        self.state.lock().episodes.iter().find(|e| e.id == id).cloned()
    }

    /// Open episode bound to a run id, if any
    pub fn find_open_by_run(&self, run_id: u64) -> Option<Episode> {
        if run_id == NO_RUN_ID {
            return None;
        }
        self.state
            .lock()
            .episodes
            .iter()
            .find(|e| !e.closed && e.behavior_run_id == run_id)
            .cloned()
    }

    /// Most recently closed episodes, newest first
    pub fn recent_closed(&self, limit: usize) -> Vec<Episode> {
        self.state
            .lock()
            .episodes
            .iter()
            .rev()
            .filter(|e| e.closed)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().episodes.iter().filter(|e| !e.closed).count()
    }

    pub fn len(&self) -> usize {
        self.state.lock().episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().episodes.is_empty()
    }
}

fn close_in_place(episode: &mut Episode, outcome: String, tick: u64, now: DateTime<Utc>) {
    episode.outcome = outcome;
    episode.closed = true;
    episode.closed_at = Some(now);
    if episode.tick_id == 0 {
        episode.tick_id = tick;
    }
    debug!(episode_id = episode.id, outcome = %episode.outcome, tick, "closed episode");
}
