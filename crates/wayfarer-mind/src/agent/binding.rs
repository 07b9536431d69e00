//! Episode binding
//!
//! Ties behavior runs to the episodes that caused them and reconciles
//! completions that arrive before their episode exists.

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use wayfarer_common::BehaviorEnd;

use super::{Invocation, InvocationReport, LoopAgent};
use crate::domain::episodes::{Episode, NewEpisode};
use crate::thinker::tools::IntentOrigin;
use crate::thinker::{ThinkerError, OUTCOME_THINKER_OK};

pub const TRIGGER_DIRECT_INTENT: &str = "direct_intent";

impl LoopAgent {
    /// Take a finished invocation out of its slot and record its episodes
    pub(super) fn reap_invocation(&self, tick: u64) {
        let finished = {
            let mut slot = self.invocation.lock();
            match slot.as_ref() {
                Some(invocation) if invocation.handle.is_finished() => slot.take(),
                _ => None,
            }
        };
        let Some(mut invocation) = finished else {
            return;
        };

        let report = match (&mut invocation.handle).now_or_never() {
            Some(Ok(report)) => report,
            Some(Err(e)) => {
                error!(tick, invocation = invocation.id, error = %e, "reasoning task failed");
                InvocationReport {
                    trace: Default::default(),
                    error: Some(ThinkerError::Backend(e.to_string())),
                }
            }
            None => {
                // is_finished() was true, so the output is ready
                warn!(tick, invocation = invocation.id, "reasoning task output not ready");
                InvocationReport {
                    trace: Default::default(),
                    error: Some(ThinkerError::Interrupted),
                }
            }
        };

        self.timing.lock().last_think_end = Some(Instant::now());
        self.bind_episodes(&invocation, &report, tick);
    }

    /// One episode per started run id, or a single closed meta episode
    #[instrument(skip_all, fields(tick = tick, invocation = invocation.id))]
    fn bind_episodes(&self, invocation: &Invocation, report: &InvocationReport, tick: u64) {
        let thought = report.trace.thought_summary();
        let decision = if invocation.actions.is_empty() {
            report.trace.decision_summary()
        } else {
            invocation.actions.join("; ")
        };

        if invocation.run_ids.is_empty() {
            let outcome = report
                .error
                .as_ref()
                .map(ThinkerError::outcome)
                .unwrap_or(OUTCOME_THINKER_OK);
            let now = self.clock.now();
            let new = NewEpisode {
                tick_id: invocation.tick_id,
                trigger: invocation.trigger.to_string(),
                thought,
                decision,
                behavior_run_id: wayfarer_common::NO_RUN_ID,
                actions: Vec::new(),
                events: invocation.events.clone(),
            };
            let meta = self.episodes.open_at(new, now);
            if let Some(closed) = self.episodes.close_by_id_at(meta.id, outcome, tick, now) {
                info!(episode_id = closed.episode.id, outcome, "meta episode recorded");
            }
            return;
        }

        if let Some(error) = &report.error {
            info!(error = %error, runs = invocation.run_ids.len(), "invocation ended early after starting behaviors");
        }
        for run_id in &invocation.run_ids {
            let new = NewEpisode {
                tick_id: invocation.tick_id,
                trigger: invocation.trigger.to_string(),
                thought: thought.clone(),
                decision: decision.clone(),
                behavior_run_id: *run_id,
                actions: invocation.actions.clone(),
                events: invocation.events.clone(),
            };
            let episode = self.episodes.open_at(new, self.clock.now());
            debug!(episode_id = episode.id, run_id, "episode bound to run");
            self.reconcile_pending(*run_id, tick);
        }
    }

    /// Open the episode of a behavior started outside any invocation
    pub(super) fn open_direct_episode(&self, run_id: u64, description: &str, origin: IntentOrigin, tick: u64) {
        let trigger = match origin {
            IntentOrigin::Direct => TRIGGER_DIRECT_INTENT,
            IntentOrigin::Thinker => "late_intent",
        };
        let new = NewEpisode {
            tick_id: tick,
            trigger: trigger.to_string(),
            decision: description.to_string(),
            behavior_run_id: run_id,
            actions: vec![description.to_string()],
            ..NewEpisode::default()
        };
        let episode = self.episodes.open_at(new, self.clock.now());
        debug!(tick, episode_id = episode.id, run_id, "direct episode opened");
        self.reconcile_pending(run_id, tick);
    }

    /// Apply a completion that arrived before its episode was bound
    fn reconcile_pending(&self, run_id: u64, tick: u64) {
        if let Some(pending) = self.pending.take(run_id) {
            info!(
                run_id,
                arrival_tick = pending.arrival_tick,
                tick,
                "reconciling early completion"
            );
            self.close_for_end(&pending.end, tick);
        }
    }

    /// Close the episode for a completion, or park the completion
    pub(super) fn handle_behavior_end(&self, end: BehaviorEnd, tick: u64) {
        if !self.close_for_end(&end, tick) {
            debug!(tick, run_id = end.run_id, action = %end.name, "no episode for completion yet, parking");
            self.pending.insert(end, tick);
        }
    }

    fn close_for_end(&self, end: &BehaviorEnd, tick: u64) -> bool {
        match self
            .episodes
            .close_by_behavior_end_at(end.run_id, &end.name, &end.reason, tick, self.clock.now())
        {
            Some(closed) => {
                info!(
                    tick,
                    run_id = end.run_id,
                    episode_id = closed.episode.id,
                    outcome = %closed.episode.outcome,
                    "episode closed"
                );
                if closed.newly_closed {
                    self.remember_outcome(&closed.episode, tick);
                }
                true
            }
            None => false,
        }
    }

    /// Run auto-memory rules for a newly closed episode
    pub(super) fn remember_outcome(&self, episode: &Episode, tick: u64) {
        let context = self.memory_context(tick);
        if let Some(entry) = self.auto_memory.on_episode_closed(episode, &context) {
            debug!(tick, memory_id = entry.id, episode_id = episode.id, "auto-memory recorded");
        }
    }
}
