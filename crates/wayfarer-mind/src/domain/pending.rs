//! Pending behavior completions
//!
//! A behavior started mid-reasoning can finish before its episode exists.
//! Such completions wait here, keyed by run id, until the episode is bound
//! or they age out.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use wayfarer_common::BehaviorEnd;

/// A completion that arrived before its episode
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBehaviorEnd {
    pub run_id: u64,
    pub end: BehaviorEnd,
    pub arrival_tick: u64,
}

/// Run-id keyed buffer bounded by TTL (ticks) and entry count
pub struct PendingBehaviorEnds {
    entries: Mutex<HashMap<u64, PendingBehaviorEnd>>,
    ttl_ticks: u64,
    max_entries: usize,
}

impl PendingBehaviorEnds {
    pub fn new(ttl_ticks: u64, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_ticks,
            max_entries: max_entries.max(1),
        }
    }

    /// Buffer a completion, evicting the oldest arrivals beyond the cap
    pub fn insert(&self, end: BehaviorEnd, tick: u64) {
        let mut entries = self.entries.lock();
        entries.insert(
            end.run_id,
            PendingBehaviorEnd {
                run_id: end.run_id,
                end,
                arrival_tick: tick,
            },
        );
        while entries.len() > self.max_entries {
            let oldest = entries
                .values()
                .min_by_key(|p| (p.arrival_tick, p.run_id))
                .map(|p| p.run_id);
            match oldest {
                Some(run_id) => {
                    entries.remove(&run_id);
                    debug!(run_id, "pending completion evicted (cap)");
                }
                None => break,
            }
        }
    }

    /// Consume the completion for a run id
    pub fn take(&self, run_id: u64) -> Option<PendingBehaviorEnd> {
        self.entries.lock().remove(&run_id)
    }

    /// Drop entries older than the TTL; returns how many were removed.
    /// Runs in `held` still await their episode and never expire.
    pub fn gc(&self, now_tick: u64, held: &[u64]) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let ttl = self.ttl_ticks;
        entries.retain(|run_id, p| {
            let keep = held.contains(run_id) || now_tick.saturating_sub(p.arrival_tick) <= ttl;
            if !keep {
                debug!(run_id = *run_id, "pending completion expired");
            }
            keep
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
