//! Think-trigger policy
//!
//! Decides whether a new reasoning invocation should start this tick.
//! Rules are evaluated in order and the first match wins.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a think was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkReason {
    /// An urgent event is pending
    Urgent,
    /// Nothing running and the cooldown has passed
    Ready,
    /// Enough events piled up
    Backlog,
    /// Idle for the idle interval
    Idle,
}

impl fmt::Display for ThinkReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThinkReason::Urgent => "urgent_event",
            ThinkReason::Ready => "ready",
            ThinkReason::Backlog => "event_backlog",
            ThinkReason::Idle => "idle",
        };
        f.write_str(s)
    }
}

/// Observations the policy works from
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerInputs {
    pub has_urgent: bool,
    pub active_behaviors: usize,
    pub buffered_events: usize,
    /// Time since the last invocation finished; None if never
    pub since_last_think: Option<Duration>,
    /// Time since behaviors went idle; None while busy
    pub idle_for: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerPolicy {
    pub cooldown: Duration,
    pub backlog_threshold: usize,
    pub idle_interval: Duration,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(3),
            backlog_threshold: 4,
            idle_interval: Duration::from_secs(6),
        }
    }
}

impl TriggerPolicy {
    /// Evaluate the rules; caller guarantees no invocation is running
    pub fn evaluate(&self, inputs: &TriggerInputs) -> Option<ThinkReason> {
        let cooled = inputs
            .since_last_think
            .map(|d| d >= self.cooldown)
            .unwrap_or(true);
        let idle = inputs.active_behaviors == 0;

        if inputs.has_urgent {
            return Some(ThinkReason::Urgent);
        }
        if idle && cooled {
            return Some(ThinkReason::Ready);
        }
        if inputs.buffered_events >= self.backlog_threshold && cooled {
            return Some(ThinkReason::Backlog);
        }
        if idle
            && inputs
                .idle_for
                .map(|d| d >= self.idle_interval)
                .unwrap_or(false)
        {
            return Some(ThinkReason::Idle);
        }
        None
    }
}
