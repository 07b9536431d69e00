//! Intents, behavior priorities and completion records

use serde::{Deserialize, Serialize};
use std::fmt;

use super::geometry::BlockPos;

/// Inbox priority of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Scheduling priority handed to the behavior runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorPriority {
    Low,
    Normal,
    High,
}

impl Default for BehaviorPriority {
    fn default() -> Self {
        BehaviorPriority::Normal
    }
}

impl BehaviorPriority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" | "urgent" => Some(Self::High),
            _ => None,
        }
    }
}

/// Something the agent decided to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Behavior name the runner resolves ("goto", "mine", "follow", ...)
    pub action: String,
    /// Optional named target (player, entity or block name)
    pub target: Option<String>,
    /// Optional block position
    pub position: Option<BlockPos>,
    /// Optional repetition count
    pub count: Option<u32>,
    pub priority: BehaviorPriority,
}

impl Intent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: None,
            position: None,
            count: None,
            priority: BehaviorPriority::Normal,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_position(mut self, position: BlockPos) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_priority(mut self, priority: BehaviorPriority) -> Self {
        self.priority = priority;
        self
    }

    /// One-line description used in episode summaries
    pub fn describe(&self) -> String {
        let mut out = self.action.clone();
        if let Some(target) = &self.target {
            out.push(' ');
            out.push_str(target);
        }
        if let Some(pos) = &self.position {
            out.push_str(&format!(" @{}", pos));
        }
        if let Some(count) = self.count {
            out.push_str(&format!(" x{}", count));
        }
        out
    }
}

/// Completion notification for a behavior run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorEnd {
    /// Behavior name
    pub name: String,
    pub run_id: u64,
    /// "completed", "cancelled", "failed: ..." and so on
    pub reason: String,
}

impl BehaviorEnd {
    pub fn new(name: impl Into<String>, run_id: u64, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_id,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        let reason = self.reason.to_ascii_lowercase();
        reason == "completed" || reason == "done" || reason == "success"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::Urgent);
    }

    #[test]
    fn test_intent_describe() {
        let intent = Intent::new("mine")
            .with_target("oak_log")
            .with_position(BlockPos::new(1, 64, -3))
            .with_count(4);
        assert_eq!(intent.describe(), "mine oak_log @(1,64,-3) x4");
    }

    #[test]
    fn test_behavior_priority_parse() {
        assert_eq!(BehaviorPriority::parse(" HIGH "), Some(BehaviorPriority::High));
        assert_eq!(BehaviorPriority::parse("whenever"), None);
    }
}
