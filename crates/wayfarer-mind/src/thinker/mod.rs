//! Reasoning loop
//!
//! One [`Thinker::think`] call is one bounded conversation with the
//! reasoning backend. The loop has no iteration limit of its own: it ends
//! when the backend finishes its turn, on a backend error, or when the
//! caller's cancellation token fires.

pub mod messages;
pub mod tools;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use wayfarer_common::WayfarerError;

use crate::ports::{ReasoningBackend, ToolExecutor};
use messages::{BackendResponse, ContentBlock, Message, StopReason};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Wayfarer, an autonomous agent living in a block world. \
Read the status, memories and recent events, then act through the provided tools. \
Use set_intent to start behaviors, speak to talk to players, and remember facts worth keeping. \
Keep thoughts short and end your turn once you have decided.";

/// Stop reason recorded when cancellation was observed
pub const STOP_INTERRUPTED: &str = "interrupted";

/// Meta-episode outcomes
pub const OUTCOME_THINKER_OK: &str = "thinker_ok";
pub const OUTCOME_THINKER_ERROR: &str = "thinker_error";
pub const OUTCOME_THINKER_INTERRUPTED: &str = "thinker_interrupted";
pub const OUTCOME_THINKER_TIMEOUT: &str = "thinker_timeout";

/// Reasoning failures, as recorded on meta episodes
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThinkerError {
    #[error("backend failure: {0}")]
    Backend(String),

    #[error("invocation interrupted")]
    Interrupted,

    #[error("invocation timed out")]
    Timeout,
}

impl ThinkerError {
    pub fn outcome(&self) -> &'static str {
        match self {
            ThinkerError::Backend(_) => OUTCOME_THINKER_ERROR,
            ThinkerError::Interrupted => OUTCOME_THINKER_INTERRUPTED,
            ThinkerError::Timeout => OUTCOME_THINKER_TIMEOUT,
        }
    }
}

impl From<WayfarerError> for ThinkerError {
    fn from(err: WayfarerError) -> Self {
        match err {
            WayfarerError::Cancelled => ThinkerError::Interrupted,
            WayfarerError::Timeout(_) => ThinkerError::Timeout,
            other => ThinkerError::Backend(other.to_string()),
        }
    }
}

/// Everything the prompt is built from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkContext {
    /// Why this invocation was launched
    pub trigger: String,
    pub status: String,
    /// Recent episodes and recalled facts
    pub memory: String,
    pub spatial: String,
    /// Drained buffer, one line per event
    pub events: Vec<String>,
}

impl ThinkContext {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("## Status\n");
        out.push_str(or_none(&self.status));
        out.push_str("\n\n## Memory\n");
        out.push_str(or_none(&self.memory));
        out.push_str("\n\n## Surroundings\n");
        out.push_str(or_none(&self.spatial));
        out.push_str(&format!("\n\n## Events (trigger: {})\n", self.trigger));
        if self.events.is_empty() {
            out.push_str("(none)");
        } else {
            for event in &self.events {
                out.push_str("- ");
                out.push_str(event);
                out.push('\n');
            }
        }
        out
    }
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "(none)"
    } else {
        text
    }
}

/// One executed tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub result: String,
    pub is_error: bool,
}

/// Result of one invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkerTrace {
    pub thoughts: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub stop_reason: String,
}

impl ThinkerTrace {
    pub fn interrupted(&self) -> bool {
        self.stop_reason == STOP_INTERRUPTED
    }

    /// Thoughts joined for the episode log
    pub fn thought_summary(&self) -> String {
        truncate(&self.thoughts.join(" | "), 240)
    }

    /// Successful tool calls, e.g. `set_intent{"action":"mine"}; speak{...}`
    pub fn decision_summary(&self) -> String {
        let calls: Vec<String> = self
            .tool_calls
            .iter()
            .filter(|c| !c.is_error)
            .map(|c| format!("{}{}", c.name, c.input))
            .collect();
        truncate(&calls.join("; "), 240)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Tool-use conversation driver
pub struct Thinker {
    backend: Arc<dyn ReasoningBackend>,
    tools: Arc<dyn ToolExecutor>,
    system_prompt: String,
}

impl Thinker {
    pub fn new(backend: Arc<dyn ReasoningBackend>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            backend,
            tools,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Run one invocation. Cancellation yields `Ok` with stop reason
    /// `interrupted` and whatever was gathered so far.
    #[instrument(skip_all, fields(trigger = %context.trigger))]
    pub async fn think(
        &self,
        context: &ThinkContext,
        cancel: &CancellationToken,
    ) -> Result<ThinkerTrace, ThinkerError> {
        let definitions = self.tools.definitions();
        let mut conversation = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(context.render()),
        ];
        let mut trace = ThinkerTrace::default();

        loop {
            if cancel.is_cancelled() {
                info!(turns = conversation.len(), "reasoning interrupted");
                trace.stop_reason = STOP_INTERRUPTED.to_string();
                return Ok(trace);
            }

            let response: BackendResponse = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reasoning interrupted during backend call");
                    trace.stop_reason = STOP_INTERRUPTED.to_string();
                    return Ok(trace);
                }
                result = self.backend.call_with_tools(&conversation, &definitions) => {
                    result.map_err(|e| {
                        warn!(error = %e, "reasoning backend failed");
                        ThinkerError::from(e)
                    })?
                }
            };

            for thought in response.thoughts() {
                info!(thought = %thought, "thought");
                trace.thoughts.push(thought);
            }

            let calls = response.tool_calls();
            if calls.is_empty() {
                trace.stop_reason = stop_reason_name(response.stop_reason).to_string();
                if response.stop_reason != StopReason::EndTurn {
                    debug!(stop_reason = %trace.stop_reason, "turn ended without tool calls");
                }
                return Ok(trace);
            }

            let mut results = Vec::with_capacity(calls.len());
            for (id, name, input) in calls {
                let (content, is_error) = match self.tools.execute(&name, &input, cancel).await {
                    Ok(content) => (content, false),
                    Err(e) => {
                        warn!(tool = %name, error = %e, "tool call failed");
                        let body = serde_json::json!({"status": "error", "error": e.to_string()});
                        (body.to_string(), true)
                    }
                };
                debug!(tool = %name, is_error, "tool call finished");
                trace.tool_calls.push(ToolCallRecord {
                    id: id.clone(),
                    name,
                    input,
                    result: content.clone(),
                    is_error,
                });
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content,
                    is_error,
                });
            }

            conversation.push(Message::assistant(response.content));
            conversation.push(Message::tool_results(results));
        }
    }
}

fn stop_reason_name(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "end_turn",
        StopReason::ToolUse => "tool_use",
        StopReason::MaxTokens => "max_tokens",
        StopReason::Other => "other",
    }
}
