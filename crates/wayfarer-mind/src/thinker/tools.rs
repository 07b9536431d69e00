//! Agent tool surface
//!
//! Tool inputs arrive as untyped JSON from the reasoning backend. Each core
//! tool has an explicit field list; [`AgentToolCall::parse`] coerces and
//! range-checks the input or rejects it with a [`ToolArgError`].

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use wayfarer_common::{BehaviorPriority, BlockPos, Intent, ToolArgError, WayfarerError};

use super::messages::ToolDefinition;
use crate::domain::semantic::{MemoryContext, SemanticMemoryStore};
use crate::ports::ToolExecutor;

pub const TOOL_SPEAK: &str = "speak";
pub const TOOL_SET_INTENT: &str = "set_intent";
pub const TOOL_STOP_ALL: &str = "stop_all";
pub const TOOL_RECALL: &str = "recall";
pub const TOOL_REMEMBER: &str = "remember";

pub const MAX_SPEAK_CHARS: usize = 256;
pub const MAX_INTENT_COUNT: i64 = 2304;
pub const MAX_RECALL_TOP_K: i64 = 20;

/// A validated core tool call
#[derive(Debug, Clone, PartialEq)]
pub enum AgentToolCall {
    Speak {
        text: String,
    },
    SetIntent(Intent),
    StopAll,
    Recall {
        query: String,
        filter: BTreeMap<String, String>,
        top_k: Option<usize>,
    },
    Remember {
        content: String,
        tags: BTreeMap<String, String>,
    },
}

impl AgentToolCall {
    /// Parse a core tool call. Names outside the core set yield
    /// [`ToolArgError::UnknownTool`].
    pub fn parse(name: &str, input: &Value) -> Result<Self, ToolArgError> {
        let fields: &[&str] = match name {
            TOOL_SPEAK => &["text"],
            TOOL_SET_INTENT => &["action", "target", "x", "y", "z", "count", "priority"],
            TOOL_STOP_ALL => &[],
            TOOL_RECALL => &["query", "filter", "top_k"],
            TOOL_REMEMBER => &["content", "tags"],
            other => return Err(ToolArgError::UnknownTool(other.to_string())),
        };
        let args = Args::new(input, fields)?;

        match name {
            TOOL_SPEAK => {
                let text = args.required_str("text")?;
                let chars = text.chars().count();
                if chars == 0 || chars > MAX_SPEAK_CHARS {
                    return Err(out_of_range(
                        "text",
                        format!("length must be 1..={} characters", MAX_SPEAK_CHARS),
                    ));
                }
                Ok(AgentToolCall::Speak { text })
            }
            TOOL_SET_INTENT => {
                let action = args.required_str("action")?;
                let mut intent = Intent::new(action);
                if let Some(target) = args.optional_str("target")? {
                    intent = intent.with_target(target);
                }

                let coords = (args.optional_f64("x")?, args.optional_f64("y")?, args.optional_f64("z")?);
                match coords {
                    (Some(x), Some(y), Some(z)) => {
                        intent = intent.with_position(BlockPos::new(
                            block_coord("x", x)?,
                            block_coord("y", y)?,
                            block_coord("z", z)?,
                        ));
                    }
                    (None, None, None) => {}
                    (x, y, _) => {
                        let field = if x.is_none() {
                            "x"
                        } else if y.is_none() {
                            "y"
                        } else {
                            "z"
                        };
                        return Err(ToolArgError::Missing {
                            field: field.to_string(),
                        });
                    }
                }

                if let Some(count) = args.optional_i64("count")? {
                    if !(1..=MAX_INTENT_COUNT).contains(&count) {
                        return Err(out_of_range(
                            "count",
                            format!("must be 1..={}", MAX_INTENT_COUNT),
                        ));
                    }
                    intent = intent.with_count(count as u32);
                }

                if let Some(raw) = args.optional_str("priority")? {
                    let priority = match raw.to_ascii_lowercase().as_str() {
                        "low" | "normal" | "high" => BehaviorPriority::parse(&raw),
                        _ => None,
                    }
                    .ok_or_else(|| wrong_type("priority", "one of low, normal, high"))?;
                    intent = intent.with_priority(priority);
                }
                Ok(AgentToolCall::SetIntent(intent))
            }
            TOOL_STOP_ALL => Ok(AgentToolCall::StopAll),
            TOOL_RECALL => {
                let query = args.required_str("query")?;
                let filter = args.optional_tags("filter")?;
                let top_k = match args.optional_i64("top_k")? {
                    Some(k) if (1..=MAX_RECALL_TOP_K).contains(&k) => Some(k as usize),
                    Some(_) => {
                        return Err(out_of_range(
                            "top_k",
                            format!("must be 1..={}", MAX_RECALL_TOP_K),
                        ))
                    }
                    None => None,
                };
                Ok(AgentToolCall::Recall {
                    query,
                    filter,
                    top_k,
                })
            }
            _ => {
                let content = args.required_str("content")?;
                let tags = args.optional_tags("tags")?;
                Ok(AgentToolCall::Remember { content, tags })
            }
        }
    }
}

/// Field access over a tool input object
struct Args<'a> {
    /// None when the backend sent a bare null
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Args<'a> {
    fn new(input: &'a Value, allowed: &[&str]) -> Result<Self, ToolArgError> {
        let map = match input {
            Value::Object(map) => map,
            Value::Null => return Ok(Self { map: None }),
            _ => return Err(ToolArgError::NotAnObject),
        };
        let allowed: HashSet<&str> = allowed.iter().copied().collect();
        if let Some(field) = map.keys().find(|k| !allowed.contains(k.as_str())) {
            return Err(ToolArgError::Unexpected {
                field: field.clone(),
            });
        }
        Ok(Self { map: Some(map) })
    }

    /// Missing and null are both "absent"
    fn get(&self, field: &str) -> Option<&'a Value> {
        self.map?.get(field).filter(|v| !v.is_null())
    }

    fn required_str(&self, field: &str) -> Result<String, ToolArgError> {
        self.optional_str(field)?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolArgError::Missing {
                field: field.to_string(),
            })
    }

    fn optional_str(&self, field: &str) -> Result<Option<String>, ToolArgError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(wrong_type(field, "a string")),
        }
    }

    fn optional_f64(&self, field: &str) -> Result<Option<f64>, ToolArgError> {
        let value = match self.get(field) {
            None => return Ok(None),
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            Some(_) => None,
        };
        match value {
            Some(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(wrong_type(field, "a number")),
        }
    }

    fn optional_i64(&self, field: &str) -> Result<Option<i64>, ToolArgError> {
        match self.optional_f64(field)? {
            None => Ok(None),
            Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(Some(v as i64)),
            Some(_) => Err(wrong_type(field, "an integer")),
        }
    }

    fn optional_tags(&self, field: &str) -> Result<BTreeMap<String, String>, ToolArgError> {
        let map = match self.get(field) {
            None => return Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(wrong_type(field, "an object of string values")),
        };
        map.iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err(wrong_type(field, "an object of string values")),
                };
                Ok((k.clone(), value))
            })
            .collect()
    }
}

fn wrong_type(field: &str, expected: &str) -> ToolArgError {
    ToolArgError::WrongType {
        field: field.to_string(),
        expected: expected.to_string(),
    }
}

fn out_of_range(field: &str, reason: String) -> ToolArgError {
    ToolArgError::OutOfRange {
        field: field.to_string(),
        reason,
    }
}

fn block_coord(field: &str, value: f64) -> Result<i32, ToolArgError> {
    let floored = value.floor();
    if floored < i32::MIN as f64 || floored > i32::MAX as f64 {
        return Err(out_of_range(field, "outside the block grid".to_string()));
    }
    Ok(floored as i32)
}

/// Where an intent came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOrigin {
    /// Requested by the reasoning loop through `set_intent`
    Thinker,
    /// Submitted directly by an external caller
    Direct,
}

/// Side effects the tick loop applies
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Speak(String),
    Intent { intent: Intent, origin: IntentOrigin },
    StopAll,
}

/// Queue of tool side effects, drained by the tick loop
#[derive(Debug, Default)]
pub struct OutputQueue {
    items: Mutex<VecDeque<AgentOutput>>,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, output: AgentOutput) {
        self.items.lock().push_back(output);
    }

    pub fn drain(&self) -> Vec<AgentOutput> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// The tool executor handed to the reasoning loop
///
/// Core tools are handled here; anything else is delegated to an optional
/// external executor.
pub struct AgentTools {
    store: Arc<SemanticMemoryStore>,
    outputs: Arc<OutputQueue>,
    /// Context of the current invocation, set by the scheduler at launch
    context: RwLock<MemoryContext>,
    external: Option<Arc<dyn ToolExecutor>>,
}

impl AgentTools {
    pub fn new(store: Arc<SemanticMemoryStore>, outputs: Arc<OutputQueue>) -> Self {
        Self {
            store,
            outputs,
            context: RwLock::new(MemoryContext::default()),
            external: None,
        }
    }

    pub fn with_external(mut self, external: Arc<dyn ToolExecutor>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn set_context(&self, context: MemoryContext) {
        *self.context.write() = context;
    }

    pub fn context(&self) -> MemoryContext {
        self.context.read().clone()
    }

    fn core_definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                TOOL_SPEAK,
                "Say something in chat.",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string", "maxLength": MAX_SPEAK_CHARS}},
                    "required": ["text"]
                }),
            ),
            ToolDefinition::new(
                TOOL_SET_INTENT,
                "Start a behavior (goto, mine, follow, collect, ...).",
                json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string"},
                        "target": {"type": "string"},
                        "x": {"type": "number"},
                        "y": {"type": "number"},
                        "z": {"type": "number"},
                        "count": {"type": "integer", "minimum": 1, "maximum": MAX_INTENT_COUNT},
                        "priority": {"type": "string", "enum": ["low", "normal", "high"]}
                    },
                    "required": ["action"]
                }),
            ),
            ToolDefinition::new(
                TOOL_STOP_ALL,
                "Cancel every running behavior.",
                json!({"type": "object", "properties": {}}),
            ),
            ToolDefinition::new(
                TOOL_RECALL,
                "Search long-term memory.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "filter": {"type": "object", "additionalProperties": {"type": "string"}},
                        "top_k": {"type": "integer", "minimum": 1, "maximum": MAX_RECALL_TOP_K}
                    },
                    "required": ["query"]
                }),
            ),
            ToolDefinition::new(
                TOOL_REMEMBER,
                "Store a fact in long-term memory.",
                json!({
                    "type": "object",
                    "properties": {
                        "content": {"type": "string"},
                        "tags": {"type": "object", "additionalProperties": {"type": "string"}}
                    },
                    "required": ["content"]
                }),
            ),
        ]
    }

    fn run_core(&self, call: AgentToolCall) -> Result<String, WayfarerError> {
        let result = match call {
            AgentToolCall::Speak { text } => {
                self.outputs.push(AgentOutput::Speak(text));
                json!({"status": "ok"})
            }
            AgentToolCall::SetIntent(intent) => {
                let description = intent.describe();
                self.outputs.push(AgentOutput::Intent {
                    intent,
                    origin: IntentOrigin::Thinker,
                });
                json!({"status": "queued", "intent": description})
            }
            AgentToolCall::StopAll => {
                self.outputs.push(AgentOutput::StopAll);
                json!({"status": "ok"})
            }
            AgentToolCall::Recall {
                query,
                filter,
                top_k,
            } => {
                let context = self.context();
                let hits = self
                    .store
                    .recall(&query, &filter, &context, top_k.unwrap_or(0));
                let items: Vec<Value> = hits
                    .iter()
                    .map(|hit| {
                        json!({
                            "content": hit.entry.content,
                            "tags": hit.entry.tags,
                            "tick": hit.entry.tick_id,
                            "score": hit.score,
                        })
                    })
                    .collect();
                json!({"status": "ok", "items": items})
            }
            AgentToolCall::Remember { content, tags } => {
                let context = self.context();
                let entry = self.store.remember(&content, tags, &context, "tool:remember")?;
                json!({
                    "status": "ok",
                    "id": entry.id,
                    "tick": entry.tick_id,
                    "tags": entry.tags,
                })
            }
        };
        Ok(result.to_string())
    }
}

#[async_trait]
impl ToolExecutor for AgentTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = Self::core_definitions();
        if let Some(external) = &self.external {
            let core: HashSet<String> = definitions.iter().map(|d| d.name.clone()).collect();
            definitions.extend(
                external
                    .definitions()
                    .into_iter()
                    .filter(|d| !core.contains(&d.name)),
            );
        }
        definitions
    }

    async fn execute(
        &self,
        name: &str,
        input: &Value,
        cancel: &CancellationToken,
    ) -> Result<String, WayfarerError> {
        if cancel.is_cancelled() {
            return Err(WayfarerError::Cancelled);
        }
        match AgentToolCall::parse(name, input) {
            Ok(call) => {
                debug!(tool = name, "executing core tool");
                self.run_core(call)
            }
            Err(ToolArgError::UnknownTool(_)) => match &self.external {
                Some(external) => external.execute(name, input, cancel).await,
                None => {
                    info!(tool = name, "no executor for tool");
                    Ok(json!({
                        "status": "unavailable",
                        "reason": format!("no executor for tool `{}`", name),
                    })
                    .to_string())
                }
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::embedding::TokenEmbedding;

    fn tools() -> (AgentTools, Arc<OutputQueue>) {
        let store = Arc::new(SemanticMemoryStore::new(Arc::new(TokenEmbedding::new(64)), 16));
        let outputs = Arc::new(OutputQueue::new());
        (AgentTools::new(store, outputs.clone()), outputs)
    }

    #[test]
    fn test_parse_intent_with_coercion() {
        let call = AgentToolCall::parse(
            TOOL_SET_INTENT,
            &json!({"action": "mine", "target": "oak_log", "x": "10", "y": 64.0, "z": -3.5, "count": 4.0, "priority": "HIGH"}),
        )
        .unwrap();
        let expected = Intent::new("mine")
            .with_target("oak_log")
            .with_position(BlockPos::new(10, 64, -4))
            .with_count(4)
            .with_priority(BehaviorPriority::High);
        assert_eq!(call, AgentToolCall::SetIntent(expected));
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert_eq!(
            AgentToolCall::parse(TOOL_SPEAK, &json!("hi")),
            Err(ToolArgError::NotAnObject)
        );
        assert!(matches!(
            AgentToolCall::parse(TOOL_SPEAK, &json!({"text": "hi", "volume": 3})),
            Err(ToolArgError::Unexpected { .. })
        ));
        assert!(matches!(
            AgentToolCall::parse(TOOL_SET_INTENT, &json!({"action": "mine", "count": 0})),
            Err(ToolArgError::OutOfRange { .. })
        ));
        assert!(matches!(
            AgentToolCall::parse(TOOL_SET_INTENT, &json!({"action": "mine", "count": 2.5})),
            Err(ToolArgError::WrongType { .. })
        ));
        assert_eq!(
            AgentToolCall::parse(TOOL_SET_INTENT, &json!({"action": "goto", "x": 1, "z": 2})),
            Err(ToolArgError::Missing {
                field: "y".to_string()
            })
        );
        assert!(matches!(
            AgentToolCall::parse(TOOL_SET_INTENT, &json!({"action": "goto", "priority": "urgent"})),
            Err(ToolArgError::WrongType { .. })
        ));
        assert!(matches!(
            AgentToolCall::parse(TOOL_RECALL, &json!({"query": "iron", "top_k": 21})),
            Err(ToolArgError::OutOfRange { .. })
        ));
        let long = "a".repeat(MAX_SPEAK_CHARS + 1);
        assert!(matches!(
            AgentToolCall::parse(TOOL_SPEAK, &json!({ "text": long })),
            Err(ToolArgError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_stop_all_accepts_null() {
        assert_eq!(
            AgentToolCall::parse(TOOL_STOP_ALL, &Value::Null),
            Ok(AgentToolCall::StopAll)
        );
    }

    #[tokio::test]
    async fn test_speak_and_intent_are_queued() {
        let (tools, outputs) = tools();
        let cancel = CancellationToken::new();
        tools
            .execute(TOOL_SPEAK, &json!({"text": "hello"}), &cancel)
            .await
            .unwrap();
        tools
            .execute(TOOL_SET_INTENT, &json!({"action": "follow", "target": "alex"}), &cancel)
            .await
            .unwrap();

        let drained = outputs.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], AgentOutput::Speak("hello".to_string()));
        assert!(matches!(
            &drained[1],
            AgentOutput::Intent { origin: IntentOrigin::Thinker, intent } if intent.action == "follow"
        ));
    }

    #[tokio::test]
    async fn test_remember_then_recall() {
        let (tools, _) = tools();
        tools.set_context(MemoryContext::at_tick(7).with_player("alex"));
        let cancel = CancellationToken::new();

        let stored: Value = serde_json::from_str(
            &tools
                .execute(TOOL_REMEMBER, &json!({"content": "iron ore near the river"}), &cancel)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(stored["status"], "ok");
        assert_eq!(stored["tick"], 7);
        assert_eq!(stored["tags"]["player"], "alex");

        let recalled: Value = serde_json::from_str(
            &tools
                .execute(TOOL_RECALL, &json!({"query": "iron ore"}), &cancel)
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(recalled["items"][0]["content"], "iron ore near the river");
    }

    #[tokio::test]
    async fn test_unknown_tool_without_executor() {
        let (tools, _) = tools();
        let result: Value = serde_json::from_str(
            &tools
                .execute("inventory", &json!({}), &CancellationToken::new())
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(result["status"], "unavailable");
    }

    #[tokio::test]
    async fn test_invalid_args_are_errors() {
        let (tools, outputs) = tools();
        let err = tools
            .execute(TOOL_SPEAK, &json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WayfarerError::ToolArgs(ToolArgError::Missing { .. })));
        assert!(outputs.is_empty());
    }
}
