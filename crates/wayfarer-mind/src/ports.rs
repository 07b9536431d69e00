//! Collaborator contracts
//!
//! The decision core talks to the outside world only through these traits.
//! Implementations live outside this crate, except for the local ones in
//! [`crate::infra`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wayfarer_common::{BehaviorEnd, BodyError, Intent, Snapshot, WayfarerError};

use crate::thinker::messages::{BackendResponse, Message, ToolDefinition};

/// Pulls the current world snapshot once per tick
pub trait WorldSource: Send + Sync {
    /// None until the client has spawned into the world
    fn state(&self) -> Option<Snapshot>;
}

/// Per-tick input to the body controller
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BodyInput {
    pub yaw: f32,
    pub pitch: f32,
}

/// Movement/body controller
pub trait BodyController: Send + Sync {
    fn tick(&self, input: &BodyInput) -> Result<(), BodyError>;
}

/// Executes behaviors and reports their completion
pub trait BehaviorRunner: Send + Sync {
    /// Advance running behaviors by one tick
    fn tick(&self, snapshot: Option<&Snapshot>);

    fn active_count(&self) -> usize;

    /// Start a behavior for the intent; returns its run id when accepted
    fn start(&self, intent: &Intent) -> Option<u64>;

    fn cancel_all(&self);

    /// Whether a running behavior currently controls the head
    fn owns_head(&self) -> bool;

    /// Hand over the completion stream. Yields the receiver once.
    fn take_completions(&self) -> Option<mpsc::UnboundedReceiver<BehaviorEnd>>;
}

/// Outbound chat
pub trait MessageSender: Send + Sync {
    fn send_chat(&self, text: &str) -> Result<(), WayfarerError>;
}

/// Tool-using reasoning backend (LLM transport)
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn call_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<BackendResponse, WayfarerError>;
}

/// Executes tool calls requested by the reasoning backend
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools this executor understands
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(
        &self,
        name: &str,
        input: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, WayfarerError>;
}
