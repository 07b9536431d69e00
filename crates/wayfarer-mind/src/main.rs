//! Wayfarer Mind Binary
//!
//! Runs the decision loop against offline collaborators: a still world,
//! a logging body and chat, a few timer behaviors and a backend that only
//! reflects. Useful for watching the scheduler and episode log work.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wayfarer_common::{BodyError, Snapshot, WayfarerError, VERSION};
use wayfarer_mind::{
    config::MindConfig,
    infra::runner::BehaviorContext,
    ports::{BodyController, BodyInput, MessageSender, ReasoningBackend, WorldSource},
    thinker::messages::{BackendResponse, ContentBlock, Message, StopReason, ToolDefinition},
    Collaborators, EventBus, LoopAgent, TaskBehaviorRunner,
};

struct StillWorld {
    snapshot: Snapshot,
}

impl WorldSource for StillWorld {
    fn state(&self) -> Option<Snapshot> {
        Some(self.snapshot.clone())
    }
}

struct LoggingBody;

impl BodyController for LoggingBody {
    fn tick(&self, input: &BodyInput) -> Result<(), BodyError> {
        trace!(yaw = input.yaw, pitch = input.pitch, "body tick");
        Ok(())
    }
}

struct LoggingChat;

impl MessageSender for LoggingChat {
    fn send_chat(&self, text: &str) -> Result<(), WayfarerError> {
        info!(text, "chat");
        Ok(())
    }
}

/// Ends every turn with a single reflection
struct ReflectingBackend;

#[async_trait]
impl ReasoningBackend for ReflectingBackend {
    async fn call_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<BackendResponse, WayfarerError> {
        Ok(BackendResponse {
            content: vec![ContentBlock::text(format!(
                "Offline: {} messages, {} tools available. Nothing to do.",
                messages.len(),
                tools.len()
            ))],
            stop_reason: StopReason::EndTurn,
        })
    }
}

fn timer_behavior(ctx: BehaviorContext) -> futures::future::BoxFuture<'static, Result<(), String>> {
    async move {
        let secs = u64::from(ctx.intent.count.unwrap_or(1));
        tokio::time::sleep(Duration::from_secs(secs)).await;
        Ok(())
    }
    .boxed()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting Wayfarer Mind v{}", VERSION);

    // Load configuration
    let config = MindConfig::load()?;
    info!("Loaded configuration: {:?}", config.loop_settings);

    let runner = Arc::new(TaskBehaviorRunner::new());
    runner.register("wait", false, timer_behavior);
    runner.register("goto", false, timer_behavior);

    let agent = LoopAgent::new(
        config,
        Collaborators {
            world: Arc::new(StillWorld {
                snapshot: Snapshot::default(),
            }),
            body: Arc::new(LoggingBody),
            runner: runner.clone(),
            messenger: Arc::new(LoggingChat),
            backend: Arc::new(ReflectingBackend),
            external_tools: None,
            bus: Arc::new(EventBus::new()),
        },
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for CTRL+C");
        }
        info!("Received shutdown signal");
        signal.cancel();
    });

    agent.clone().run(shutdown).await;
    runner.shutdown();

    info!("Final status: {:?}", agent.status());
    Ok(())
}
