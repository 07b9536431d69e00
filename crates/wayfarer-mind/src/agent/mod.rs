//! Tick scheduler
//!
//! [`LoopAgent`] owns every memory structure and drives them on a fixed
//! tick. Per tick, in order:
//!
//! 1. advance the tick counter
//! 2. step behaviors and the body, interpolating the head aim
//! 3. diff perception, update spatial memory and publish what changed
//! 4. drain the inbox into the event buffer (completions are reconciled here)
//! 5. force-close expired episodes
//! 6. expire stale pending completions and sweep spatial memory
//! 7. apply queued speak/intent outputs, then reap a finished invocation
//! 8. evaluate the think trigger and launch an invocation if warranted
//! 9. track how long the body has been idle
//!
//! At most one reasoning invocation runs at a time, on its own task.

mod binding;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wayfarer_common::{BehaviorEnd, BodyError, Intent, Priority, Snapshot, WayfarerError};

use crate::config::MindConfig;
use crate::domain::aim::HeadAim;
use crate::domain::automemory::AutoMemory;
use crate::domain::episodes::EpisodeLog;
use crate::domain::events::{names, EventBuffer, EventInbox, InboundEvent};
use crate::domain::pending::PendingBehaviorEnds;
use crate::domain::perception::{Perception, PerceptionEvent};
use crate::domain::semantic::{MemoryContext, SemanticMemoryStore};
use crate::domain::spatial::SpatialMemory;
use crate::domain::trigger::{ThinkReason, TriggerInputs, TriggerPolicy};
use crate::infra::bus::EventBus;
use crate::infra::embedding::TokenEmbedding;
use crate::ports::{BehaviorRunner, BodyController, BodyInput, MessageSender, ReasoningBackend, ToolExecutor, WorldSource};
use crate::thinker::tools::{AgentOutput, AgentTools, IntentOrigin, OutputQueue};
use crate::thinker::{ThinkContext, Thinker, ThinkerError, ThinkerTrace};

/// Event pushed when an intent could not be started
pub const EVENT_INTENT_REJECTED: &str = "intent_rejected";

/// External collaborators the agent is wired to
pub struct Collaborators {
    pub world: Arc<dyn WorldSource>,
    pub body: Arc<dyn BodyController>,
    pub runner: Arc<dyn BehaviorRunner>,
    pub messenger: Arc<dyn MessageSender>,
    pub backend: Arc<dyn ReasoningBackend>,
    /// Executor for tools beyond the core set
    pub external_tools: Option<Arc<dyn ToolExecutor>>,
    pub bus: Arc<EventBus>,
}

/// What one reasoning invocation produced
#[derive(Debug)]
pub(crate) struct InvocationReport {
    pub trace: ThinkerTrace,
    pub error: Option<ThinkerError>,
}

/// The in-flight reasoning invocation
pub(crate) struct Invocation {
    pub id: u64,
    pub tick_id: u64,
    pub trigger: ThinkReason,
    pub events: Vec<String>,
    pub cancel: CancellationToken,
    /// Behaviors started while this invocation was in flight
    pub run_ids: Vec<u64>,
    pub actions: Vec<String>,
    pub handle: JoinHandle<InvocationReport>,
}

/// Wall-clock timestamps derived from the tokio clock, so expiry and
/// cooldowns advance together (and pause together in tests)
#[derive(Debug, Clone, Copy)]
struct LoopClock {
    anchor: Instant,
    wall: DateTime<Utc>,
}

impl LoopClock {
    fn start() -> Self {
        Self {
            anchor: Instant::now(),
            wall: Utc::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(Instant::now().duration_since(self.anchor))
            .map(|elapsed| self.wall + elapsed)
            .unwrap_or(self.wall)
    }
}

#[derive(Debug, Default)]
struct Timing {
    last_think_end: Option<Instant>,
    idle_since: Option<Instant>,
}

/// Compact view of the scheduler state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub tick: u64,
    pub thinking: bool,
    pub active_behaviors: usize,
    pub buffered_events: usize,
    pub open_episodes: usize,
    pub pending_completions: usize,
    pub memories: usize,
    pub remembered_entities: usize,
}

/// The decision core
pub struct LoopAgent {
    config: MindConfig,
    world: Arc<dyn WorldSource>,
    body: Arc<dyn BodyController>,
    runner: Arc<dyn BehaviorRunner>,
    messenger: Arc<dyn MessageSender>,
    bus: Arc<EventBus>,

    tick: AtomicU64,
    next_invocation_id: AtomicU64,
    buffer: EventBuffer,
    inbox: Arc<EventInbox>,
    spatial: SpatialMemory,
    memory: Arc<SemanticMemoryStore>,
    episodes: EpisodeLog,
    pending: PendingBehaviorEnds,
    auto_memory: AutoMemory,
    perception: Mutex<Perception>,
    aim: Mutex<HeadAim>,
    trigger: TriggerPolicy,

    thinker: Arc<Thinker>,
    tools: Arc<AgentTools>,
    outputs: Arc<OutputQueue>,
    invocation: Mutex<Option<Invocation>>,
    timing: Mutex<Timing>,
    clock: LoopClock,
}

impl LoopAgent {
    pub fn new(config: MindConfig, collaborators: Collaborators) -> Arc<Self> {
        let embedder = Arc::new(TokenEmbedding::new(config.semantic.embedding_dimension));
        let memory = Arc::new(
            SemanticMemoryStore::new(embedder, config.semantic.capacity)
                .with_default_top_k(config.semantic.default_top_k),
        );
        let outputs = Arc::new(OutputQueue::new());
        let mut tools = AgentTools::new(memory.clone(), outputs.clone());
        if let Some(external) = collaborators.external_tools {
            tools = tools.with_external(external);
        }
        let tools = Arc::new(tools);
        let thinker = Arc::new(
            Thinker::new(collaborators.backend, tools.clone())
                .with_system_prompt(config.thinker.system_prompt.clone()),
        );

        let inbox = Arc::new(EventInbox::new(config.buffer.inbox_capacity));
        for topic in [names::ENTITY_APPEAR, names::ENTITY_LEAVE, names::DAMAGE] {
            let inbox = inbox.clone();
            collaborators.bus.subscribe(topic, move |event: &InboundEvent| {
                if !inbox.try_push(event.clone()) {
                    debug!(event = %event.name, "inbox rejected perception event");
                }
            });
        }

        let loop_settings = &config.loop_settings;
        let trigger = TriggerPolicy {
            cooldown: loop_settings.think_cooldown(),
            backlog_threshold: loop_settings.backlog_threshold,
            idle_interval: loop_settings.idle_interval(),
        };

        Arc::new(Self {
            world: collaborators.world,
            body: collaborators.body,
            runner: collaborators.runner,
            messenger: collaborators.messenger,
            bus: collaborators.bus,
            tick: AtomicU64::new(0),
            next_invocation_id: AtomicU64::new(1),
            buffer: EventBuffer::new(config.buffer.capacity),
            inbox,
            spatial: SpatialMemory::new(
                chrono::Duration::seconds(config.spatial.entity_max_age_secs),
                config.spatial.block_cap,
            )
            .with_summary_limit(config.spatial.summary_entity_limit),
            auto_memory: AutoMemory::new(memory.clone(), config.episodes.auto_memory_cooldown_ticks),
            memory,
            episodes: EpisodeLog::new(config.episodes.capacity),
            pending: PendingBehaviorEnds::new(config.episodes.pending_ttl_ticks, config.episodes.pending_max),
            perception: Mutex::new(Perception::new()),
            aim: Mutex::new(HeadAim::new(loop_settings.head_speed_deg)),
            trigger,
            thinker,
            tools,
            outputs,
            invocation: Mutex::new(None),
            timing: Mutex::new(Timing::default()),
            clock: LoopClock::start(),
            config,
        })
    }

    /// Drive the loop until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let forwarder = self.spawn_completion_forwarder(shutdown.clone());
        let mut interval = tokio::time::interval(self.config.loop_settings.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_ms = self.config.loop_settings.tick_interval_ms,
            "decision loop started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.tick(),
            }
        }

        if let Some(invocation) = self.invocation.lock().as_ref() {
            invocation.cancel.cancel();
        }
        if let Some(forwarder) = forwarder {
            if let Err(e) = forwarder.await {
                warn!(error = %e, "completion forwarder ended abnormally");
            }
        }
        info!(tick = self.current_tick(), "decision loop stopped");
    }

    /// Forward behavior completions into the inbox. The runner hands its
    /// completion stream out once, so only the first call spawns a task.
    pub fn spawn_completion_forwarder(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let mut completions = self.runner.take_completions()?;
        let inbox = self.inbox.clone();
        Some(tokio::spawn(async move {
            loop {
                let end = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    end = completions.recv() => match end {
                        Some(end) => end,
                        None => break,
                    },
                };
                let payload = match serde_json::to_value(&end) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(run_id = end.run_id, error = %e, "unserializable completion");
                        continue;
                    }
                };
                if !inbox.try_push(InboundEvent::new(names::BEHAVIOR_END, payload, Priority::Normal)) {
                    warn!(run_id = end.run_id, action = %end.name, "inbox full, completion dropped");
                }
            }
            debug!("completion forwarder stopped");
        }))
    }

    /// Run one tick. Each stage logs its own failures and never aborts the
    /// stages after it.
    pub fn tick(&self) {
        let tick = self.tick.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = self.world.state();

        self.step_body(snapshot.as_ref(), tick);
        if let Some(snapshot) = &snapshot {
            self.perceive(snapshot, tick);
        }
        self.drain_inbox(tick);

        let now = self.clock.now();
        let expired = self.episodes.close_expired_open(
            chrono::Duration::seconds(self.config.episodes.open_timeout_secs),
            now,
            tick,
        );
        for episode in &expired {
            self.remember_outcome(episode, tick);
        }

        let held: Vec<u64> = self
            .invocation
            .lock()
            .as_ref()
            .map(|i| i.run_ids.clone())
            .unwrap_or_default();
        let dropped = self.pending.gc(tick, &held);
        if dropped > 0 {
            debug!(tick, dropped, "expired pending completions");
        }
        let swept = self.spatial.gc_at(now);
        if swept.entities_removed + swept.blocks_removed > 0 {
            debug!(
                tick,
                entities = swept.entities_removed,
                blocks = swept.blocks_removed,
                "spatial memory swept"
            );
        }

        self.apply_outputs(tick);
        self.reap_invocation(tick);

        if self.buffer.has_urgent() && self.interrupt() {
            info!(tick, "urgent event pending, interrupting reasoning");
        }
        if let Some(reason) = self.should_think() {
            self.launch(reason, snapshot.as_ref(), tick);
        }

        let mut timing = self.timing.lock();
        if self.runner.active_count() == 0 {
            timing.idle_since.get_or_insert_with(Instant::now);
        } else {
            timing.idle_since = None;
        }
    }

    fn step_body(&self, snapshot: Option<&Snapshot>, tick: u64) {
        self.runner.tick(snapshot);

        let (yaw, pitch) = {
            let mut aim = self.aim.lock();
            match snapshot {
                Some(s) if self.runner.owns_head() => {
                    aim.mirror(s.yaw, s.pitch);
                    (aim.yaw, aim.pitch)
                }
                _ => aim.step(),
            }
        };

        match self.body.tick(&BodyInput { yaw, pitch }) {
            Ok(()) => {}
            Err(BodyError::NotConnected) => debug!(tick, "body not connected yet"),
            Err(e) => warn!(tick, error = %e, "body tick failed"),
        }
    }

    fn perceive(&self, snapshot: &Snapshot, tick: u64) {
        let changes = self.perception.lock().diff(snapshot);

        let now = self.clock.now();
        self.spatial.update_entities_at(&snapshot.entities, tick, now);
        self.spatial.update_blocks_at(&snapshot.blocks, tick, now);

        for change in &changes {
            match change {
                PerceptionEvent::Leave { id, .. } => {
                    self.spatial.mark_entity_left(*id, tick);
                }
                PerceptionEvent::Damage { amount, .. } => {
                    let context = self.memory_context(tick);
                    self.auto_memory.on_damage(*amount, snapshot.position, &context);
                }
                PerceptionEvent::Appear(_) => {}
            }
            let event = InboundEvent::new(change.name(), change.payload(), change.priority());
            self.bus.publish(&event);
        }
    }

    fn drain_inbox(&self, tick: u64) {
        for event in self.inbox.drain() {
            if event.name == names::BEHAVIOR_END {
                match serde_json::from_value::<BehaviorEnd>(event.payload.clone()) {
                    Ok(end) => self.handle_behavior_end(end, tick),
                    Err(e) => warn!(tick, error = %e, "malformed behavior_end payload"),
                }
            }
            if !self.buffer.push_at(event.name.clone(), event.payload, event.priority, tick) {
                debug!(tick, event = %event.name, "event buffer discarded event");
            }
        }
    }

    /// Speak, start intents and stop behaviors queued by tools or callers
    fn apply_outputs(&self, tick: u64) {
        for output in self.outputs.drain() {
            match output {
                AgentOutput::Speak(text) => {
                    if let Err(e) = self.messenger.send_chat(&text) {
                        warn!(tick, error = %e, "failed to send chat");
                    }
                }
                AgentOutput::StopAll => {
                    info!(tick, "stopping all behaviors");
                    self.runner.cancel_all();
                }
                AgentOutput::Intent { intent, origin } => self.start_intent(intent, origin, tick),
            }
        }
    }

    fn start_intent(&self, intent: Intent, origin: IntentOrigin, tick: u64) {
        let description = intent.describe();
        let Some(run_id) = self.runner.start(&intent) else {
            warn!(tick, intent = %description, "behavior runner rejected intent");
            self.buffer.push_at(
                EVENT_INTENT_REJECTED,
                json!({"intent": description}),
                Priority::Normal,
                tick,
            );
            return;
        };

        {
            let mut slot = self.invocation.lock();
            if let Some(invocation) = slot.as_mut() {
                debug!(tick, run_id, invocation = invocation.id, "behavior attributed to invocation");
                invocation.run_ids.push(run_id);
                invocation.actions.push(description);
                return;
            }
        }
        self.open_direct_episode(run_id, &description, origin, tick);
    }

    /// Trigger decision for this instant; None while an invocation runs
    pub fn should_think(&self) -> Option<ThinkReason> {
        if self.invocation.lock().is_some() {
            return None;
        }
        let now = Instant::now();
        let timing = self.timing.lock();
        let inputs = TriggerInputs {
            has_urgent: self.buffer.has_urgent(),
            active_behaviors: self.runner.active_count(),
            buffered_events: self.buffer.len(),
            since_last_think: timing.last_think_end.map(|t| now.duration_since(t)),
            idle_for: timing.idle_since.map(|t| now.duration_since(t)),
        };
        self.trigger.evaluate(&inputs)
    }

    fn launch(&self, reason: ThinkReason, snapshot: Option<&Snapshot>, tick: u64) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(tick, "cannot launch reasoning outside a tokio runtime");
                return;
            }
        };

        let drained = self.buffer.drain_all();
        let events: Vec<String> = drained.iter().map(|e| e.describe()).collect();
        let player = drained
            .iter()
            .rev()
            .find_map(|e| e.payload.get("player").and_then(Value::as_str))
            .map(str::to_string);

        let mut context = self.memory_context(tick);
        context.player = player;
        self.tools.set_context(context.clone());

        let think_context = ThinkContext {
            trigger: reason.to_string(),
            status: self.status_line(snapshot),
            memory: self.memory_digest(&events, &context),
            spatial: snapshot
                .map(|s| {
                    self.spatial
                        .summary_at(s.position, self.config.spatial.summary_radius, self.clock.now())
                })
                .unwrap_or_default(),
            events: events.clone(),
        };

        let id = self.next_invocation_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let thinker = self.thinker.clone();
        let timeout = self.config.loop_settings.think_timeout();
        let task_cancel = cancel.clone();

        let handle = handle.spawn(async move {
            run_invocation(thinker, think_context, task_cancel, timeout).await
        });

        info!(tick, invocation = id, trigger = %reason, events = events.len(), "reasoning launched");
        *self.invocation.lock() = Some(Invocation {
            id,
            tick_id: tick,
            trigger: reason,
            events,
            cancel,
            run_ids: Vec::new(),
            actions: Vec::new(),
            handle,
        });
    }

    fn memory_context(&self, tick: u64) -> MemoryContext {
        let perception = self.perception.lock();
        let mut context = MemoryContext::at_tick(tick);
        if let Some(snapshot) = perception.previous() {
            context = context
                .with_dimension(snapshot.dimension.clone())
                .with_position(snapshot.position);
        }
        context
    }

    fn status_line(&self, snapshot: Option<&Snapshot>) -> String {
        let active = self.runner.active_count();
        match snapshot {
            Some(s) => format!(
                "tick {} | pos {} | hp {:.1}/20 | food {:.1}/20 | dim {} | behaviors active: {}",
                self.current_tick(),
                s.position,
                s.health,
                s.food,
                s.dimension,
                active
            ),
            None => format!(
                "tick {} | not spawned | behaviors active: {}",
                self.current_tick(),
                active
            ),
        }
    }

    fn memory_digest(&self, events: &[String], context: &MemoryContext) -> String {
        let mut out = String::new();
        let recent = self.episodes.recent_closed(self.config.thinker.recent_episodes);
        if !recent.is_empty() {
            out.push_str("recent episodes:\n");
            for episode in recent.iter().rev() {
                let decision = if episode.decision.is_empty() {
                    "(no action)"
                } else {
                    episode.decision.as_str()
                };
                out.push_str(&format!(
                    "- #{} [{}] {} -> {}\n",
                    episode.id, episode.trigger, decision, episode.outcome
                ));
            }
        }

        if !events.is_empty() && self.config.thinker.recalled_facts > 0 {
            let hits = self.memory.recall(
                &events.join(" "),
                &Default::default(),
                context,
                self.config.thinker.recalled_facts,
            );
            if !hits.is_empty() {
                out.push_str("facts:\n");
                for hit in hits {
                    out.push_str(&format!("- {}\n", hit.entry.content));
                }
            }
        }
        out
    }

    /// Feed an event from an external producer. Returns false if dropped.
    pub fn inject_event(&self, name: impl Into<String>, payload: Value, priority: Priority) -> bool {
        self.inbox.try_push(InboundEvent::new(name, payload, priority))
    }

    /// Queue a direct intent; it is started on the next tick
    pub fn submit_intent(&self, intent: Intent) {
        self.outputs.push(AgentOutput::Intent {
            intent,
            origin: IntentOrigin::Direct,
        });
    }

    pub fn set_look_target(&self, yaw: f32, pitch: f32) {
        self.aim.lock().set_target(yaw, pitch);
    }

    /// Head angles as last sent to the body
    pub fn head(&self) -> (f32, f32) {
        let aim = self.aim.lock();
        (aim.yaw, aim.pitch)
    }

    /// Wait until no behavior is active and no invocation is running
    pub async fn wait_for_idle(&self, timeout: Duration, cancel: &CancellationToken) -> Result<(), WayfarerError> {
        let deadline = Instant::now() + timeout;
        let mut poll = tokio::time::interval(self.config.loop_settings.idle_poll());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if self.runner.active_count() == 0 && !self.is_thinking() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(WayfarerError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(WayfarerError::Timeout(format!("agent not idle after {:?}", timeout)));
                }
                _ = poll.tick() => {}
            }
        }
    }

    /// Cancel the running invocation, if any
    pub fn interrupt(&self) -> bool {
        match self.invocation.lock().as_ref() {
            Some(invocation) if !invocation.cancel.is_cancelled() => {
                invocation.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// True while an invocation task is still running. A finished one
    /// waiting to be reaped does not count.
    pub fn is_thinking(&self) -> bool {
        self.invocation
            .lock()
            .as_ref()
            .map(|i| !i.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            tick: self.current_tick(),
            thinking: self.is_thinking(),
            active_behaviors: self.runner.active_count(),
            buffered_events: self.buffer.len(),
            open_episodes: self.episodes.open_count(),
            pending_completions: self.pending.len(),
            memories: self.memory.len(),
            remembered_entities: self.spatial.entity_count(),
        }
    }

    pub fn config(&self) -> &MindConfig {
        &self.config
    }

    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    pub fn spatial(&self) -> &SpatialMemory {
        &self.spatial
    }

    pub fn memory(&self) -> &Arc<SemanticMemoryStore> {
        &self.memory
    }

    pub fn episodes(&self) -> &EpisodeLog {
        &self.episodes
    }

    pub fn pending(&self) -> &PendingBehaviorEnds {
        &self.pending
    }
}

/// Body of the invocation task: think under a deadline, unwinding
/// cooperatively when it passes.
async fn run_invocation(
    thinker: Arc<Thinker>,
    context: ThinkContext,
    cancel: CancellationToken,
    timeout: Duration,
) -> InvocationReport {
    let mut timed_out = false;
    let think = thinker.think(&context, &cancel);
    tokio::pin!(think);

    let result = tokio::select! {
        result = &mut think => result,
        _ = tokio::time::sleep(timeout) => {
            warn!(timeout_secs = timeout.as_secs(), "reasoning deadline passed, cancelling");
            timed_out = true;
            cancel.cancel();
            think.await
        }
    };

    match result {
        Ok(trace) if trace.interrupted() => {
            let error = if timed_out {
                ThinkerError::Timeout
            } else {
                ThinkerError::Interrupted
            };
            InvocationReport {
                trace,
                error: Some(error),
            }
        }
        Ok(trace) => InvocationReport { trace, error: None },
        Err(e) => InvocationReport {
            trace: ThinkerTrace::default(),
            error: Some(e),
        },
    }
}
