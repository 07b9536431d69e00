//! Integration tests for the decision loop
//!
//! Drives `LoopAgent::tick` by hand against scripted collaborators:
//! - perception events and spatial visibility
//! - episode binding and out-of-order completions
//! - think-trigger cooldown, interruption and timeout

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use wayfarer_common::{
    BehaviorEnd, BodyError, EntitySnapshot, Intent, Priority, Snapshot, Vec3, WayfarerError,
};
use wayfarer_mind::domain::events::InboundEvent;
use wayfarer_mind::domain::trigger::ThinkReason;
use wayfarer_mind::ports::{
    BehaviorRunner, BodyController, BodyInput, MessageSender, ReasoningBackend, WorldSource,
};
use wayfarer_mind::thinker::messages::{
    BackendResponse, ContentBlock, Message, StopReason, ToolDefinition,
};
use wayfarer_mind::{Collaborators, EventBus, LoopAgent, MindConfig};

mock! {
    pub Body {}
    impl BodyController for Body {
        fn tick(&self, input: &BodyInput) -> Result<(), BodyError>;
    }
}

mock! {
    pub Chat {}
    impl MessageSender for Chat {
        fn send_chat(&self, text: &str) -> Result<(), WayfarerError>;
    }
}

#[derive(Default)]
struct ScriptedWorld {
    snapshot: Mutex<Option<Snapshot>>,
}

impl ScriptedWorld {
    fn set(&self, snapshot: Snapshot) {
        *self.snapshot.lock() = Some(snapshot);
    }
}

impl WorldSource for ScriptedWorld {
    fn state(&self) -> Option<Snapshot> {
        self.snapshot.lock().clone()
    }
}

/// Runner whose behaviors only end when the test says so
struct ManualRunner {
    next_run_id: AtomicU64,
    active: Mutex<HashSet<u64>>,
    started: Mutex<Vec<Intent>>,
    tx: mpsc::UnboundedSender<BehaviorEnd>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<BehaviorEnd>>>,
}

impl ManualRunner {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            next_run_id: AtomicU64::new(1),
            active: Mutex::new(HashSet::new()),
            started: Mutex::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn finish(&self, run_id: u64, name: &str, reason: &str) {
        self.active.lock().remove(&run_id);
        self.tx.send(BehaviorEnd::new(name, run_id, reason)).unwrap();
    }
}

impl BehaviorRunner for ManualRunner {
    fn tick(&self, _snapshot: Option<&Snapshot>) {}

    fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn start(&self, intent: &Intent) -> Option<u64> {
        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        self.active.lock().insert(run_id);
        self.started.lock().push(intent.clone());
        Some(run_id)
    }

    fn cancel_all(&self) {
        let ids: Vec<u64> = self.active.lock().iter().copied().collect();
        for run_id in ids {
            self.finish(run_id, "cancelled_behavior", "cancelled");
        }
    }

    fn owns_head(&self) -> bool {
        false
    }

    fn take_completions(&self) -> Option<mpsc::UnboundedReceiver<BehaviorEnd>> {
        self.rx.lock().take()
    }
}

enum Step {
    Respond(BackendResponse),
    /// Wait for the notify, then respond
    Gated(Arc<Notify>, BackendResponse),
    /// Never answer; only cancellation ends the call
    Hang,
}

#[derive(Default)]
struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU64,
}

impl ScriptedBackend {
    fn with(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn call_with_tools(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<BackendResponse, WayfarerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Gated(gate, response)) => {
                gate.notified().await;
                Ok(response)
            }
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                Err(WayfarerError::Internal("unreachable".to_string()))
            }
            None => Ok(end_turn("nothing to do")),
        }
    }
}

fn end_turn(text: &str) -> BackendResponse {
    BackendResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
    }
}

fn tool_use(name: &str, input: Value) -> BackendResponse {
    BackendResponse {
        content: vec![ContentBlock::ToolUse {
            id: format!("call_{}", name),
            name: name.to_string(),
            input,
        }],
        stop_reason: StopReason::ToolUse,
    }
}

struct Harness {
    agent: Arc<LoopAgent>,
    world: Arc<ScriptedWorld>,
    runner: Arc<ManualRunner>,
    backend: Arc<ScriptedBackend>,
    bus: Arc<EventBus>,
}

fn quiet_body() -> MockBody {
    let mut body = MockBody::new();
    body.expect_tick().returning(|_| Ok(()));
    body
}

fn harness_with(config: MindConfig, steps: Vec<Step>, chat: MockChat) -> Harness {
    let world = Arc::new(ScriptedWorld::default());
    let runner = Arc::new(ManualRunner::new());
    let backend = Arc::new(ScriptedBackend::with(steps));
    let bus = Arc::new(EventBus::new());
    let agent = LoopAgent::new(
        config,
        Collaborators {
            world: world.clone(),
            body: Arc::new(quiet_body()),
            runner: runner.clone(),
            messenger: Arc::new(chat),
            backend: backend.clone(),
            external_tools: None,
            bus: bus.clone(),
        },
    );
    Harness {
        agent,
        world,
        runner,
        backend,
        bus,
    }
}

fn harness(steps: Vec<Step>) -> Harness {
    harness_with(MindConfig::default(), steps, MockChat::new())
}

/// Let spawned tasks run without advancing the paused clock
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn recorder(bus: &EventBus, topic: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(topic, move |e: &InboundEvent| sink.lock().push(e.payload.clone()));
    seen
}

fn zombie(id: i64) -> EntitySnapshot {
    EntitySnapshot::new(id, "zombie", "hostile", Vec3::new(3.0, 64.0, 0.0))
}

#[tokio::test(start_paused = true)]
async fn test_damage_and_entity_visibility() {
    let h = harness(vec![]);
    let damage = recorder(&h.bus, "damage");
    let appear = recorder(&h.bus, "entity_appear");
    let leave = recorder(&h.bus, "entity_leave");

    h.world.set(Snapshot {
        health: 20.0,
        ..Snapshot::default()
    });
    h.agent.tick();

    h.world.set(Snapshot {
        health: 17.5,
        ..Snapshot::default()
    });
    h.agent.tick();
    assert_eq!(*damage.lock(), vec![json!({"amount": 2.5, "new_hp": 17.5})]);

    h.world.set(Snapshot {
        health: 17.5,
        entities: vec![zombie(42)],
        ..Snapshot::default()
    });
    h.agent.tick();
    assert!(h.agent.spatial().entity(42).unwrap().in_fov);

    h.world.set(Snapshot {
        health: 17.5,
        ..Snapshot::default()
    });
    h.agent.tick();

    assert_eq!(appear.lock().len(), 1);
    assert_eq!(appear.lock()[0]["id"], 42);
    assert_eq!(leave.lock().len(), 1);
    assert_eq!(leave.lock()[0]["id"], 42);

    let remembered = h.agent.spatial().entity(42).unwrap();
    assert!(!remembered.in_fov);
    assert_eq!(remembered.position, Vec3::new(3.0, 64.0, 0.0));

    // the damage auto-memory rule fired once
    let facts = h.agent.memory().recent(10);
    assert!(facts.iter().any(|f| f.content.starts_with("Took 2.5 damage")));
}

#[tokio::test(start_paused = true)]
async fn test_completion_before_episode_is_reconciled() {
    let gate = Arc::new(Notify::new());
    let h = harness(vec![
        Step::Respond(tool_use("set_intent", json!({"action": "mine", "target": "iron_ore"}))),
        Step::Gated(gate.clone(), end_turn("mining started")),
    ]);
    let shutdown = CancellationToken::new();
    let forwarder = h.agent.spawn_completion_forwarder(shutdown.clone()).unwrap();

    // launch; the first backend turn queues the intent, the second waits
    h.agent.tick();
    assert!(h.agent.is_thinking());
    settle().await;

    // intent started while the invocation is still in flight
    h.agent.tick();
    assert_eq!(h.runner.started.lock().len(), 1);
    assert!(h.agent.episodes().find_open_by_run(1).is_none());

    // behavior finishes before its episode exists
    h.runner.finish(1, "mine", "completed");
    settle().await;
    h.agent.tick();
    assert_eq!(h.agent.pending().len(), 1);

    gate.notify_one();
    settle().await;
    h.agent.tick();

    assert!(!h.agent.is_thinking());
    assert!(h.agent.pending().is_empty());
    let closed = h.agent.episodes().recent_closed(1);
    assert_eq!(closed[0].behavior_run_id, 1);
    assert_eq!(closed[0].outcome, "mine: completed");
    assert_eq!(closed[0].decision, "mine iron_ore");
    assert!(h
        .agent
        .memory()
        .recent(10)
        .iter()
        .any(|f| f.source == "auto:behavior_completed"));

    shutdown.cancel();
    forwarder.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_early_completion_outlives_pending_ttl() {
    let mut config = MindConfig::default();
    config.episodes.pending_ttl_ticks = 20;
    let gate = Arc::new(Notify::new());
    let h = harness_with(
        config,
        vec![
            Step::Respond(tool_use("set_intent", json!({"action": "mine", "target": "iron_ore"}))),
            Step::Gated(gate.clone(), end_turn("mining started")),
        ],
        MockChat::new(),
    );
    let shutdown = CancellationToken::new();
    let forwarder = h.agent.spawn_completion_forwarder(shutdown.clone()).unwrap();

    h.agent.tick();
    settle().await;
    h.agent.tick();
    assert_eq!(h.runner.started.lock().len(), 1);

    h.runner.finish(1, "mine", "completed");
    settle().await;

    // reasoning stays busy far past the pending TTL
    for _ in 0..100 {
        h.agent.tick();
    }
    assert!(h.agent.is_thinking());
    assert_eq!(h.agent.pending().len(), 1);

    gate.notify_one();
    settle().await;
    h.agent.tick();

    assert!(h.agent.pending().is_empty());
    let closed = h.agent.episodes().recent_closed(1);
    assert_eq!(closed[0].behavior_run_id, 1);
    assert_eq!(closed[0].outcome, "mine: completed");
    assert!(!h
        .agent
        .memory()
        .recent(10)
        .iter()
        .any(|f| f.source == "auto:behavior_failed"));

    shutdown.cancel();
    forwarder.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_open_episode_expires_on_loop_clock() {
    let h = harness(vec![]);

    h.agent.submit_intent(Intent::new("goto").with_target("home"));
    h.agent.tick();
    let episode = h.agent.episodes().find_open_by_run(1).unwrap();

    tokio::time::advance(Duration::from_secs(89)).await;
    h.agent.tick();
    assert!(h.agent.episodes().get(episode.id).unwrap().is_open());

    tokio::time::advance(Duration::from_secs(2)).await;
    h.agent.tick();

    let episode = h.agent.episodes().get(episode.id).unwrap();
    assert!(episode.closed);
    assert_eq!(episode.outcome, "behavior_timeout");
    assert!(h
        .agent
        .memory()
        .recent(10)
        .iter()
        .any(|f| f.content == "goto home failed: behavior_timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_after_invocation() {
    let h = harness(vec![]);

    h.agent.tick();
    assert!(h.agent.is_thinking());
    settle().await;
    h.agent.tick();

    assert!(!h.agent.is_thinking());
    let meta = h.agent.episodes().recent_closed(1);
    assert_eq!(meta[0].outcome, "thinker_ok");
    assert_eq!(meta[0].behavior_run_id, 0);

    assert_eq!(h.agent.should_think(), None);
    tokio::time::advance(Duration::from_millis(2_900)).await;
    assert_eq!(h.agent.should_think(), None);
    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(h.agent.should_think(), Some(ThinkReason::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_urgent_event_interrupts_reasoning() {
    let h = harness(vec![Step::Hang]);

    h.agent.tick();
    settle().await;
    assert!(h.agent.is_thinking());

    assert!(h.agent.inject_event("attacked", json!({"by": "zombie"}), Priority::Urgent));
    h.agent.tick();
    settle().await;
    h.agent.tick();

    let closed = h.agent.episodes().recent_closed(1);
    assert_eq!(closed[0].outcome, "thinker_interrupted");
    // the urgent event relaunches reasoning straight away
    assert!(h.agent.is_thinking());
    assert_eq!(h.agent.status().buffered_events, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reasoning_timeout() {
    let mut config = MindConfig::default();
    config.loop_settings.think_timeout_secs = 1;
    let h = harness_with(config, vec![Step::Hang], MockChat::new());

    h.agent.tick();
    settle().await;
    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    h.agent.tick();

    let closed = h.agent.episodes().recent_closed(1);
    assert_eq!(closed[0].outcome, "thinker_timeout");
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_direct_intent_opens_own_episode() {
    let h = harness(vec![]);
    let shutdown = CancellationToken::new();
    let forwarder = h.agent.spawn_completion_forwarder(shutdown.clone()).unwrap();

    h.agent.submit_intent(Intent::new("goto").with_target("home"));
    h.agent.tick();

    let episode = h.agent.episodes().find_open_by_run(1).unwrap();
    assert_eq!(episode.trigger, "direct_intent");
    assert_eq!(episode.decision, "goto home");

    h.runner.finish(1, "goto", "failed: path blocked");
    settle().await;
    h.agent.tick();

    let episode = h.agent.episodes().get(episode.id).unwrap();
    assert!(episode.closed);
    assert_eq!(episode.outcome, "goto: failed: path blocked");
    assert!(h
        .agent
        .memory()
        .recent(10)
        .iter()
        .any(|f| f.content == "goto failed: path blocked"));

    shutdown.cancel();
    forwarder.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_speak_reaches_chat() {
    let mut chat = MockChat::new();
    chat.expect_send_chat()
        .withf(|text: &str| text == "hello there")
        .times(1)
        .returning(|_| Ok(()));
    let h = harness_with(
        MindConfig::default(),
        vec![
            Step::Respond(tool_use("speak", json!({"text": "hello there"}))),
            Step::Respond(end_turn("greeted")),
        ],
        chat,
    );

    h.agent.tick();
    settle().await;
    h.agent.tick();

    let meta = h.agent.episodes().recent_closed(1);
    assert_eq!(meta[0].outcome, "thinker_ok");
    assert!(meta[0].decision.starts_with("speak"));
}

#[tokio::test]
async fn test_wait_for_idle() {
    let h = harness(vec![]);
    let cancel = CancellationToken::new();

    h.agent.submit_intent(Intent::new("wait"));
    h.agent.tick();
    let err = h
        .agent
        .wait_for_idle(Duration::from_millis(150), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, WayfarerError::Timeout(_)));

    h.runner.active.lock().clear();
    h.agent
        .wait_for_idle(Duration::from_secs(1), &cancel)
        .await
        .unwrap();

    cancel.cancel();
    h.runner.active.lock().insert(99);
    let err = h
        .agent
        .wait_for_idle(Duration::from_secs(1), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, WayfarerError::Cancelled));
}
