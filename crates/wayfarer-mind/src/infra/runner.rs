//! Task-backed behavior runner
//!
//! Behaviors are registered by action name as async factories. Each started
//! behavior runs on its own tokio task with a child cancellation token and
//! reports a [`BehaviorEnd`] on the completion channel when it finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wayfarer_common::{BehaviorEnd, BehaviorPriority, Intent, Snapshot};

use crate::ports::BehaviorRunner;

pub const REASON_COMPLETED: &str = "completed";
pub const REASON_CANCELLED: &str = "cancelled";

/// What a running behavior gets to work with
#[derive(Clone)]
pub struct BehaviorContext {
    pub run_id: u64,
    pub intent: Intent,
    pub cancel: CancellationToken,
    /// Latest snapshot handed to [`BehaviorRunner::tick`]
    pub world: watch::Receiver<Option<Snapshot>>,
}

pub type BehaviorFuture = BoxFuture<'static, Result<(), String>>;
pub type BehaviorFactory = Arc<dyn Fn(BehaviorContext) -> BehaviorFuture + Send + Sync>;

struct Registration {
    factory: BehaviorFactory,
    owns_head: bool,
}

struct Running {
    name: String,
    priority: BehaviorPriority,
    owns_head: bool,
    cancel: CancellationToken,
}

pub struct TaskBehaviorRunner {
    registry: RwLock<HashMap<String, Registration>>,
    running: Arc<Mutex<HashMap<u64, Running>>>,
    next_run_id: AtomicU64,
    root: CancellationToken,
    world: watch::Sender<Option<Snapshot>>,
    completions_tx: mpsc::UnboundedSender<BehaviorEnd>,
    completions_rx: Mutex<Option<mpsc::UnboundedReceiver<BehaviorEnd>>>,
}

impl Default for TaskBehaviorRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBehaviorRunner {
    pub fn new() -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (world, _) = watch::channel(None);
        Self {
            registry: RwLock::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
            next_run_id: AtomicU64::new(1),
            root: CancellationToken::new(),
            world,
            completions_tx,
            completions_rx: Mutex::new(Some(completions_rx)),
        }
    }

    /// Register a behavior under an action name
    pub fn register<F>(&self, action: impl Into<String>, owns_head: bool, factory: F)
    where
        F: Fn(BehaviorContext) -> BehaviorFuture + Send + Sync + 'static,
    {
        let action = action.into().to_ascii_lowercase();
        debug!(action = %action, owns_head, "registered behavior");
        self.registry.write().insert(
            action,
            Registration {
                factory: Arc::new(factory),
                owns_head,
            },
        );
    }

    /// Names of the running behaviors, ordered by run id
    pub fn running(&self) -> Vec<(u64, String)> {
        let mut out: Vec<(u64, String)> = self
            .running
            .lock()
            .iter()
            .map(|(id, r)| (*id, r.name.clone()))
            .collect();
        out.sort();
        out
    }

    /// Cancel everything, including behaviors started later
    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

impl BehaviorRunner for TaskBehaviorRunner {
    fn tick(&self, snapshot: Option<&Snapshot>) {
        self.world.send_replace(snapshot.cloned());
    }

    fn active_count(&self) -> usize {
        self.running.lock().len()
    }

    fn start(&self, intent: &Intent) -> Option<u64> {
        let action = intent.action.to_ascii_lowercase();
        let (factory, owns_head) = match self.registry.read().get(&action) {
            Some(r) => (r.factory.clone(), r.owns_head),
            None => {
                warn!(action = %action, "no behavior registered for action");
                return None;
            }
        };
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(action = %action, "behavior start outside a tokio runtime");
                return None;
            }
        };

        if intent.priority == BehaviorPriority::High {
            for (run_id, running) in self.running.lock().iter() {
                if running.priority < BehaviorPriority::High {
                    info!(run_id, action = %running.name, "preempted by high priority behavior");
                    running.cancel.cancel();
                }
            }
        }

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.root.child_token();
        self.running.lock().insert(
            run_id,
            Running {
                name: action.clone(),
                priority: intent.priority,
                owns_head,
                cancel: cancel.clone(),
            },
        );

        let context = BehaviorContext {
            run_id,
            intent: intent.clone(),
            cancel: cancel.clone(),
            world: self.world.subscribe(),
        };
        let future = factory(context);
        let running = self.running.clone();
        let completions = self.completions_tx.clone();

        handle.spawn(async move {
            let reason = tokio::select! {
                biased;
                _ = cancel.cancelled() => REASON_CANCELLED.to_string(),
                result = future => match result {
                    Ok(()) => REASON_COMPLETED.to_string(),
                    Err(e) => format!("failed: {}", e),
                },
            };
            running.lock().remove(&run_id);
            debug!(run_id, action = %action, reason = %reason, "behavior finished");
            if completions.send(BehaviorEnd::new(action, run_id, reason)).is_err() {
                debug!(run_id, "completion receiver dropped");
            }
        });

        info!(run_id, intent = %intent.describe(), "behavior started");
        Some(run_id)
    }

    fn cancel_all(&self) {
        let running = self.running.lock();
        for (run_id, r) in running.iter() {
            debug!(run_id, action = %r.name, "cancelling behavior");
            r.cancel.cancel();
        }
    }

    fn owns_head(&self) -> bool {
        self.running.lock().values().any(|r| r.owns_head)
    }

    fn take_completions(&self) -> Option<mpsc::UnboundedReceiver<BehaviorEnd>> {
        self.completions_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;

    fn runner() -> TaskBehaviorRunner {
        let runner = TaskBehaviorRunner::new();
        runner.register("ok", false, |_| async { Ok::<(), String>(()) }.boxed());
        runner.register("fail", false, |_| async { Err::<(), String>("no path".to_string()) }.boxed());
        runner.register("look", true, |ctx: BehaviorContext| {
            async move {
                ctx.cancel.cancelled().await;
                Ok::<(), String>(())
            }
            .boxed()
        });
        runner
    }

    #[tokio::test]
    async fn test_completion_reasons() {
        let runner = runner();
        let mut completions = runner.take_completions().unwrap();
        assert!(runner.take_completions().is_none());

        let ok = runner.start(&Intent::new("ok")).unwrap();
        let fail = runner.start(&Intent::new("fail")).unwrap();
        assert!(fail > ok);

        let mut ends = vec![
            completions.recv().await.unwrap(),
            completions.recv().await.unwrap(),
        ];
        ends.sort_by_key(|e| e.run_id);
        assert_eq!(ends[0], BehaviorEnd::new("ok", ok, "completed"));
        assert_eq!(ends[1], BehaviorEnd::new("fail", fail, "failed: no path"));
        assert_eq!(runner.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_and_head_ownership() {
        let runner = runner();
        let mut completions = runner.take_completions().unwrap();
        let run_id = runner.start(&Intent::new("LOOK")).unwrap();
        assert!(runner.owns_head());
        assert_eq!(runner.running(), vec![(run_id, "look".to_string())]);

        runner.cancel_all();
        let end = tokio::time::timeout(Duration::from_secs(1), completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end.reason, "cancelled");
        assert!(!runner.owns_head());
    }

    #[tokio::test]
    async fn test_high_priority_preempts() {
        let runner = runner();
        let mut completions = runner.take_completions().unwrap();
        let low = runner
            .start(&Intent::new("look").with_priority(BehaviorPriority::Low))
            .unwrap();
        runner
            .start(&Intent::new("look").with_priority(BehaviorPriority::High))
            .unwrap();

        let end = completions.recv().await.unwrap();
        assert_eq!(end.run_id, low);
        assert_eq!(end.reason, "cancelled");
        assert_eq!(runner.active_count(), 1);
    }

    #[test]
    fn test_unknown_action_or_no_runtime() {
        let runner = runner();
        assert!(runner.start(&Intent::new("dance")).is_none());
        assert!(runner.start(&Intent::new("ok")).is_none());
    }
}
