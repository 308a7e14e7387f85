use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::environment::Environment;
use crate::error::HatchResult;
use crate::hat::{EventPayload, Hat, HatKind};
use crate::lock;
use crate::script::Script;
use crate::target::Target;
use crate::vm::Vm;

const MAX_TASK_FAILURES: usize = 64;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a task runs when its hat fires: an async callback receiving the owning
/// target and the environment. Compiled scripts and native handlers share it.
pub type Action =
    Arc<dyn Fn(Arc<Target>, Arc<Environment>) -> BoxFuture<'static, HatchResult<()>> + Send + Sync>;

/// Boxes an async callback into an [`Action`].
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn(Arc<Target>, Arc<Environment>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HatchResult<()>> + Send + 'static,
{
    Arc::new(
        move |target: Arc<Target>, env: Arc<Environment>| -> BoxFuture<'static, HatchResult<()>> {
            Box::pin(f(target, env))
        },
    )
}

/// Wraps a compiled script as an action that runs it on a fresh VM.
pub fn script_action(script: Arc<Script>) -> Action {
    action(move |target, env| {
        let script = script.clone();
        let epoch = env.stop_epoch();
        async move {
            Vm::with_epoch(target, env, epoch).run(&script).await?;
            Ok(())
        }
    })
}

#[derive(Default)]
struct TaskSlot {
    activated: bool,
    /// Set by the running unit when it ends, however it ends.
    finished: Option<Arc<AtomicBool>>,
}

/// One `(target, action)` pair registered under a hat.
pub struct Task {
    target: String,
    action: Action,
    slot: Mutex<TaskSlot>,
}

impl Task {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_running(&self) -> bool {
        let slot = lock(&self.slot);
        slot.activated
            && !slot
                .finished
                .as_ref()
                .is_some_and(|done| done.load(Ordering::Acquire))
    }
}

/// Hat → tasks table. Buckets are keyed by [`HatKind`] and scanned with the
/// hat equality relation, so a wildcard key hat meets every concrete key.
#[derive(Default)]
pub struct TaskRegistry {
    buckets: HashMap<HatKind, Vec<(Hat, Arc<Task>)>>,
}

impl TaskRegistry {
    pub fn register(&mut self, hat: Hat, target: impl Into<String>, action: Action) -> Arc<Task> {
        let task = Arc::new(Task {
            target: target.into(),
            action,
            slot: Mutex::new(TaskSlot::default()),
        });
        self.buckets
            .entry(hat.kind())
            .or_default()
            .push((hat, task.clone()));
        task
    }

    /// Registered entries whose hat equals `fired`, in registration order.
    pub fn matching<'a>(&'a self, fired: &'a Hat) -> impl Iterator<Item = &'a (Hat, Arc<Task>)> + 'a {
        self.buckets
            .get(&fired.kind())
            .into_iter()
            .flatten()
            .filter(move |(hat, _)| hat == fired)
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskFailure {
    pub target: String,
    pub hat: String,
    pub message: String,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(_) => "unknown panic".to_string(),
    }
}

struct FinishOnDrop(Arc<AtomicBool>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Owns the registry and launches execution units. Must be used from within
/// a tokio runtime.
#[derive(Default)]
pub struct Scheduler {
    registry: RwLock<TaskRegistry>,
    failures: Arc<Mutex<VecDeque<TaskFailure>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hat: Hat, target: impl Into<String>, action: Action) -> Arc<Task> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.register(hat, target, action)
    }

    pub fn task_count(&self) -> usize {
        self.registry.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Launches every matching idle task whose hat condition holds and returns
    /// the handles of the units started by this firing.
    pub fn activate(
        &self,
        fired: &Hat,
        payload: Option<&EventPayload>,
        env: &Arc<Environment>,
    ) -> Vec<JoinHandle<()>> {
        // Actions may register further tasks, so none run under the registry lock.
        let matched: Vec<(Hat, Arc<Task>)> = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .matching(fired)
            .cloned()
            .collect();

        let mut handles = Vec::new();
        for (hat, task) in matched {
            let Some(target) = env.target(task.target()) else {
                warn!(
                    "[Hatch scheduler] Task for {hat} names unknown target '{}'",
                    task.target()
                );
                continue;
            };
            let mut slot = lock(&task.slot);
            if slot
                .finished
                .as_ref()
                .is_some_and(|done| done.load(Ordering::Acquire))
            {
                slot.activated = false;
                slot.finished = None;
            }
            if slot.activated || !hat.condition(payload, &target) {
                continue;
            }
            let finished = Arc::new(AtomicBool::new(false));
            slot.activated = true;
            slot.finished = Some(finished.clone());
            drop(slot);

            let unit = tokio::spawn((task.action)(target, env.clone()));
            let failures = self.failures.clone();
            let owner = task.target().to_string();
            let label = hat.to_string();
            handles.push(tokio::spawn(async move {
                let _finish = FinishOnDrop(finished);
                let message = match unit.await {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) if e.is_termination() => {
                        debug!("[Hatch scheduler] '{owner}' on {label} ended: {e}");
                        return;
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(e) if e.is_panic() => format!("panicked: {}", panic_message(e.into_panic())),
                    Err(e) => e.to_string(),
                };
                warn!("[Hatch scheduler] '{owner}' on {label} failed: {message}");
                let mut log = lock(&failures);
                log.push_back(TaskFailure {
                    target: owner,
                    hat: label,
                    message,
                });
                while log.len() > MAX_TASK_FAILURES {
                    log.pop_front();
                }
            }));
        }
        handles
    }

    /// Most recent unit failures, oldest first.
    pub fn failures(&self) -> Vec<TaskFailure> {
        lock(&self.failures).iter().cloned().collect()
    }
}
