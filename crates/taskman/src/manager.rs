//! Task Manager implementation.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::{Task, TaskError, WorkerContext};
use crate::state::{TaskId, TaskState, TaskStatus};

/// Broadcast channel capacity for task events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long terminal task states stay visible before eviction.
///
/// Success and cancellation are uninteresting shortly after the fact;
/// failures are kept longer so observers get a chance to read the error.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub completed: Duration,
    pub cancelled: Duration,
    pub failed: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed: Duration::from_secs(10),
            cancelled: Duration::from_secs(10),
            failed: Duration::from_secs(60),
        }
    }
}

impl RetentionConfig {
    fn for_status(&self, status: TaskStatus) -> Duration {
        match status {
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
            _ => self.completed,
        }
    }
}

/// Events emitted by the Task Manager.
///
/// The `Removed` event for a task is always sent after its terminal
/// `Updated` event.
#[derive(Debug, Clone)]
pub enum TaskEvent<P> {
    /// A task's state changed; carries the full snapshot.
    Updated(TaskState<P>),
    /// A terminal task was evicted from the registry.
    Removed(TaskId),
}

/// Registry entry for one task.
struct TaskEntry<P> {
    state: TaskState<P>,
    token: CancellationToken,
    /// Worker handle, retained so the task's lifecycle stays observable
    /// until eviction. Set right after the worker is spawned.
    worker: Option<JoinHandle<()>>,
}

/// State shared between the manager, its workers and their contexts.
pub(crate) struct Shared<P> {
    tasks: DashMap<TaskId, TaskEntry<P>>,
    event_tx: broadcast::Sender<TaskEvent<P>>,
}

impl<P: Clone + Send + 'static> Shared<P> {
    /// Mutate one task's state under the registry entry lock, then publish
    /// the resulting snapshot. No-op when the task is already evicted.
    pub(crate) fn update(&self, id: TaskId, f: impl FnOnce(&mut TaskState<P>)) {
        let snapshot = match self.tasks.get_mut(&id) {
            Some(mut entry) => {
                f(&mut entry.state);
                entry.state.clone()
            }
            None => return,
        };
        // Send after the entry lock is released; errors just mean no
        // subscribers right now.
        let _ = self.event_tx.send(TaskEvent::Updated(snapshot));
    }
}

/// The background task engine.
///
/// Accepts tasks, runs each on an independent tokio task, exposes state
/// snapshots to concurrent observers and propagates cooperative
/// cancellation. The registry is the only state shared across workers.
pub struct TaskManager<P> {
    shared: Arc<Shared<P>>,
    retention: RetentionConfig,
}

impl<P: Clone + Send + Sync + 'static> TaskManager<P> {
    /// Create a manager with default retention.
    pub fn new() -> Self {
        Self::with_retention(RetentionConfig::default())
    }

    /// Create a manager with a custom retention configuration.
    pub fn with_retention(retention: RetentionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                tasks: DashMap::new(),
                event_tx,
            }),
            retention,
        }
    }

    /// Submit a task for execution and return its id immediately.
    ///
    /// The task is handed to a freshly spawned worker; submission never
    /// blocks on execution. The worker resolves exactly one terminal
    /// outcome, after which the state lingers for the retention window and
    /// is then evicted with a `Removed` broadcast.
    pub fn submit(&self, task: impl Task<P>) -> TaskId {
        let id = TaskId::new();
        let kind = task.kind();
        let token = CancellationToken::new();

        self.shared.tasks.insert(
            id,
            TaskEntry {
                state: TaskState::pending(id, kind),
                token: token.clone(),
                worker: None,
            },
        );
        if let Some(entry) = self.shared.tasks.get(&id) {
            let _ = self
                .shared
                .event_tx
                .send(TaskEvent::Updated(entry.state.clone()));
        }

        let shared = self.shared.clone();
        let retention = self.retention.clone();
        let worker = tokio::spawn(async move {
            shared.update(id, |state| state.mark_running());
            debug!(task_id = %id, kind, "task started");

            let ctx = WorkerContext {
                id,
                token: token.clone(),
                shared: shared.clone(),
            };
            let result = Box::new(task).run(ctx).await;

            let (status, error) = match result {
                Ok(()) => (TaskStatus::Completed, None),
                Err(TaskError::Cancelled) => (TaskStatus::Cancelled, None),
                Err(TaskError::Failed(msg)) => (TaskStatus::Failed, Some(msg)),
            };
            match status {
                TaskStatus::Completed => info!(task_id = %id, kind, "task completed"),
                TaskStatus::Cancelled => info!(task_id = %id, kind, "task cancelled"),
                _ => warn!(task_id = %id, kind, error = error.as_deref(), "task failed"),
            }
            shared.update(id, |state| state.resolve(status, error));

            // Detached eviction timer; must not block the worker's own
            // completion and always runs after the terminal broadcast.
            let window = retention.for_status(status);
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                if shared.tasks.remove(&id).is_some() {
                    let _ = shared.event_tx.send(TaskEvent::Removed(id));
                }
            });
        });

        if let Some(mut entry) = self.shared.tasks.get_mut(&id) {
            entry.worker = Some(worker);
        }

        id
    }

    /// Non-blocking snapshot read of one task.
    pub fn get(&self, id: TaskId) -> Option<TaskState<P>> {
        self.shared.tasks.get(&id).map(|entry| entry.state.clone())
    }

    /// Snapshot of all known tasks, optionally filtered by kind.
    pub fn list(&self, kind: Option<&str>) -> Vec<TaskState<P>> {
        self.shared
            .tasks
            .iter()
            .filter(|entry| kind.is_none_or(|k| entry.state.kind == k))
            .map(|entry| entry.state.clone())
            .collect()
    }

    /// Signal cancellation to a still-active task.
    ///
    /// Returns whether a live task was found. Cancellation is cooperative:
    /// the executor observes the signal at its next I/O boundary.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.shared.tasks.get(&id) {
            Some(entry) if entry.state.status.is_active() => {
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent<P>> {
        self.shared.event_tx.subscribe()
    }

    /// Number of tasks currently in the registry (active and retained).
    pub fn len(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.tasks.is_empty()
    }
}

impl<P: Clone + Send + Sync + 'static> Default for TaskManager<P> {
    fn default() -> Self {
        Self::new()
    }
}
