//! Task identifiers, statuses and observable state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier, assigned at submission time.
///
/// The id is the sole identity of a task: two submissions with identical
/// content still get distinct ids and independently tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Registered but not yet picked up by its worker.
    Pending,
    /// Worker is executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancellation was observed and the task stopped.
    Cancelled,
}

impl TaskStatus {
    /// Pending or Running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Completed, Failed or Cancelled. Terminal statuses never transition.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable state of one task.
///
/// Owned by the manager's registry; the executing worker is the single
/// writer and observers only ever receive cloned snapshots, so a reader can
/// never see a half-applied update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState<P> {
    /// Task id.
    pub id: TaskId,
    /// Task kind, discriminating the executor type (e.g. "copy").
    pub kind: String,
    /// Current status.
    pub status: TaskStatus,
    /// Overall progress in percent, clamped to `[0, 100]` and monotonically
    /// non-decreasing while the task is running.
    pub progress: f64,
    /// Human-readable status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Failure message, set when status is Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Executor-defined payload snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<P>,
    /// When the worker started executing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl<P> TaskState<P> {
    /// Create a fresh Pending state.
    pub fn pending(id: TaskId, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            status: TaskStatus::Pending,
            progress: 0.0,
            status_message: None,
            error_message: None,
            payload: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition Pending -> Running and stamp `started_at`.
    ///
    /// No-op when the state is already terminal.
    pub(crate) fn mark_running(&mut self) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Apply a progress report, keeping progress clamped and monotonic.
    pub(crate) fn apply_progress(&mut self, pct: f64) {
        let clamped = pct.clamp(0.0, 100.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
    }

    /// Resolve a terminal status. Terminal states are final: a second
    /// resolution attempt is ignored.
    pub(crate) fn resolve(&mut self, status: TaskStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.error_message = error;
        self.completed_at = Some(Utc::now());
        if status == TaskStatus::Completed {
            self.progress = 100.0;
        }
    }
}
