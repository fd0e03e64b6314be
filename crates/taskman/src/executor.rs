//! Task executor trait and the worker-side context handle.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::manager::Shared;
use crate::state::TaskId;

/// How a task run ended, as reported by the executor.
///
/// The manager resolves these into exactly one terminal status: a clean
/// return becomes Completed, `Cancelled` becomes the Cancelled status and
/// `Failed` carries the message surfaced to observers. Cancellation is a
/// first-class outcome, not an error dressed up as one.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The executor observed the cancellation signal and stopped.
    #[error("task cancelled")]
    Cancelled,

    /// The task failed with the given message.
    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    /// Build a failure from any displayable error.
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        Self::Failed(msg.to_string())
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

/// One unit of background work.
///
/// Implementations hold their own input (paths, flags, ...) and run to
/// completion on a dedicated worker, observing cancellation at their I/O
/// boundaries through the [`WorkerContext`].
#[async_trait]
pub trait Task<P>: Send + 'static {
    /// Task kind discriminator (e.g. "copy"), used for list filtering.
    fn kind(&self) -> &'static str;

    /// Run the task to completion.
    async fn run(self: Box<Self>, ctx: WorkerContext<P>) -> Result<(), TaskError>;
}

/// Handle an executor uses to report state and observe cancellation.
///
/// All mutation funnels through the manager's registry entry, so observers
/// only ever see complete snapshots and progress stays monotonic.
pub struct WorkerContext<P> {
    pub(crate) id: TaskId,
    pub(crate) token: CancellationToken,
    pub(crate) shared: Arc<Shared<P>>,
}

impl<P: Clone + Send + 'static> WorkerContext<P> {
    /// Id of the task this context belongs to.
    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Check the cancellation signal. Executors call this at every
    /// suspension point (before each chunk read, each file, ...).
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for cancellation; useful inside `select!` loops.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The task's cancellation token, for handing to lower-level helpers.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Replace the payload snapshot atomically and notify observers.
    pub fn set_payload(&self, payload: P) {
        self.shared.update(self.id, |state| {
            state.payload = Some(payload);
        });
    }

    /// Report overall progress in percent. Values are clamped to `[0, 100]`
    /// and regressions are ignored.
    pub fn report_progress(&self, pct: f64) {
        self.shared.update(self.id, |state| {
            state.apply_progress(pct);
        });
    }

    /// Set the human-readable status message.
    pub fn set_status_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.shared.update(self.id, |state| {
            state.status_message = Some(message);
        });
    }
}
