//! # Taskman
//!
//! Background task orchestration for long-lived operations (file copies,
//! library syncs, ...). Each submitted task runs on its own tokio task,
//! publishes observable state snapshots through a registry, and is cancelled
//! cooperatively through a [`CancellationToken`](tokio_util::sync::CancellationToken).
//!
//! Tasks are independent (no pipelines, no dependencies between tasks) and
//! their history is in-memory only: terminal states are retained for a bounded
//! window and then evicted.

pub mod executor;
pub mod manager;
pub mod state;

pub use executor::{Task, TaskError, WorkerContext};
pub use manager::{RetentionConfig, TaskEvent, TaskManager};
pub use state::{TaskId, TaskState, TaskStatus};
