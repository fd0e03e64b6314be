//! Application task payloads and engine type aliases.

use serde::{Deserialize, Serialize};

use crate::copy::CopyOperationInfo;

/// Payload snapshots for every task kind this server runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskPayload {
    Copy(CopyOperationInfo),
}

/// The task engine instantiated with this application's payloads.
pub type MediaTaskManager = taskman::TaskManager<TaskPayload>;
pub type MediaTaskState = taskman::TaskState<TaskPayload>;
pub type MediaTaskEvent = taskman::TaskEvent<TaskPayload>;
