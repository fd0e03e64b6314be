//! API request/response models.

use serde::{Deserialize, Serialize};
use taskman::TaskId;

use crate::tasks::MediaTaskState;

/// Request body for starting a copy operation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCopyRequest {
    /// Source path, relative to the media root.
    pub source: String,
    /// Destination path, relative to the media root.
    pub destination: String,
}

/// Response for a submitted task.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmittedResponse {
    pub task_id: TaskId,
}

/// Query parameters for listing tasks.
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    /// Optional task kind filter (e.g. "copy").
    pub kind: Option<String>,
}

/// Query parameters for the stream endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// File path relative to the media root.
    pub path: String,
    /// Transcode on the fly instead of serving bytes directly.
    #[serde(default)]
    pub transcode: bool,
    /// Output container for transcoding (mp4 default, webm, mkv).
    pub format: Option<String>,
    /// Quality preset (low, medium, high, ultra).
    pub quality: Option<String>,
}

/// Messages sent over the task event WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TaskEventMessage {
    /// Initial list of all known tasks.
    Snapshot { tasks: Vec<MediaTaskState> },
    /// A task's state changed.
    Updated { state: MediaTaskState },
    /// A terminal task was evicted.
    Removed { id: TaskId },
}
