//! Copy operation payload.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskman::TaskId;

/// Snapshot of an in-flight or finished copy operation.
///
/// Published as the copy task's payload. Updates are produced by the pure
/// transition functions below so the counter invariants (`copied_bytes <=
/// total_bytes`, `copied_files <= total_files`) are enforced in one place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyOperationInfo {
    pub id: TaskId,
    pub source_path: String,
    pub destination_path: String,
    pub total_bytes: u64,
    pub copied_bytes: u64,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_time: Option<DateTime<Utc>>,
    pub is_directory: bool,
    pub total_files: u64,
    pub copied_files: u64,
    /// File currently being copied, relative to the source root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_path: Option<String>,
    /// Throughput since the operation started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bytes_per_sec: Option<u64>,
    /// Estimated seconds remaining; absent when speed is zero or unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

impl CopyOperationInfo {
    /// Initial snapshot after the sizing pass.
    pub fn new(
        id: TaskId,
        source_path: String,
        destination_path: String,
        is_directory: bool,
        total_bytes: u64,
        total_files: u64,
    ) -> Self {
        Self {
            id,
            source_path,
            destination_path,
            total_bytes,
            copied_bytes: 0,
            start_time: Utc::now(),
            completed_time: None,
            is_directory,
            total_files,
            copied_files: 0,
            current_path: None,
            speed_bytes_per_sec: None,
            eta_seconds: None,
        }
    }

    /// Progress in percent. A zero-byte total reports 0 until completion.
    pub fn progress_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.copied_bytes as f64 / self.total_bytes as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Progress transition: clamps counters, updates the current path and
    /// derives speed/ETA from elapsed wall time.
    pub fn with_progress(
        &self,
        copied_bytes: u64,
        copied_files: u64,
        current_path: Option<String>,
        elapsed: Duration,
    ) -> Self {
        let copied_bytes = copied_bytes.min(self.total_bytes);
        let copied_files = copied_files.min(self.total_files);
        let (speed, eta) = derive_speed_eta(copied_bytes, self.total_bytes, elapsed);
        Self {
            copied_bytes,
            copied_files,
            current_path,
            speed_bytes_per_sec: speed,
            eta_seconds: eta,
            ..self.clone()
        }
    }

    /// Completion transition: forces the counters to their totals and stamps
    /// the completion time.
    pub fn completed(&self, elapsed: Duration) -> Self {
        let (speed, _) = derive_speed_eta(self.total_bytes, self.total_bytes, elapsed);
        Self {
            copied_bytes: self.total_bytes,
            copied_files: self.total_files,
            completed_time: Some(Utc::now()),
            current_path: None,
            speed_bytes_per_sec: speed,
            eta_seconds: None,
            ..self.clone()
        }
    }
}

fn derive_speed_eta(copied: u64, total: u64, elapsed: Duration) -> (Option<u64>, Option<u64>) {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return (None, None);
    }
    let speed = (copied as f64 / secs) as u64;
    if speed == 0 {
        return (Some(0), None);
    }
    let eta = total.saturating_sub(copied) / speed;
    (Some(speed), Some(eta))
}
