//! Copy task executor: sizing pass, chunked copy, throttled progress.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use taskman::{Task, TaskError, WorkerContext};

use crate::copy::CopyOperationInfo;
use crate::tasks::TaskPayload;
use crate::utils::fs;
use crate::{Error, Result};

/// Kind discriminator for copy tasks.
pub const COPY_TASK_KIND: &str = "copy";

/// Read/write chunk size for the copy loop.
const COPY_CHUNK_SIZE: usize = 80 * 1024;

/// Publish a payload update once this many bytes accumulated since the last
/// one. Per-chunk publishing would flood observers.
const PROGRESS_PUBLISH_THRESHOLD: u64 = 5 * 1024 * 1024;

/// A file or directory copy submitted to the task engine.
pub struct CopyTask {
    source: PathBuf,
    destination: PathBuf,
    is_directory: bool,
}

impl CopyTask {
    pub fn new(source: PathBuf, destination: PathBuf, is_directory: bool) -> Self {
        Self {
            source,
            destination,
            is_directory,
        }
    }
}

/// One file scheduled for copying, discovered during the sizing pass.
struct PlannedFile {
    source: PathBuf,
    /// Path relative to the source root; empty for a single-file copy.
    relative: PathBuf,
    size: u64,
}

/// Result of the sizing pass. The copy pass walks `files` in this exact
/// order so byte accounting matches the announced totals.
struct CopyPlan {
    files: Vec<PlannedFile>,
    total_bytes: u64,
    total_files: u64,
}

/// Running byte/file counters for one copy operation.
#[derive(Default)]
struct Accounting {
    copied_bytes: u64,
    copied_files: u64,
    unpublished_bytes: u64,
}

enum FileCopyOutcome {
    Completed,
    Cancelled,
}

#[async_trait]
impl Task<TaskPayload> for CopyTask {
    fn kind(&self) -> &'static str {
        COPY_TASK_KIND
    }

    async fn run(
        self: Box<Self>,
        ctx: WorkerContext<TaskPayload>,
    ) -> std::result::Result<(), TaskError> {
        if ctx.is_cancelled() {
            return Err(TaskError::Cancelled);
        }

        let started = Instant::now();
        let plan = if self.is_directory {
            plan_directory(&self.source).await
        } else {
            plan_single_file(&self.source).await
        }
        .map_err(TaskError::failed)?;

        let base = CopyOperationInfo::new(
            ctx.task_id(),
            self.source.display().to_string(),
            self.destination.display().to_string(),
            self.is_directory,
            plan.total_bytes,
            plan.total_files,
        );
        ctx.set_payload(TaskPayload::Copy(base.clone()));
        debug!(
            task_id = %ctx.task_id(),
            total_bytes = plan.total_bytes,
            total_files = plan.total_files,
            "copy sized"
        );

        let mut acc = Accounting::default();
        for file in &plan.files {
            if ctx.is_cancelled() {
                return Err(TaskError::Cancelled);
            }

            let destination = if self.is_directory {
                self.destination.join(&file.relative)
            } else {
                self.destination.clone()
            };
            let current = if file.relative.as_os_str().is_empty() {
                file.source.display().to_string()
            } else {
                file.relative.display().to_string()
            };

            let outcome = {
                let on_chunk = &mut |n: u64| {
                    acc.copied_bytes += n;
                    acc.unpublished_bytes += n;
                    if acc.unpublished_bytes >= PROGRESS_PUBLISH_THRESHOLD {
                        acc.unpublished_bytes = 0;
                        publish(&ctx, &base, &acc, Some(current.clone()), started);
                    }
                };
                copy_file_create_new(&file.source, &destination, ctx.token(), on_chunk)
                    .await
                    .map_err(TaskError::failed)?
            };

            if matches!(outcome, FileCopyOutcome::Cancelled) {
                return Err(TaskError::Cancelled);
            }

            acc.copied_files += 1;
            acc.unpublished_bytes = 0;
            publish(&ctx, &base, &acc, Some(current), started);
        }

        let final_info = base.completed(started.elapsed());
        ctx.set_payload(TaskPayload::Copy(final_info));
        ctx.report_progress(100.0);
        Ok(())
    }
}

/// Publish a throttled payload/progress update.
fn publish(
    ctx: &WorkerContext<TaskPayload>,
    base: &CopyOperationInfo,
    acc: &Accounting,
    current: Option<String>,
    started: Instant,
) {
    let info = base.with_progress(
        acc.copied_bytes,
        acc.copied_files,
        current,
        started.elapsed(),
    );
    ctx.report_progress(info.progress_pct());
    ctx.set_payload(TaskPayload::Copy(info));
}

/// Sizing pass for a single file.
async fn plan_single_file(source: &Path) -> Result<CopyPlan> {
    let meta = tokio::fs::metadata(source)
        .await
        .map_err(|e| fs::io_error("reading source metadata", source, e))?;
    Ok(CopyPlan {
        files: vec![PlannedFile {
            source: source.to_path_buf(),
            relative: PathBuf::new(),
            size: meta.len(),
        }],
        total_bytes: meta.len(),
        total_files: 1,
    })
}

/// Sizing pass for a directory tree.
///
/// Walks depth-first with lexically sorted entries so the copy pass can
/// replay the identical order. Files that fail to stat are logged and left
/// out of the totals; they do not abort the operation.
async fn plan_directory(source: &Path) -> Result<CopyPlan> {
    let mut files = Vec::new();
    let mut pending = vec![source.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if dir == source => {
                return Err(fs::io_error("reading source directory", &dir, e));
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| fs::io_error("reading directory entry", &dir, e))?
        {
            entries.push(entry.path());
        }
        entries.sort();

        for path in entries {
            let meta = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if meta.is_dir() {
                pending.push(path);
            } else if meta.is_file()
                && let Ok(relative) = path.strip_prefix(source)
            {
                let relative = relative.to_path_buf();
                files.push(PlannedFile {
                    source: path,
                    relative,
                    size: meta.len(),
                });
            }
        }
    }

    let total_bytes = files.iter().map(|f| f.size).sum();
    let total_files = files.len() as u64;
    Ok(CopyPlan {
        files,
        total_bytes,
        total_files,
    })
}

/// Chunked copy of one file with create-new semantics.
///
/// The cancellation token is checked before every chunk; on cancellation the
/// partially written destination is removed best-effort and already-completed
/// files of the surrounding operation are left alone.
async fn copy_file_create_new(
    source: &Path,
    destination: &Path,
    token: &CancellationToken,
    on_chunk: &mut impl FnMut(u64),
) -> Result<FileCopyOutcome> {
    let mut src = File::open(source)
        .await
        .map_err(|e| fs::io_error("opening source file", source, e))?;

    fs::ensure_parent_dir(destination).await?;
    let mut dst = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                Error::DestinationExists(destination.display().to_string())
            }
            _ => fs::io_error("creating destination file", destination, e),
        })?;

    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        if token.is_cancelled() {
            drop(dst);
            if let Err(e) = tokio::fs::remove_file(destination).await {
                warn!(path = %destination.display(), error = %e, "failed to remove partial file");
            }
            return Ok(FileCopyOutcome::Cancelled);
        }
        let n = src
            .read(&mut buf)
            .await
            .map_err(|e| fs::io_error("reading source file", source, e))?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])
            .await
            .map_err(|e| fs::io_error("writing destination file", destination, e))?;
        on_chunk(n as u64);
    }
    dst.flush()
        .await
        .map_err(|e| fs::io_error("flushing destination file", destination, e))?;
    Ok(FileCopyOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskman::{TaskManager, TaskState, TaskStatus};
    use tempfile::TempDir;

    async fn wait_terminal(
        manager: &TaskManager<TaskPayload>,
        id: taskman::TaskId,
    ) -> TaskState<TaskPayload> {
        for _ in 0..500 {
            if let Some(state) = manager.get(id)
                && state.status.is_terminal()
            {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("copy task never finished");
    }

    fn copy_info(state: &TaskState<TaskPayload>) -> CopyOperationInfo {
        match state.payload.as_ref().expect("payload missing") {
            TaskPayload::Copy(info) => info.clone(),
        }
    }

    fn write_file(path: &Path, len: usize) {
        std::fs::write(path, vec![0xabu8; len]).unwrap();
    }

    #[tokio::test]
    async fn test_single_file_copy_completes_with_totals() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("movie.mkv");
        let destination = dir.path().join("movie-copy.mkv");
        write_file(&source, 300 * 1024);

        let manager = TaskManager::new();
        let id = manager.submit(CopyTask::new(source.clone(), destination.clone(), false));

        let state = wait_terminal(&manager, id).await;
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.progress, 100.0);

        let info = copy_info(&state);
        assert_eq!(info.total_bytes, 300 * 1024);
        assert_eq!(info.copied_bytes, 300 * 1024);
        assert_eq!(info.copied_files, 1);
        assert!(info.completed_time.is_some());

        assert_eq!(
            std::fs::read(&source).unwrap(),
            std::fs::read(&destination).unwrap()
        );
    }

    #[tokio::test]
    async fn test_zero_byte_file_reports_completed() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("empty.bin");
        let destination = dir.path().join("empty-copy.bin");
        write_file(&source, 0);

        let manager = TaskManager::new();
        let id = manager.submit(CopyTask::new(source, destination.clone(), false));

        let state = wait_terminal(&manager, id).await;
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.progress, 100.0);

        let info = copy_info(&state);
        assert_eq!(info.total_bytes, 0);
        assert_eq!(info.copied_files, 1);
        assert_eq!(std::fs::metadata(&destination).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_directory_copy_preserves_relative_tree() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("library");
        std::fs::create_dir_all(source.join("season1")).unwrap();
        write_file(&source.join("a.mkv"), 1024 * 1024);
        write_file(&source.join("season1/b.mkv"), 2 * 1024 * 1024);
        write_file(&source.join("season1/notes.txt"), 0);

        let destination = dir.path().join("backup");
        let manager = TaskManager::new();
        let id = manager.submit(CopyTask::new(source.clone(), destination.clone(), true));

        let state = wait_terminal(&manager, id).await;
        assert_eq!(state.status, TaskStatus::Completed);

        let info = copy_info(&state);
        assert_eq!(info.total_files, 3);
        assert_eq!(info.total_bytes, 3_145_728);
        assert_eq!(info.copied_files, 3);
        assert_eq!(info.copied_bytes, 3_145_728);

        assert_eq!(
            std::fs::metadata(destination.join("a.mkv")).unwrap().len(),
            1024 * 1024
        );
        assert_eq!(
            std::fs::metadata(destination.join("season1/b.mkv"))
                .unwrap()
                .len(),
            2 * 1024 * 1024
        );
        assert!(destination.join("season1/notes.txt").exists());
    }

    #[tokio::test]
    async fn test_existing_destination_fails_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.bin");
        let destination = dir.path().join("b.bin");
        write_file(&source, 128);
        write_file(&destination, 4);

        let manager = TaskManager::new();
        let id = manager.submit(CopyTask::new(source, destination.clone(), false));

        let state = wait_terminal(&manager, id).await;
        assert_eq!(state.status, TaskStatus::Failed);
        assert!(
            state
                .error_message
                .as_deref()
                .unwrap()
                .contains("already exists")
        );
        // The pre-existing destination is untouched.
        assert_eq!(std::fs::metadata(&destination).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let manager = TaskManager::new();
        let id = manager.submit(CopyTask::new(
            dir.path().join("nope.bin"),
            dir.path().join("out.bin"),
            false,
        ));

        let state = wait_terminal(&manager, id).await;
        assert_eq!(state.status, TaskStatus::Failed);
        assert!(state.error_message.is_some());
    }

    #[tokio::test]
    async fn test_cancel_before_start_never_writes() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.bin");
        let destination = dir.path().join("b.bin");
        write_file(&source, 1024);

        let manager = TaskManager::new();
        // Current-thread test runtime: the worker cannot run before the next
        // await point, so the cancel always lands first.
        let id = manager.submit(CopyTask::new(source, destination.clone(), false));
        assert!(manager.cancel(id));

        let state = wait_terminal(&manager, id).await;
        assert_eq!(state.status, TaskStatus::Cancelled);
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_mid_file_cancellation_removes_partial_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.bin");
        let destination = dir.path().join("big-copy.bin");
        write_file(&source, 1024 * 1024);

        let token = CancellationToken::new();
        let cancel_after = token.clone();
        let mut chunks = 0u32;
        let outcome = copy_file_create_new(&source, &destination, &token, &mut |_n| {
            chunks += 1;
            if chunks == 2 {
                cancel_after.cancel();
            }
        })
        .await
        .unwrap();

        assert!(matches!(outcome, FileCopyOutcome::Cancelled));
        assert!(chunks >= 2);
        assert!(!destination.exists(), "partial destination not removed");
    }

    #[tokio::test]
    async fn test_progress_updates_are_monotonic() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("tree");
        std::fs::create_dir_all(&source).unwrap();
        for i in 0..4 {
            write_file(&source.join(format!("f{i}.bin")), 256 * 1024);
        }
        let destination = dir.path().join("tree-copy");

        let manager: TaskManager<TaskPayload> = TaskManager::new();
        let mut events = manager.subscribe();
        let id = manager.submit(CopyTask::new(source, destination, true));

        let mut last_bytes = 0u64;
        let mut final_bytes = 0u64;
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            if let taskman::TaskEvent::Updated(state) = event
                && state.id == id
            {
                if let Some(TaskPayload::Copy(info)) = &state.payload {
                    assert!(
                        info.copied_bytes >= last_bytes,
                        "copied_bytes regressed: {} -> {}",
                        last_bytes,
                        info.copied_bytes
                    );
                    last_bytes = info.copied_bytes;
                    final_bytes = info.copied_bytes;
                }
                if state.status.is_terminal() {
                    assert_eq!(state.status, TaskStatus::Completed);
                    break;
                }
            }
        }
        assert_eq!(final_bytes, 4 * 256 * 1024);
    }

    #[tokio::test]
    async fn test_large_file_publishes_mid_file_progress_updates() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("feature.mkv");
        let destination = dir.path().join("feature-copy.mkv");
        write_file(&source, 12 * 1024 * 1024);

        let manager: TaskManager<TaskPayload> = TaskManager::new();
        let mut events = manager.subscribe();
        let id = manager.submit(CopyTask::new(source, destination, false));

        let mut mid_file = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            if let taskman::TaskEvent::Updated(state) = event
                && state.id == id
            {
                if let Some(TaskPayload::Copy(info)) = &state.payload
                    && info.copied_bytes > 0
                    && info.copied_bytes < info.total_bytes
                {
                    assert!(info.current_path.is_some());
                    mid_file.push(info.copied_bytes);
                }
                if state.status.is_terminal() {
                    assert_eq!(state.status, TaskStatus::Completed);
                    break;
                }
            }
        }

        // 12 MiB at a 5 MiB publish threshold crosses the threshold twice
        // before the end of the file, so the file completes with at least
        // two distinct partial byte counts already published.
        assert!(mid_file.windows(2).all(|w| w[0] <= w[1]));
        mid_file.dedup();
        assert!(
            mid_file.len() >= 2,
            "expected multiple mid-file updates, got {mid_file:?}"
        );
    }
}
