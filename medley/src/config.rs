//! Runtime configuration, env-var backed with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use taskman::RetentionConfig;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory the media library lives under.
    pub media_root: PathBuf,
    /// Path to the external encoder binary.
    pub ffmpeg_path: String,
    /// Retention windows for terminal task states.
    pub task_retention: RetentionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("media"),
            ffmpeg_path: "ffmpeg".to_string(),
            task_retention: RetentionConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `MEDLEY_MEDIA_ROOT` (e.g. "/srv/media")
    /// - `MEDLEY_FFMPEG_PATH` (e.g. "/usr/bin/ffmpeg")
    /// - `MEDLEY_TASK_RETENTION_SECS` (success/cancel retention)
    /// - `MEDLEY_FAILED_TASK_RETENTION_SECS`
    pub fn from_env_or_default() -> Self {
        let mut settings = Self::default();

        if let Ok(root) = std::env::var("MEDLEY_MEDIA_ROOT")
            && !root.trim().is_empty()
        {
            settings.media_root = PathBuf::from(root);
        }

        if let Ok(path) = std::env::var("MEDLEY_FFMPEG_PATH")
            && !path.trim().is_empty()
        {
            settings.ffmpeg_path = path;
        }

        if let Ok(secs) = std::env::var("MEDLEY_TASK_RETENTION_SECS")
            && let Ok(parsed) = secs.parse::<u64>()
        {
            settings.task_retention.completed = Duration::from_secs(parsed);
            settings.task_retention.cancelled = Duration::from_secs(parsed);
        }

        if let Ok(secs) = std::env::var("MEDLEY_FAILED_TASK_RETENTION_SECS")
            && let Ok(parsed) = secs.parse::<u64>()
        {
            settings.task_retention.failed = Duration::from_secs(parsed);
        }

        settings
    }
}
