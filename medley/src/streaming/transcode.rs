//! On-the-fly transcoding through an external encoder process.
//!
//! The encoder writes the transcoded stream to its stdout, which is piped
//! directly into the HTTP response body. The child process is the one
//! OS-level resource this server must never leak: every exit path (normal
//! exit, client disconnect, server error) funnels through a single watchdog
//! that kills the process if it is still alive.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, warn};

use crate::{Error, Result};

/// Output container for a transcoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputContainer {
    #[default]
    Mp4,
    Webm,
    Mkv,
}

impl OutputContainer {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "webm" => Some(Self::Webm),
            "mkv" => Some(Self::Mkv),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
        }
    }

    /// MIME type sent as the response Content-Type.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Mkv => "video/x-matroska",
        }
    }

    /// ffmpeg muxer name for `-f`.
    fn muxer(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "matroska",
        }
    }
}

impl std::fmt::Display for OutputContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quality preset, mapped onto codec parameters per container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl QualityPreset {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "ultra" => Some(Self::Ultra),
            _ => None,
        }
    }
}

/// Concrete encoder parameters for one container/preset combination.
struct Encoding {
    video_codec: &'static str,
    crf: u32,
    audio_codec: &'static str,
    audio_bitrate_kbps: u32,
}

/// Fixed container/preset parameter table: webm gets VP9/Opus, mp4 and mkv
/// get H.264/AAC.
fn encoding_for(container: OutputContainer, quality: QualityPreset) -> Encoding {
    let audio_bitrate_kbps = match quality {
        QualityPreset::Low => 96,
        QualityPreset::Medium => 128,
        QualityPreset::High => 192,
        QualityPreset::Ultra => 256,
    };
    match container {
        OutputContainer::Webm => Encoding {
            video_codec: "libvpx-vp9",
            crf: match quality {
                QualityPreset::Low => 37,
                QualityPreset::Medium => 33,
                QualityPreset::High => 29,
                QualityPreset::Ultra => 24,
            },
            audio_codec: "libopus",
            audio_bitrate_kbps,
        },
        OutputContainer::Mp4 | OutputContainer::Mkv => Encoding {
            video_codec: "libx264",
            crf: match quality {
                QualityPreset::Low => 28,
                QualityPreset::Medium => 23,
                QualityPreset::High => 20,
                QualityPreset::Ultra => 17,
            },
            audio_codec: "aac",
            audio_bitrate_kbps,
        },
    }
}

/// Encoder binary settings.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// One transcode request: input file, output container, quality preset.
#[derive(Debug, Clone)]
pub struct TranscodeSpec {
    pub input: PathBuf,
    pub container: OutputContainer,
    pub quality: QualityPreset,
}

impl TranscodeSpec {
    /// Build the ffmpeg argument list. Output goes to stdout (`pipe:1`);
    /// mp4 additionally needs a fragmented layout because stdout is not
    /// seekable.
    pub fn build_args(&self) -> Vec<String> {
        let enc = encoding_for(self.container, self.quality);
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-i".into(),
            self.input.to_string_lossy().into_owned(),
            "-c:v".into(),
            enc.video_codec.into(),
            "-crf".into(),
            enc.crf.to_string(),
        ];

        match self.container {
            OutputContainer::Webm => {
                // Constant-quality VP9; realtime deadline keeps latency
                // acceptable for live piping.
                args.extend(["-b:v".into(), "0".into()]);
                args.extend(["-deadline".into(), "realtime".into()]);
                args.extend(["-cpu-used".into(), "4".into()]);
            }
            OutputContainer::Mp4 | OutputContainer::Mkv => {
                args.extend(["-preset".into(), "veryfast".into()]);
            }
        }

        args.extend(["-c:a".into(), enc.audio_codec.into()]);
        args.extend(["-b:a".into(), format!("{}k", enc.audio_bitrate_kbps)]);

        if self.container == OutputContainer::Mp4 {
            args.extend(["-movflags".into(), "frag_keyframe+empty_moov".into()]);
        }

        args.extend(["-f".into(), self.container.muxer().into()]);
        args.push("pipe:1".into());
        args
    }
}

/// A spawned encoder process whose stdout is being streamed.
///
/// Lifecycle: the watchdog task owns the `Child` and races its exit against
/// the cancellation token. Dropping the stdout stream (client disconnect or
/// normal end of response) cancels the token through a drop guard, so the
/// process is killed whenever it is still running with nobody reading.
pub struct StreamingChild {
    stdout: ChildStdout,
    token: CancellationToken,
    watchdog: JoinHandle<()>,
}

impl StreamingChild {
    /// Spawn the encoder for the given transcode spec.
    pub fn spawn(config: &TranscoderConfig, spec: &TranscodeSpec) -> Result<Self> {
        let args = spec.build_args();
        debug!(input = %spec.input.display(), container = %spec.container, ?args, "spawning encoder");

        let mut command = Command::new(&config.ffmpeg_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Self::spawn_command(command)
    }

    /// Spawn an arbitrary prepared command with the streaming lifecycle
    /// attached. Factored out of [`Self::spawn`] so the process handling can
    /// be exercised without an encoder binary.
    fn spawn_command(mut command: Command) -> Result<Self> {
        let mut child = command
            .spawn()
            .map_err(|e| Error::Transcoder(format!("failed to spawn encoder: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transcoder("failed to capture encoder stdout".to_string()))?;

        // Drain stderr concurrently so diagnostics never back-pressure the
        // output pipe.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "medley::encoder", "{line}");
                }
            });
        }

        let token = CancellationToken::new();
        let watchdog_token = token.clone();
        let watchdog = tokio::spawn(async move {
            tokio::select! {
                _ = watchdog_token.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "failed to kill encoder process");
                    } else {
                        debug!("encoder process killed after stream ended");
                    }
                }
                status = child.wait() => {
                    match status {
                        Ok(exit) if exit.success() => {
                            debug!("encoder process finished");
                        }
                        Ok(exit) => {
                            // The response body has already started; this
                            // can only be logged.
                            warn!(%exit, "encoder exited with failure status");
                        }
                        Err(e) => {
                            error!(error = %e, "failed to wait on encoder process");
                        }
                    }
                }
            }
        });

        Ok(Self {
            stdout,
            token,
            watchdog,
        })
    }

    /// Turn the child's stdout into a byte stream suitable for an HTTP body.
    pub fn into_stream(self) -> ChildStdoutStream {
        let Self {
            stdout,
            token,
            watchdog,
        } = self;
        // Dropping the JoinHandle detaches the watchdog; it keeps running
        // until the child is reaped.
        drop(watchdog);
        ChildStdoutStream {
            inner: ReaderStream::new(stdout),
            _kill_guard: token.drop_guard(),
        }
    }
}

/// Byte stream over the encoder's stdout. Dropping it cancels the kill
/// token, terminating the encoder if it is still running.
pub struct ChildStdoutStream {
    inner: ReaderStream<ChildStdout>,
    _kill_guard: DropGuard,
}

impl Stream for ChildStdoutStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn spec(container: OutputContainer, quality: QualityPreset) -> TranscodeSpec {
        TranscodeSpec {
            input: PathBuf::from("/media/in.mkv"),
            container,
            quality,
        }
    }

    #[test]
    fn test_mp4_args_use_h264_and_fragmented_layout() {
        let args = spec(OutputContainer::Mp4, QualityPreset::Medium).build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-i /media/in.mkv"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-crf 23"));
        assert!(joined.contains("-preset veryfast"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-b:a 128k"));
        assert!(joined.contains("-movflags frag_keyframe+empty_moov"));
        assert!(joined.ends_with("-f mp4 pipe:1"));
    }

    #[test]
    fn test_webm_args_use_vp9_and_opus() {
        let args = spec(OutputContainer::Webm, QualityPreset::Low).build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.contains("-crf 37"));
        assert!(joined.contains("-b:v 0"));
        assert!(joined.contains("-deadline realtime"));
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.contains("-b:a 96k"));
        assert!(!joined.contains("-movflags"));
        assert!(joined.ends_with("-f webm pipe:1"));
    }

    #[test]
    fn test_mkv_args_use_matroska_muxer_without_movflags() {
        let args = spec(OutputContainer::Mkv, QualityPreset::Ultra).build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-crf 17"));
        assert!(joined.contains("-b:a 256k"));
        assert!(!joined.contains("-movflags"));
        assert!(joined.ends_with("-f matroska pipe:1"));
    }

    #[test]
    fn test_container_and_quality_parsing() {
        assert_eq!(OutputContainer::from_str("WEBM"), Some(OutputContainer::Webm));
        assert_eq!(OutputContainer::from_str("avi"), None);
        assert_eq!(OutputContainer::default(), OutputContainer::Mp4);
        assert_eq!(QualityPreset::from_str("ultra"), Some(QualityPreset::Ultra));
        assert_eq!(QualityPreset::default(), QualityPreset::Medium);
        assert_eq!(OutputContainer::Mkv.mime_type(), "video/x-matroska");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_carries_child_stdout_to_completion() {
        let mut command = Command::new("sh");
        command
            .args(["-c", "printf hello"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = StreamingChild::spawn_command(command).unwrap();
        let mut stream = child.into_stream();

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropping_stream_kills_the_child() {
        let mut command = Command::new("sh");
        command
            .args(["-c", "sleep 30"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = StreamingChild::spawn_command(command).unwrap();
        let watchdog = std::mem::replace(&mut child.watchdog, tokio::spawn(async {}));
        let stream = child.into_stream();

        // Simulates a client disconnect: the body stream is dropped while
        // the process is still producing.
        drop(stream);

        // The watchdog only returns once the child has been killed and
        // reaped; far sooner than the 30s the child would otherwise run.
        tokio::time::timeout(Duration::from_secs(5), watchdog)
            .await
            .expect("encoder process was not killed on disconnect")
            .unwrap();
    }
}
