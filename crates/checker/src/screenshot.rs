//! Screenshot module for capturing a frame from live channels.
//!
//! Builds and runs an ffmpeg command that grabs a single frame. Capture
//! failures are reported to the caller but never affect a channel's verdict.

use crate::config::ScreenshotConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for screenshot operations
#[derive(Debug, Error)]
pub enum ScreenshotError {
    /// ffmpeg process exited with non-zero status
    #[error("ffmpeg failed with exit code: {0}")]
    FfmpegFailed(i32),

    /// ffmpeg process was terminated by signal
    #[error("ffmpeg process was terminated by signal")]
    FfmpegTerminated,

    /// Capture did not finish in time; the process was killed
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    /// ffmpeg exited cleanly but wrote no image
    #[error("no image written to {0}")]
    MissingOutput(PathBuf),

    /// IO error during capture
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame capture capability.
#[async_trait]
pub trait Screenshotter: Send + Sync {
    /// Writes one frame of `url` to `output_path`.
    async fn capture(&self, url: &str, output_path: &Path) -> Result<(), ScreenshotError>;
}

/// Where and how live channels are captured during a run.
#[derive(Clone)]
pub struct ScreenshotPlan {
    pub screenshotter: Arc<dyn Screenshotter>,
    pub output_dir: PathBuf,
}

impl ScreenshotPlan {
    /// Path of the image for the channel at 1-based `position`.
    pub fn path_for(&self, position: usize, channel_name: &str) -> PathBuf {
        self.output_dir
            .join(screenshot_file_name(position, channel_name))
    }
}

impl std::fmt::Debug for ScreenshotPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenshotPlan")
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

/// Captures frames with ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegScreenshotter {
    ffmpeg_path: String,
    seek: String,
    timeout: Duration,
}

impl FfmpegScreenshotter {
    pub fn new(cfg: &ScreenshotConfig) -> Self {
        Self {
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            seek: cfg.seek.clone(),
            timeout: cfg.timeout(),
        }
    }
}

#[async_trait]
impl Screenshotter for FfmpegScreenshotter {
    async fn capture(&self, url: &str, output_path: &Path) -> Result<(), ScreenshotError> {
        let mut cmd = build_ffmpeg_command(&self.ffmpeg_path, &self.seek, url, output_path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let waited = tokio::time::timeout(self.timeout, child.wait()).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ScreenshotError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            return Err(match status.code() {
                Some(code) => ScreenshotError::FfmpegFailed(code),
                None => ScreenshotError::FfmpegTerminated,
            });
        }

        if !output_path.exists() {
            return Err(ScreenshotError::MissingOutput(output_path.to_path_buf()));
        }

        Ok(())
    }
}

/// Build an ffmpeg command that writes a single frame
///
/// Creates a Command configured with:
/// - Overwrite and quiet logging
/// - Input seek before decoding
/// - A single video frame as output
pub fn build_ffmpeg_command(program: &str, seek: &str, url: &str, output_path: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(["-y", "-v", "error"]);
    cmd.arg("-ss").arg(seek);
    cmd.arg("-i").arg(url);
    cmd.args(["-frames:v", "1"]);
    cmd.arg(output_path);
    cmd
}

/// File name for a channel's screenshot: `<position>-<name>.png`.
///
/// Path separators in the name are replaced so the file stays in its directory.
pub fn screenshot_file_name(position: usize, channel_name: &str) -> String {
    let safe: String = channel_name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect();
    format!("{}-{}.png", position, safe)
}

/// Default screenshot directory: `<playlist-stem>_<group>_screenshots`.
///
/// The group has `|` and spaces stripped; without a group filter the
/// directory is named for all groups.
pub fn default_screenshot_dir(playlist_path: &Path, group: Option<&str>) -> PathBuf {
    let stem = playlist_stem(playlist_path);
    let group_name = match group {
        Some(g) => g.chars().filter(|c| *c != '|' && *c != ' ').collect(),
        None => "AllGroups".to_string(),
    };
    PathBuf::from(format!("{}_{}_screenshots", stem, group_name))
}

/// Playlist file name up to its first dot.
pub fn playlist_stem(playlist_path: &Path) -> String {
    playlist_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .and_then(|n| n.split('.').next().map(str::to_string))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "playlist".to_string())
}
