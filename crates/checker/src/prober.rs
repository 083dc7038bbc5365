//! Prober module for inspecting streams with ffprobe.
//!
//! The scheduler only sees the [`Prober`] trait: given a URL and a timeout it
//! returns either media facts or the reason the stream is dead. The ffprobe
//! implementation guarantees the child process is killed once the deadline
//! (timeout plus a small grace margin) expires.

use crate::config::ProbeConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Media characteristics reported by a successful probe.
///
/// Every field is optional: a stream that answers but hides some details is
/// still alive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    /// Video codec name as reported (e.g. "h264").
    pub video_codec: Option<String>,
    /// Frame width in pixels.
    pub width: Option<u32>,
    /// Frame height in pixels.
    pub height: Option<u32>,
    /// Frames per second.
    pub framerate: Option<f64>,
    /// Audio codec name as reported (e.g. "aac").
    pub audio_codec: Option<String>,
    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: Option<u32>,
}

/// Why a stream was declared dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The probe did not finish within its budget.
    Timeout,
    /// The server refused, reset, or returned an HTTP error.
    ConnectionError,
    /// The probe finished but found no audio or video stream.
    NoStream,
    /// The probe tool failed to start, crashed, or produced garbage.
    ProbeToolError,
    /// The run was interrupted before this entry was probed.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::ConnectionError => write!(f, "connection error"),
            FailureReason::NoStream => write!(f, "no stream"),
            FailureReason::ProbeToolError => write!(f, "probe tool error"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one probe attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Alive(MediaInfo),
    Dead(FailureReason),
}

impl ProbeOutcome {
    pub fn is_alive(&self) -> bool {
        matches!(self, ProbeOutcome::Alive(_))
    }
}

/// Stream inspection capability used by the scheduler.
///
/// Implementations must return within `timeout` plus a small fixed margin and
/// must not leave processes or sockets behind when they give up.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub avg_frame_rate: Option<String>,
        pub r_frame_rate: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// Probes streams by running ffprobe as a child process.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: String,
    grace: Duration,
}

impl FfprobeProber {
    pub fn new(cfg: &ProbeConfig) -> Self {
        Self {
            ffprobe_path: cfg.ffprobe_path.clone(),
            grace: cfg.grace(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        let mut cmd = build_ffprobe_command(&self.ffprobe_path, url, timeout);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Probing {} (timeout {:?})", url, timeout);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", self.ffprobe_path, e);
                return ProbeOutcome::Dead(FailureReason::ProbeToolError);
            }
        };

        // Dropping the wait future on expiry drops the child, which kills it.
        match tokio::time::timeout(timeout + self.grace, child.wait_with_output()).await {
            Err(_) => {
                debug!("Probe of {} exceeded {:?}, killed", url, timeout + self.grace);
                ProbeOutcome::Dead(FailureReason::Timeout)
            }
            Ok(Err(e)) => {
                warn!("Failed to collect ffprobe output for {}: {}", url, e);
                ProbeOutcome::Dead(FailureReason::ProbeToolError)
            }
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !output.status.success() {
                    debug!(
                        "ffprobe exited with status {} for {}: {}",
                        output.status,
                        url,
                        stderr.trim()
                    );
                }
                interpret_output(output.status.success(), &stdout, &stderr)
            }
        }
    }
}

/// Build the ffprobe command for a stream URL.
///
/// The network read timeout is passed to ffprobe as well, so a stalled
/// connection usually ends before the hard deadline kills the process.
pub fn build_ffprobe_command(program: &str, url: &str, timeout: Duration) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(["-v", "error"]);
    cmd.arg("-rw_timeout").arg(timeout.as_micros().to_string());
    cmd.args(["-print_format", "json", "-show_streams"]);
    cmd.arg(url);
    cmd
}

/// Turns a finished ffprobe run into an outcome.
pub fn interpret_output(success: bool, stdout: &str, stderr: &str) -> ProbeOutcome {
    if !success {
        return ProbeOutcome::Dead(classify_stderr(stderr));
    }

    match parse_ffprobe_output(stdout) {
        Ok(Some(info)) => ProbeOutcome::Alive(info),
        Ok(None) => ProbeOutcome::Dead(FailureReason::NoStream),
        Err(e) => {
            debug!("Unparseable ffprobe output: {}", e);
            ProbeOutcome::Dead(FailureReason::ProbeToolError)
        }
    }
}

const CONNECTION_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "server returned",
    "http error",
    "name or service not known",
    "failed to resolve",
    "temporary failure in name resolution",
    "no route to host",
    "network is unreachable",
    "input/output error",
];

/// Maps ffprobe's error text onto a failure reason.
pub fn classify_stderr(stderr: &str) -> FailureReason {
    let lower = stderr.to_lowercase();
    if lower.contains("timed out") {
        FailureReason::Timeout
    } else if CONNECTION_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureReason::ConnectionError
    } else {
        FailureReason::ProbeToolError
    }
}

/// Parses ffprobe JSON output.
///
/// Returns `Ok(None)` when the output lists neither a video nor an audio
/// stream. Facts come from the first stream of each kind.
pub fn parse_ffprobe_output(json_str: &str) -> Result<Option<MediaInfo>, serde_json::Error> {
    let ffprobe: ffprobe_json::FfprobeOutput = serde_json::from_str(json_str)?;
    let streams = ffprobe.streams.unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    if video.is_none() && audio.is_none() {
        return Ok(None);
    }

    let mut info = MediaInfo::default();

    if let Some(video) = video {
        info.video_codec = video.codec_name.clone().filter(|c| !c.is_empty());
        info.width = video.width.filter(|w| *w > 0);
        info.height = video.height.filter(|h| *h > 0);
        info.framerate = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate));
    }

    if let Some(audio) = audio {
        info.audio_codec = audio.codec_name.clone().filter(|c| !c.is_empty());
        info.audio_bitrate_kbps = audio
            .bit_rate
            .as_deref()
            .and_then(|br| br.parse::<u64>().ok())
            .map(|bps| (bps / 1000) as u32);
    }

    Ok(Some(info))
}

/// Parses "30000/1001", "25/1" or "25". Zero or malformed rates are unknown.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };

    if fps.is_finite() && fps > 0.0 {
        Some(fps)
    } else {
        None
    }
}
