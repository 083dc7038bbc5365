//! IPTV Checker
//!
//! Probes every channel of an M3U playlist with bounded concurrency, flags
//! low framerate and mislabeled resolutions, and reports the results.

pub mod checker;
pub mod classify;
pub mod concurrency;
pub mod playlist;
pub mod prober;
pub mod report;
pub mod scheduler;
pub mod screenshot;
pub mod split;
pub mod startup;

#[cfg(test)]
mod test_support;

pub use checker::{Checker, CheckerError, RunSummary};
pub use classify::{ClassificationFacts, Classifier};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use iptv_checker_config as config;
pub use iptv_checker_config::Config;
pub use playlist::{
    detect_resolution_label, filter_by_group, load_playlist, parse_playlist, ChannelEntry,
    Playlist, PlaylistError, ResolutionLabel,
};
pub use prober::{FailureReason, FfprobeProber, MediaInfo, ProbeOutcome, Prober};
pub use report::{ReportRow, Reporter, RunReport};
pub use scheduler::{ProbeResult, ProbeScheduler, ProbeState, RetryPolicy, ScheduleOutcome};
pub use screenshot::{FfmpegScreenshotter, ScreenshotError, ScreenshotPlan, Screenshotter};
pub use split::{render_playlist, split_paths, write_split_playlists, SplitError, SplitPaths};
pub use startup::{
    check_ffmpeg_available, check_ffprobe_available, parse_tool_version, run_startup_checks,
    StartupError,
};
