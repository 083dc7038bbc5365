//! Checker setup and pipeline for the IPTV checker
//!
//! Provides the run entry point: load, filter, probe, classify, report, split.

use crate::classify::Classifier;
use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::playlist::{filter_by_group, load_playlist, ChannelEntry, Playlist, PlaylistError};
use crate::prober::{FailureReason, FfprobeProber, ProbeOutcome, Prober};
use crate::report::{Reporter, RunReport};
use crate::scheduler::{ProbeScheduler, RetryPolicy};
use crate::screenshot::{default_screenshot_dir, FfmpegScreenshotter, ScreenshotPlan, Screenshotter};
use crate::split::{write_split_playlists, SplitError, SplitPaths};
use crate::startup::{run_startup_checks, StartupError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Error type for checker operations
#[derive(Debug, Error)]
pub enum CheckerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Playlist could not be used
    #[error("{0}")]
    Playlist(#[from] PlaylistError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Split playlists could not be written
    #[error("Split failed: {0}")]
    Split(#[from] SplitError),

    /// Screenshot directory could not be created
    #[error("Failed to create screenshot directory {path}: {source}")]
    ScreenshotDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CheckerError {
    /// True for errors caused by the input playlist itself.
    pub fn is_input_error(&self) -> bool {
        matches!(self, CheckerError::Playlist(_))
    }
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunSummary {
    pub report: RunReport,
    /// Paths of the split playlists, when splitting was enabled
    pub split: Option<SplitPaths>,
    /// Directory screenshots were written to, when enabled
    pub screenshot_dir: Option<PathBuf>,
}

/// Checker state containing all runtime components
pub struct Checker {
    /// Configuration loaded from file, environment and flags
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    prober: Arc<dyn Prober>,
    screenshotter: Option<Arc<dyn Screenshotter>>,
    classifier: Classifier,
    cancel: CancellationToken,
}

impl Checker {
    /// Initialize the checker with an existing configuration
    ///
    /// This performs the full startup sequence:
    /// 1. Run startup checks (ffprobe, and ffmpeg when screenshots are on)
    /// 2. Derive concurrency plan
    /// 3. Build the ffprobe and ffmpeg adapters
    ///
    /// # Arguments
    /// * `config` - Fully merged configuration
    ///
    /// # Returns
    /// * `Ok(Checker)` - Checker initialized successfully
    /// * `Err(CheckerError)` - A required tool is missing
    pub fn new(config: Config) -> Result<Self, CheckerError> {
        run_startup_checks(&config)?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the checker without running startup checks
    ///
    /// Useful for testing when external tools (ffprobe, ffmpeg) are not available.
    pub fn new_without_checks(config: Config) -> Self {
        let concurrency_plan = derive_plan(&config);
        let prober: Arc<dyn Prober> = Arc::new(FfprobeProber::new(&config.probe));
        let screenshotter: Option<Arc<dyn Screenshotter>> = if config.screenshot.enabled {
            Some(Arc::new(FfmpegScreenshotter::new(&config.screenshot)))
        } else {
            None
        };
        let classifier = Classifier::new(&config.classify);

        Self {
            config,
            concurrency_plan,
            prober,
            screenshotter,
            classifier,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the probe capability
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    /// Replace the screenshot capability; only used when screenshots are enabled
    pub fn with_screenshotter(mut self, screenshotter: Arc<dyn Screenshotter>) -> Self {
        self.screenshotter = Some(screenshotter);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops dispatch when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Timeouts for the first pass and the optional retry pass
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.probe.timeout(),
            self.config.probe.extended_timeout(),
        )
    }

    /// Reporter configured for this run's colour setting
    pub fn reporter(&self) -> Reporter {
        Reporter::new(self.classifier.clone(), self.config.output.color)
    }

    /// Entries of `playlist` kept by the configured group filter
    ///
    /// # Returns
    /// * `Err(PlaylistError::NoMatchingEntries)` if a filter is set and nothing matches
    pub fn select_entries(&self, playlist: &Playlist) -> Result<Vec<ChannelEntry>, CheckerError> {
        let group = self.config.filter.group.as_deref();
        let selected = filter_by_group(&playlist.entries, group, self.config.filter.group_match);

        if let Some(group) = group {
            if selected.is_empty() {
                return Err(PlaylistError::NoMatchingEntries(group.to_string()).into());
            }
            info!(
                "Group '{}' selected {} of {} channels",
                group,
                selected.len(),
                playlist.entries.len()
            );
        }

        Ok(selected)
    }

    /// Probe and classify `entries`, calling `on_line` with each progress line
    ///
    /// Screenshots are written to `screenshot_dir` when one is given and a
    /// screenshot capability is configured.
    pub async fn check_entries<F>(
        &self,
        entries: Vec<ChannelEntry>,
        screenshot_dir: Option<PathBuf>,
        mut on_line: F,
    ) -> RunReport
    where
        F: FnMut(&str),
    {
        let mut scheduler = ProbeScheduler::new(self.prober.clone(), self.concurrency_plan.clone())
            .with_cancellation(self.cancel.clone());

        if let (Some(screenshotter), Some(output_dir)) = (&self.screenshotter, screenshot_dir) {
            scheduler = scheduler.with_screenshots(ScreenshotPlan {
                screenshotter: screenshotter.clone(),
                output_dir,
            });
        }

        let reporter = self.reporter();
        let outcome = scheduler
            .run(entries, &self.retry_policy(), |result, completed, total| {
                on_line(&reporter.progress_line(result, completed, total));
            })
            .await;

        RunReport::build(outcome, &self.classifier)
    }

    /// Run the full pipeline on the playlist at `playlist_path`
    ///
    /// Steps:
    /// 1. Load and parse the playlist (fatal on failure)
    /// 2. Apply the group filter (fatal if nothing matches)
    /// 3. Create the screenshot directory, if screenshots are enabled
    /// 4. Probe, retry and classify every entry
    /// 5. Write split playlists, if enabled
    ///
    /// Progress lines are passed to `on_line` in completion order.
    pub async fn run<F>(&self, playlist_path: &Path, on_line: F) -> Result<RunSummary, CheckerError>
    where
        F: FnMut(&str),
    {
        let playlist = load_playlist(playlist_path)?;
        let entries = self.select_entries(&playlist)?;

        let screenshot_dir = if self.config.screenshot.enabled {
            let dir = self.config.screenshot.output_dir.clone().unwrap_or_else(|| {
                default_screenshot_dir(playlist_path, self.config.filter.group.as_deref())
            });
            std::fs::create_dir_all(&dir).map_err(|source| CheckerError::ScreenshotDir {
                path: dir.clone(),
                source,
            })?;
            Some(dir)
        } else {
            None
        };

        let report = self
            .check_entries(entries, screenshot_dir.clone(), on_line)
            .await;

        if report.interrupted {
            warn!("Run interrupted; {} channels were not probed", count_cancelled(&report));
        }

        let split = if self.config.output.split {
            Some(write_split_playlists(
                playlist_path,
                &playlist.header_block(),
                &report,
            )?)
        } else {
            None
        };

        Ok(RunSummary {
            report,
            split,
            screenshot_dir,
        })
    }
}

fn count_cancelled(report: &RunReport) -> usize {
    report
        .rows
        .iter()
        .filter(|row| {
            matches!(row.result.outcome, ProbeOutcome::Dead(FailureReason::Cancelled))
        })
        .count()
}
