//! CLI entry point for the IPTV checker
//!
//! Parses command line arguments, merges them over the configuration and
//! runs one check of the given playlist.

use clap::Parser;
use iptv_checker::config::{GroupMatch, DEFAULT_EXTENDED_TIMEOUT_SECS};
use iptv_checker::{Checker, CheckerError, Config};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Exit status for unreadable, empty or fully filtered playlists.
const EXIT_INPUT_ERROR: u8 = 2;

/// IPTV Checker - probe every channel of an M3U playlist
#[derive(Parser, Debug)]
#[command(name = "iptv-checker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the M3U playlist
    playlist: PathBuf,

    /// Only check channels whose group-title equals this value
    #[arg(short, long)]
    group: Option<String>,

    /// Compare the group filter ignoring case
    #[arg(long)]
    group_ignore_case: bool,

    /// Timeout of the first probe attempt, in seconds
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Retry dead channels once with a longer timeout (`--extended-timeout=SECS`, 10 s if no value is given)
    #[arg(short, long, num_args = 0..=1, require_equals = true)]
    extended_timeout: Option<Option<f64>>,

    /// Write <name>_working and <name>_dead playlists next to the input
    #[arg(short, long)]
    split: bool,

    /// Capture a frame from every working channel
    #[arg(long)]
    screenshots: bool,

    /// Directory for screenshots (default: <name>_<group>_screenshots)
    #[arg(long)]
    screenshot_dir: Option<PathBuf>,

    /// Maximum number of probes in flight (default: derived from CPU cores)
    #[arg(short = 'j', long)]
    concurrency: Option<u32>,

    /// Path to a configuration file (config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the full report, in playlist order, to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Disable coloured output
    #[arg(long)]
    no_color: bool,

    /// Skip startup checks (ffprobe, ffmpeg). For testing only.
    #[arg(long)]
    skip_checks: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Map `-v` occurrences to a default log filter; RUST_LOG wins when set.
fn log_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "info",
        _ => "debug",
    }
}

fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Defaults, then the config file or environment, then flags.
fn build_config(args: &Args) -> Result<Config, CheckerError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    apply_args(&mut config, args);
    Ok(config)
}

fn apply_args(config: &mut Config, args: &Args) {
    if let Some(group) = &args.group {
        config.filter.group = Some(group.clone());
    }
    if args.group_ignore_case {
        config.filter.group_match = GroupMatch::IgnoreCase;
    }
    if let Some(timeout) = args.timeout {
        config.probe.timeout_secs = timeout;
    }
    if let Some(extended) = args.extended_timeout {
        config.probe.extended_timeout_secs =
            Some(extended.unwrap_or(DEFAULT_EXTENDED_TIMEOUT_SECS));
    }
    if args.split {
        config.output.split = true;
    }
    if args.screenshots {
        config.screenshot.enabled = true;
    }
    if let Some(dir) = &args.screenshot_dir {
        config.screenshot.output_dir = Some(dir.clone());
    }
    if let Some(limit) = args.concurrency {
        config.concurrency.max_concurrency = limit;
    }
    if args.no_color {
        config.output.color = false;
    }
}

fn exit_code_for(err: &CheckerError) -> ExitCode {
    if err.is_input_error() {
        ExitCode::from(EXIT_INPUT_ERROR)
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let checker = if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Checker::new_without_checks(config)
    } else {
        match Checker::new(config) {
            Ok(checker) => checker,
            Err(e) => {
                eprintln!("{}", e);
                return exit_code_for(&e);
            }
        }
    };

    let cancel = checker.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; finishing probes already running...");
            cancel.cancel();
        }
    });

    let summary = match checker.run(&args.playlist, |line| println!("{}", line)).await {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("{}", e);
            return exit_code_for(&e);
        }
    };

    let reporter = checker.reporter();
    println!();
    print!("{}", reporter.summary(&summary.report));

    if let Some(split) = &summary.split {
        println!("Working channels: {}", split.working.display());
        println!("Dead channels: {}", split.dead.display());
    }
    if let Some(dir) = &summary.screenshot_dir {
        println!("Screenshots: {}", dir.display());
    }

    if let Some(path) = &args.report {
        if let Err(e) = std::fs::write(path, reporter.render_report(&summary.report)) {
            eprintln!("Failed to write report {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
