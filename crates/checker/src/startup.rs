//! Startup checks module for the IPTV checker
//!
//! Provides preflight checks to verify the external tools are usable before a run:
//! - ffprobe availability (always)
//! - ffmpeg availability (only when screenshots are enabled)

use crate::config::Config;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffprobe not available: {0}")]
    FfprobeUnavailable(String),

    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),
}

/// Parse the version from a `-version` banner
///
/// Handles the usual FFmpeg builds:
/// - Standard: "ffprobe version 6.1.1 ..."
/// - N-prefixed: "ffmpeg version n7.0-... ..."
/// - Distro suffixed: "ffprobe version 4.4.2-0ubuntu0.22.04.1 ..."
///
/// Returns the version token with any leading `n` stripped.
pub fn parse_tool_version(tool: &str, version_output: &str) -> Option<String> {
    let marker = format!("{} version", tool.to_lowercase());
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(&marker))?;

    let lower = version_line.to_lowercase();
    let start = lower.find(&marker)? + marker.len();
    let token = version_line[start..].split_whitespace().next()?;

    let version = token.trim_start_matches('n');
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Run `<program> -version` and return the parsed version if the tool works.
///
/// A tool that runs successfully but prints an unfamiliar banner still counts
/// as available; the version is then reported as `unknown`.
fn probe_tool(program: &str, tool: &str) -> Result<String, String> {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            format!(
                "{} -version failed; is {} installed and in PATH? Error: {}",
                program, tool, e
            )
        })?;

    if !output.status.success() {
        return Err(format!("{} -version exited with {}", program, output.status));
    }

    let banner = String::from_utf8_lossy(&output.stdout);
    Ok(parse_tool_version(tool, &banner).unwrap_or_else(|| "unknown".to_string()))
}

/// Check that ffprobe can be executed
pub fn check_ffprobe_available(program: &str) -> Result<String, StartupError> {
    let version = probe_tool(program, "ffprobe").map_err(StartupError::FfprobeUnavailable)?;
    info!(program, %version, "ffprobe available");
    Ok(version)
}

/// Check that ffmpeg can be executed
pub fn check_ffmpeg_available(program: &str) -> Result<String, StartupError> {
    let version = probe_tool(program, "ffmpeg").map_err(StartupError::FfmpegUnavailable)?;
    info!(program, %version, "ffmpeg available");
    Ok(version)
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. ffprobe availability
/// 2. ffmpeg availability, if screenshots are enabled
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    check_ffprobe_available(&cfg.probe.ffprobe_path)?;
    if cfg.screenshot.enabled {
        check_ffmpeg_available(&cfg.screenshot.ffmpeg_path)?;
    }
    Ok(())
}
