//! Playlist splitter module.
//!
//! Writes the working and dead subsets of a checked playlist back out in the
//! input format. Only membership is filtered; every metadata line is copied
//! verbatim.

use crate::playlist::ChannelEntry;
use crate::report::RunReport;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Extension used when the input playlist has none.
const DEFAULT_EXTENSION: &str = "m3u";

/// Errors that can occur while writing split playlists.
#[derive(Debug, Error)]
pub enum SplitError {
    /// Failed to write one of the derived playlists.
    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination paths of the two derived playlists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPaths {
    pub working: PathBuf,
    pub dead: PathBuf,
}

/// Derives the split file paths next to the input playlist.
///
/// `/lists/world.m3u8` becomes `/lists/world_working.m3u8` and
/// `/lists/world_dead.m3u8`.
///
/// # Arguments
///
/// * `playlist_path` - Path of the playlist that was checked
///
/// # Returns
///
/// The working and dead playlist paths
pub fn split_paths(playlist_path: &Path) -> SplitPaths {
    let stem = playlist_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "playlist".to_string());
    let ext = playlist_path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    let dir = playlist_path.parent().unwrap_or_else(|| Path::new(""));

    SplitPaths {
        working: dir.join(format!("{}_working.{}", stem, ext)),
        dead: dir.join(format!("{}_dead.{}", stem, ext)),
    }
}

/// Renders a playlist: header block, then each entry's metadata lines and URL.
pub fn render_playlist<'a, I>(header: &str, entries: I) -> String
where
    I: IntoIterator<Item = &'a ChannelEntry>,
{
    let mut out = String::new();
    out.push_str(header);
    out.push('\n');
    for entry in entries {
        for line in &entry.metadata_lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&entry.url);
        out.push('\n');
    }
    out
}

/// Writes the working and dead playlists for a finished run.
///
/// Both files are always written, even when one subset is empty, so a
/// previous run's output is never left behind.
///
/// # Arguments
///
/// * `playlist_path` - Path of the checked playlist; outputs go beside it
/// * `header` - Header block of the checked playlist
/// * `report` - Results of the run
///
/// # Returns
///
/// * `Ok(SplitPaths)` with the written paths
/// * `Err(SplitError)` if either file could not be written
pub fn write_split_playlists(
    playlist_path: &Path,
    header: &str,
    report: &RunReport,
) -> Result<SplitPaths, SplitError> {
    let paths = split_paths(playlist_path);

    let working = report.working();
    let dead = report.dead();

    write_file(&paths.working, &render_playlist(header, working.iter().copied()))?;
    write_file(&paths.dead, &render_playlist(header, dead.iter().copied()))?;

    info!(
        working = working.len(),
        dead = dead.len(),
        working_path = %paths.working.display(),
        dead_path = %paths.dead.display(),
        "Wrote split playlists"
    );

    Ok(paths)
}

fn write_file(path: &Path, contents: &str) -> Result<(), SplitError> {
    fs::write(path, contents).map_err(|source| SplitError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })
}
