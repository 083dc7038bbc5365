//! Playlist module for parsing extended M3U playlists.
//!
//! This module turns raw playlist text into an ordered list of
//! [`ChannelEntry`] values, keeping each entry's metadata lines verbatim so
//! that derived playlists can be written back without rewriting anything.

use crate::config::GroupMatch;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Header written when the source playlist had none.
pub const DEFAULT_HEADER: &str = "#EXTM3U";

/// Display name used when an `#EXTINF` line carries no title.
pub const UNKNOWN_CHANNEL: &str = "Unknown Channel";

/// Fatal playlist errors. Anything raised here aborts the run before probing.
#[derive(Debug, Error)]
pub enum PlaylistError {
    /// The playlist file could not be read.
    #[error("Failed to read playlist {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No usable `#EXTINF` + URL pair was found.
    #[error("Playlist contains no channel entries")]
    NoEntries,

    /// A group filter was configured and nothing matched it.
    #[error("No channels found in group '{0}'")]
    NoMatchingEntries(String),
}

/// Resolution advertised by a channel's name, e.g. "FHD" or "720p".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionLabel {
    /// Token as written in the playlist.
    pub text: String,
    /// Nominal frame height the token stands for.
    pub height: u32,
}

/// One channel parsed from the playlist. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEntry {
    /// Position among all parsed entries (0-based, before filtering).
    pub index: usize,
    /// Display name (text after the `#EXTINF` comma).
    pub name: String,
    /// `group-title` attribute, or the `#EXTGRP` directive.
    pub group_title: Option<String>,
    /// Stream URL.
    pub url: String,
    /// Duration field of the `#EXTINF` line, usually `-1`.
    pub duration: String,
    /// `key="value"` attributes in playlist order.
    pub attributes: Vec<(String, String)>,
    /// Resolution detected from the name or `tvg-name`.
    pub labeled_resolution: Option<ResolutionLabel>,
    /// `#EXTINF` line and any directives up to the URL, verbatim.
    pub metadata_lines: Vec<String>,
}

impl ChannelEntry {
    /// Looks up an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    /// `#EXTM3U` line as written, if present.
    pub header: Option<String>,
    /// Global directives before the first `#EXTINF` (e.g. `#PLAYLIST:`), verbatim.
    pub directives: Vec<String>,
    /// Entries in file order.
    pub entries: Vec<ChannelEntry>,
}

impl Playlist {
    /// Header block to write at the top of derived playlists: the `#EXTM3U`
    /// line followed by the global directives, newline separated.
    pub fn header_block(&self) -> String {
        let mut lines = vec![self.header.as_deref().unwrap_or(DEFAULT_HEADER)];
        lines.extend(self.directives.iter().map(String::as_str));
        lines.join("\n")
    }
}

/// Reads and parses a playlist file.
pub fn load_playlist(path: &Path) -> Result<Playlist, PlaylistError> {
    let content = std::fs::read_to_string(path).map_err(|source| PlaylistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_playlist(&content)
}

/// Entry under construction: `#EXTINF` seen, URL not yet.
struct PendingEntry {
    line_no: usize,
    extinf: ExtInf,
    extgrp: Option<String>,
    metadata_lines: Vec<String>,
}

/// Parses playlist text into entries.
///
/// Parsing rules:
/// - The first `#EXTM3U` line before any entry is kept as the header
/// - `#` directives before the first `#EXTINF` are kept as global directives
/// - `#EXTINF` starts an entry; following `#` directives belong to it
/// - The next non-comment line is the entry's URL
/// - An `#EXTINF` without a URL is skipped with a warning
/// - URLs without a preceding `#EXTINF` are skipped with a warning
///
/// Returns `PlaylistError::NoEntries` if nothing usable was found.
pub fn parse_playlist(content: &str) -> Result<Playlist, PlaylistError> {
    let mut header = None;
    let mut directives = Vec::new();
    let mut entries = Vec::new();
    let mut pending: Option<PendingEntry> = None;

    for (line_idx, raw_line) in content.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("#EXTM3U") {
            if header.is_none() && entries.is_empty() && pending.is_none() {
                header = Some(raw_line.to_string());
            }
            continue;
        }

        if line.starts_with("#EXTINF") {
            if let Some(stale) = pending.take() {
                warn!(
                    "Skipping entry '{}' at line {}: missing URL",
                    stale.extinf.name, stale.line_no
                );
            }
            pending = Some(PendingEntry {
                line_no,
                extinf: parse_extinf(line),
                extgrp: None,
                metadata_lines: vec![raw_line.to_string()],
            });
            continue;
        }

        if line.starts_with('#') {
            if let Some(entry) = pending.as_mut() {
                if let Some(group) = line.strip_prefix("#EXTGRP:") {
                    let group = group.trim();
                    if !group.is_empty() {
                        entry.extgrp = Some(group.to_string());
                    }
                }
                entry.metadata_lines.push(raw_line.to_string());
            } else if entries.is_empty() {
                directives.push(raw_line.to_string());
            }
            continue;
        }

        match pending.take() {
            Some(entry) => {
                let index = entries.len();
                entries.push(finish_entry(index, entry, line));
            }
            None => warn!("Skipping URL at line {}: no preceding #EXTINF", line_no),
        }
    }

    if let Some(stale) = pending {
        warn!(
            "Skipping entry '{}' at line {}: missing URL",
            stale.extinf.name, stale.line_no
        );
    }

    if entries.is_empty() {
        return Err(PlaylistError::NoEntries);
    }

    debug!("Parsed {} channel entries", entries.len());
    Ok(Playlist {
        header,
        directives,
        entries,
    })
}

fn finish_entry(index: usize, pending: PendingEntry, url: &str) -> ChannelEntry {
    let ExtInf {
        duration,
        attributes,
        name,
    } = pending.extinf;

    let group_title = attributes
        .iter()
        .find(|(k, v)| k == "group-title" && !v.is_empty())
        .map(|(_, v)| v.clone())
        .or(pending.extgrp);

    let labeled_resolution = detect_resolution_label(&name).or_else(|| {
        attributes
            .iter()
            .find(|(k, _)| k == "tvg-name")
            .and_then(|(_, v)| detect_resolution_label(v))
    });

    ChannelEntry {
        index,
        name,
        group_title,
        url: url.to_string(),
        duration,
        attributes,
        labeled_resolution,
        metadata_lines: pending.metadata_lines,
    }
}

/// Fields of one `#EXTINF` line.
#[derive(Debug, Clone, PartialEq)]
struct ExtInf {
    duration: String,
    attributes: Vec<(String, String)>,
    name: String,
}

/// Parses `#EXTINF:<duration> key="value" ...,<name>`.
///
/// The name starts after the first comma outside double quotes, so commas
/// inside attribute values do not truncate it.
fn parse_extinf(line: &str) -> ExtInf {
    let body = line.strip_prefix("#EXTINF:").unwrap_or_else(|| {
        line.strip_prefix("#EXTINF").unwrap_or(line)
    });

    let (info, name) = match find_unquoted_comma(body) {
        Some(pos) => (&body[..pos], body[pos + 1..].trim()),
        None => (body, ""),
    };

    let info = info.trim();
    let (duration, attr_part) = match info.find(char::is_whitespace) {
        Some(pos) => (&info[..pos], &info[pos..]),
        None => (info, ""),
    };

    let name = if name.is_empty() {
        UNKNOWN_CHANNEL.to_string()
    } else {
        name.to_string()
    };

    ExtInf {
        duration: duration.to_string(),
        attributes: parse_attributes(attr_part),
        name,
    }
}

fn find_unquoted_comma(s: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (pos, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some(pos),
            _ => {}
        }
    }
    None
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z0-9_-]+)=(?:"([^"]*)"|([^\s"]+))"#).expect("valid attribute regex")
    })
}

/// Parses `key="value"` and `key=value` pairs, in any order.
fn parse_attributes(s: &str) -> Vec<(String, String)> {
    attribute_regex()
        .captures_iter(s)
        .map(|caps| {
            let key = caps[1].to_string();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (key, value)
        })
        .collect()
}

fn resolution_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(2160p|4k|uhd|1440p|1080[pi]|fhd|720p|hd|576[pi]|480[pi]|sd)\b")
            .expect("valid resolution regex")
    })
}

/// Finds the first resolution token in a channel name.
pub fn detect_resolution_label(text: &str) -> Option<ResolutionLabel> {
    let found = resolution_regex().find(text)?;
    let token = found.as_str();
    let height = match token.to_lowercase().as_str() {
        "2160p" | "4k" | "uhd" => 2160,
        "1440p" => 1440,
        "1080p" | "1080i" | "fhd" => 1080,
        "720p" | "hd" => 720,
        "576p" | "576i" => 576,
        _ => 480,
    };
    Some(ResolutionLabel {
        text: token.to_string(),
        height,
    })
}

/// Keeps the entries whose group matches `group` under `policy`.
///
/// Entries without a group never match a configured filter. With no filter
/// every entry is kept. Relative order is preserved.
pub fn filter_by_group(
    entries: &[ChannelEntry],
    group: Option<&str>,
    policy: GroupMatch,
) -> Vec<ChannelEntry> {
    match group {
        None => entries.to_vec(),
        Some(filter) => entries
            .iter()
            .filter(|entry| {
                entry
                    .group_title
                    .as_deref()
                    .map(|g| policy.matches(filter, g))
                    .unwrap_or(false)
            })
            .cloned()
            .collect(),
    }
}
