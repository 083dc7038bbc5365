//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Timeout applied to the retry pass when extended retry is requested without a value.
pub const DEFAULT_EXTENDED_TIMEOUT_SECS: f64 = 10.0;

/// Longest duration accepted for any timeout or margin, in seconds.
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Converts configured seconds into a `Duration`.
///
/// Negative and NaN values become zero; anything above
/// [`MAX_TIMEOUT_SECS`], including infinity, is capped.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs.clamp(0.0, MAX_TIMEOUT_SECS))
}

/// Probe-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    /// Timeout for the first probe attempt, in seconds (default 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Timeout for the retry pass over dead entries (None = no retry)
    #[serde(default)]
    pub extended_timeout_secs: Option<f64>,
    /// Margin added on top of the timeout before the probe process is killed
    #[serde(default = "default_grace_secs")]
    pub grace_secs: f64,
    /// ffprobe executable
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

fn default_timeout_secs() -> f64 {
    5.0
}

fn default_grace_secs() -> f64 {
    2.0
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

impl ProbeConfig {
    /// Budget of the first probe attempt
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }

    /// Budget of the retry pass, if retry is enabled
    pub fn extended_timeout(&self) -> Option<Duration> {
        self.extended_timeout_secs.map(secs_to_duration)
    }

    /// Margin added before a running probe is killed
    pub fn grace(&self) -> Duration {
        secs_to_duration(self.grace_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            extended_timeout_secs: None,
            grace_secs: default_grace_secs(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

/// Concurrency configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConcurrencyConfig {
    /// Number of logical cores (auto-detected if None)
    #[serde(default)]
    pub logical_cores: Option<u32>,
    /// Maximum probes in flight (0 = auto-derive)
    #[serde(default)]
    pub max_concurrency: u32,
}

/// How a configured group filter is compared against an entry's group title
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupMatch {
    /// Case-sensitive equality
    #[default]
    Exact,
    /// Equality ignoring case
    IgnoreCase,
}

impl GroupMatch {
    /// Returns true when `group` satisfies `filter` under this policy.
    pub fn matches(self, filter: &str, group: &str) -> bool {
        match self {
            GroupMatch::Exact => filter == group,
            GroupMatch::IgnoreCase => filter.to_lowercase() == group.to_lowercase(),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(GroupMatch::Exact),
            "ignore_case" | "ignore-case" | "insensitive" => Some(GroupMatch::IgnoreCase),
            _ => None,
        }
    }
}

/// Group filter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FilterConfig {
    /// Only entries in this group are checked (None = all groups)
    #[serde(default)]
    pub group: Option<String>,
    /// Comparison policy for the group filter
    #[serde(default)]
    pub group_match: GroupMatch,
}

/// One row of the resolution class table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolutionClassRule {
    /// Class name shown to the user (e.g. "1080p")
    pub label: String,
    /// Smallest frame height that belongs to this class
    pub min_height: u32,
}

impl ResolutionClassRule {
    pub fn new(label: &str, min_height: u32) -> Self {
        Self {
            label: label.to_string(),
            min_height,
        }
    }
}

/// Classification configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifyConfig {
    /// Framerates at or below this value are flagged (default 30)
    #[serde(default = "default_low_framerate_threshold")]
    pub low_framerate_threshold: f64,
    /// Resolution classes; order does not matter, the highest matching `min_height` wins
    #[serde(default = "default_resolution_classes")]
    pub resolution_classes: Vec<ResolutionClassRule>,
    /// Class for heights below every rule
    #[serde(default = "default_fallback_class")]
    pub fallback_class: String,
}

fn default_low_framerate_threshold() -> f64 {
    30.0
}

fn default_resolution_classes() -> Vec<ResolutionClassRule> {
    vec![
        ResolutionClassRule::new("4K", 2160),
        ResolutionClassRule::new("1080p", 1080),
        ResolutionClassRule::new("720p", 720),
    ]
}

fn default_fallback_class() -> String {
    "SD".to_string()
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            low_framerate_threshold: default_low_framerate_threshold(),
            resolution_classes: default_resolution_classes(),
            fallback_class: default_fallback_class(),
        }
    }
}

/// Screenshot configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotConfig {
    /// Capture a frame from every live channel
    #[serde(default)]
    pub enabled: bool,
    /// ffmpeg executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Seek offset before the captured frame
    #[serde(default = "default_seek")]
    pub seek: String,
    /// Hard timeout for one capture, in seconds
    #[serde(default = "default_screenshot_timeout_secs")]
    pub timeout_secs: f64,
    /// Output directory (derived from the playlist name if None)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_seek() -> String {
    "00:00:02".to_string()
}

fn default_screenshot_timeout_secs() -> f64 {
    30.0
}

impl ScreenshotConfig {
    /// Hard limit for one capture
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ffmpeg_path: default_ffmpeg_path(),
            seek: default_seek(),
            timeout_secs: default_screenshot_timeout_secs(),
            output_dir: None,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Write `_working` and `_dead` playlists next to the input
    #[serde(default)]
    pub split: bool,
    /// Colour progress lines with ANSI escapes
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_color() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            split: false,
            color: default_color(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
    #[serde(default)]
    pub screenshot: ScreenshotConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - IPTV_TIMEOUT -> probe.timeout_secs
    /// - IPTV_EXTENDED_TIMEOUT -> probe.extended_timeout_secs
    /// - IPTV_LOGICAL_CORES -> concurrency.logical_cores
    /// - IPTV_MAX_CONCURRENCY -> concurrency.max_concurrency
    /// - IPTV_GROUP -> filter.group
    /// - IPTV_GROUP_MATCH -> filter.group_match
    /// - IPTV_SCREENSHOTS -> screenshot.enabled
    /// - IPTV_SPLIT -> output.split
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("IPTV_TIMEOUT") {
            if let Some(secs) = parse_positive_secs(&val) {
                self.probe.timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("IPTV_EXTENDED_TIMEOUT") {
            if let Some(secs) = parse_positive_secs(&val) {
                self.probe.extended_timeout_secs = Some(secs);
            }
        }

        if let Ok(val) = env::var("IPTV_LOGICAL_CORES") {
            if let Ok(cores) = val.parse::<u32>() {
                self.concurrency.logical_cores = Some(cores);
            }
        }

        if let Ok(val) = env::var("IPTV_MAX_CONCURRENCY") {
            if let Ok(max) = val.parse::<u32>() {
                self.concurrency.max_concurrency = max;
            }
        }

        if let Ok(val) = env::var("IPTV_GROUP") {
            if !val.is_empty() {
                self.filter.group = Some(val);
            }
        }

        if let Ok(val) = env::var("IPTV_GROUP_MATCH") {
            if let Some(policy) = GroupMatch::parse(&val) {
                self.filter.group_match = policy;
            }
        }

        if let Ok(val) = env::var("IPTV_SCREENSHOTS") {
            if let Some(flag) = parse_bool(&val) {
                self.screenshot.enabled = flag;
            }
        }

        if let Ok(val) = env::var("IPTV_SPLIT") {
            if let Some(flag) = parse_bool(&val) {
                self.output.split = flag;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }
}

// Accept "true", "1", "yes" as true; "false", "0", "no" as false
fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_positive_secs(val: &str) -> Option<f64> {
    val.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
}
