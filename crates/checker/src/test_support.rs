//! Fakes shared by the unit tests. No subprocess is ever started here.

use crate::playlist::ChannelEntry;
use crate::prober::{FailureReason, MediaInfo, ProbeOutcome, Prober};
use crate::screenshot::{ScreenshotError, Screenshotter};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn alive_1080p60() -> ProbeOutcome {
    ProbeOutcome::Alive(MediaInfo {
        video_codec: Some("h264".to_string()),
        width: Some(1920),
        height: Some(1080),
        framerate: Some(60.0),
        audio_codec: Some("aac".to_string()),
        audio_bitrate_kbps: Some(128),
    })
}

/// `n` entries named "Channel i" at "http://host/i".
pub fn make_entries(n: usize) -> Vec<ChannelEntry> {
    (0..n)
        .map(|i| ChannelEntry {
            index: i,
            name: format!("Channel {}", i),
            group_title: None,
            url: format!("http://host/{}", i),
            duration: "-1".to_string(),
            attributes: Vec::new(),
            labeled_resolution: None,
            metadata_lines: vec![format!("#EXTINF:-1,Channel {}", i)],
        })
        .collect()
}

/// Deterministic prober keyed by URL. Unknown URLs are alive at 1080p60.
#[derive(Default)]
pub struct FakeProber {
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
    delays: Mutex<HashMap<String, Duration>>,
    min_timeouts: Mutex<HashMap<String, Duration>>,
    default_delay: Duration,
    calls: Mutex<Vec<(String, Duration)>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn set_outcome(&self, url: &str, outcome: ProbeOutcome) {
        self.outcomes.lock().unwrap().insert(url.to_string(), outcome);
    }

    pub fn set_delay(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }

    /// The stream only answers when given at least `min` to do so.
    pub fn set_min_timeout(&self, url: &str, min: Duration) {
        self.min_timeouts.lock().unwrap().insert(url.to_string(), min);
    }

    /// Every (url, timeout) the prober was called with, in call order.
    pub fn calls(&self) -> Vec<(String, Duration)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        self.calls.lock().unwrap().push((url.to_string(), timeout));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let too_short = self
            .min_timeouts
            .lock()
            .unwrap()
            .get(url)
            .is_some_and(|min| timeout < *min);
        if too_short {
            return ProbeOutcome::Dead(FailureReason::Timeout);
        }

        self.outcomes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(alive_1080p60)
    }
}

/// Records captured URLs without touching the filesystem.
#[derive(Default)]
pub struct RecordingScreenshotter {
    captured: Mutex<Vec<String>>,
}

impl RecordingScreenshotter {
    pub fn captured(&self) -> Vec<String> {
        self.captured.lock().unwrap().clone()
    }
}

#[async_trait]
impl Screenshotter for RecordingScreenshotter {
    async fn capture(&self, url: &str, _output_path: &Path) -> Result<(), ScreenshotError> {
        self.captured.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

pub struct FailingScreenshotter;

#[async_trait]
impl Screenshotter for FailingScreenshotter {
    async fn capture(&self, _url: &str, _output_path: &Path) -> Result<(), ScreenshotError> {
        Err(ScreenshotError::FfmpegFailed(1))
    }
}
