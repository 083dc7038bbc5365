//! Reporter module for formatting check results.
//!
//! Builds the [`RunReport`] from scheduler output and renders progress
//! lines, summary sections and the full ordered report text.

use crate::classify::{ClassificationFacts, Classifier};
use crate::playlist::ChannelEntry;
use crate::prober::{MediaInfo, ProbeOutcome};
use crate::scheduler::{ProbeResult, ScheduleOutcome};

const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

/// One checked channel with its final result and derived facts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub result: ProbeResult,
    pub facts: ClassificationFacts,
}

impl ReportRow {
    pub fn entry(&self) -> &ChannelEntry {
        &self.result.entry
    }
}

/// All results of a run, in playlist order.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub rows: Vec<ReportRow>,
    /// The run was cancelled before every channel was probed.
    pub interrupted: bool,
}

impl RunReport {
    /// Classifies every result. Row order follows the scheduler's input order.
    pub fn build(outcome: ScheduleOutcome, classifier: &Classifier) -> Self {
        let rows = outcome
            .results
            .into_iter()
            .map(|result| {
                let facts = classifier.classify(&result.entry, &result.outcome);
                ReportRow { result, facts }
            })
            .collect();

        Self {
            rows,
            interrupted: outcome.interrupted,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.rows.iter().filter(|r| r.result.is_alive()).count()
    }

    pub fn dead_count(&self) -> usize {
        self.len() - self.alive_count()
    }

    /// Rows flagged for low framerate, in playlist order.
    pub fn low_framerate(&self) -> Vec<&ReportRow> {
        self.rows.iter().filter(|r| r.facts.is_low_framerate).collect()
    }

    /// Rows whose label disagrees with the measured resolution, in playlist order.
    pub fn mislabeled(&self) -> Vec<&ReportRow> {
        self.rows.iter().filter(|r| r.facts.is_mislabeled).collect()
    }

    /// Alive entries, in playlist order.
    pub fn working(&self) -> Vec<&ChannelEntry> {
        self.rows
            .iter()
            .filter(|r| r.result.is_alive())
            .map(ReportRow::entry)
            .collect()
    }

    /// Dead entries, in playlist order.
    pub fn dead(&self) -> Vec<&ChannelEntry> {
        self.rows
            .iter()
            .filter(|r| !r.result.is_alive())
            .map(ReportRow::entry)
            .collect()
    }
}

/// Formats report lines.
#[derive(Debug, Clone)]
pub struct Reporter {
    classifier: Classifier,
    color: bool,
}

impl Reporter {
    pub fn new(classifier: Classifier, color: bool) -> Self {
        Self { classifier, color }
    }

    /// `<completed>/<total> <glyph> <name> | ...`
    pub fn progress_line(&self, result: &ProbeResult, completed: usize, total: usize) -> String {
        let (glyph, detail, color) = match &result.outcome {
            ProbeOutcome::Alive(info) => (
                '✓',
                format!(
                    "Video: {} | Audio: {}",
                    self.video_descriptor(info),
                    audio_descriptor(info)
                ),
                GREEN,
            ),
            ProbeOutcome::Dead(reason) => ('✕', format!("Dead: {}", reason), RED),
        };

        let line = format!(
            "{}/{} {} {} | {}",
            completed, total, glyph, result.entry.name, detail
        );

        if self.color {
            format!("{}{}{}", color, line, RESET)
        } else {
            line
        }
    }

    /// `1080p 50fps H264`, omitting unknown parts; `Unknown` if nothing is known.
    pub fn video_descriptor(&self, info: &MediaInfo) -> String {
        let parts: Vec<String> = [
            info.height
                .map(|h| self.classifier.class_for_height(h).to_string()),
            info.framerate.map(|fps| self.fps_text(fps)),
            info.video_codec.as_ref().map(|c| c.to_uppercase()),
        ]
        .into_iter()
        .flatten()
        .collect();

        join_or_unknown(parts)
    }

    fn fps_text(&self, fps: f64) -> String {
        format_fps(fps, self.classifier.low_framerate_threshold())
    }

    /// Low framerate and mislabeled sections plus a totals line.
    ///
    /// Empty sections are omitted entirely.
    pub fn summary(&self, report: &RunReport) -> String {
        let mut out = String::new();

        let low = report.low_framerate();
        if !low.is_empty() {
            out.push_str("Low framerate channels:\n");
            for (i, row) in low.iter().enumerate() {
                let fps = match &row.result.outcome {
                    ProbeOutcome::Alive(info) => info.framerate.map(|fps| self.fps_text(fps)),
                    ProbeOutcome::Dead(_) => None,
                };
                out.push_str(&format!(
                    "{}. {} - {}\n",
                    i + 1,
                    row.entry().name,
                    fps.unwrap_or_else(|| "unknown".to_string())
                ));
            }
            out.push('\n');
        }

        let mislabeled = report.mislabeled();
        if !mislabeled.is_empty() {
            out.push_str("Mislabeled channels:\n");
            for (i, row) in mislabeled.iter().enumerate() {
                out.push_str(&format!(
                    "{}. {} - Expected {}, got {}\n",
                    i + 1,
                    row.entry().name,
                    row.facts.labeled_class.as_deref().unwrap_or("unknown"),
                    row.facts.measured_class.as_deref().unwrap_or("unknown"),
                ));
            }
            out.push('\n');
        }

        out.push_str(&format!(
            "Alive: {} / Dead: {} / Total: {}",
            report.alive_count(),
            report.dead_count(),
            report.len()
        ));
        if report.interrupted {
            out.push_str(" (interrupted)");
        }
        out.push('\n');
        out
    }

    /// Every row in playlist order (counter = position) followed by the summary.
    ///
    /// Never coloured, so the text is stable across identical runs.
    pub fn render_report(&self, report: &RunReport) -> String {
        let plain = Reporter {
            classifier: self.classifier.clone(),
            color: false,
        };
        let total = report.len();
        let mut out = String::new();
        for row in &report.rows {
            out.push_str(&plain.progress_line(&row.result, row.result.position, total));
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&plain.summary(report));
        out
    }
}

/// `128 kbps AAC`, omitting unknown parts; `Unknown` if nothing is known.
pub fn audio_descriptor(info: &MediaInfo) -> String {
    let parts: Vec<String> = [
        info.audio_bitrate_kbps.map(|kbps| format!("{} kbps", kbps)),
        info.audio_codec.as_ref().map(|c| c.to_uppercase()),
    ]
    .into_iter()
    .flatten()
    .collect();

    join_or_unknown(parts)
}

/// `50fps`, or `29.97fps` for fractional rates.
///
/// A rate whose rounded value falls on the other side of `threshold` is
/// printed in full (`30.004fps`), so it never reads like a flagged rate.
pub fn format_fps(fps: f64, threshold: f64) -> String {
    let rounded = fps.round();
    if (fps <= threshold) != (rounded <= threshold) {
        format!("{}fps", fps)
    } else if (fps - rounded).abs() < 0.005 {
        format!("{:.0}fps", fps)
    } else {
        format!("{:.2}fps", fps)
    }
}

fn join_or_unknown(parts: Vec<String>) -> String {
    if parts.is_empty() {
        "Unknown".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::detect_resolution_label;
    use crate::prober::FailureReason;
    use crate::test_support::{alive_1080p60, make_entries};
    use std::sync::Arc;
    use std::time::Duration;

    fn result(position: usize, name: &str, outcome: ProbeOutcome) -> ProbeResult {
        let mut entry = make_entries(position).pop().expect("entry");
        entry.name = name.to_string();
        entry.labeled_resolution = detect_resolution_label(name);
        ProbeResult {
            position,
            entry: Arc::new(entry),
            outcome,
            attempt: 1,
            timeout: Duration::from_secs(5),
            screenshot: None,
        }
    }

    fn media(height: Option<u32>, fps: Option<f64>) -> ProbeOutcome {
        ProbeOutcome::Alive(MediaInfo {
            video_codec: Some("hevc".to_string()),
            width: None,
            height,
            framerate: fps,
            audio_codec: Some("mp2".to_string()),
            audio_bitrate_kbps: Some(192),
        })
    }

    fn report(results: Vec<ProbeResult>, interrupted: bool) -> RunReport {
        RunReport::build(
            ScheduleOutcome {
                results,
                interrupted,
            },
            &Classifier::default(),
        )
    }

    fn plain() -> Reporter {
        Reporter::new(Classifier::default(), false)
    }

    #[test]
    fn test_progress_line_alive() {
        let line = plain().progress_line(&result(1, "News", alive_1080p60()), 4, 42);
        assert_eq!(line, "4/42 ✓ News | Video: 1080p 60fps H264 | Audio: 128 kbps AAC");
    }

    #[test]
    fn test_progress_line_dead() {
        let line = plain().progress_line(
            &result(2, "Sport", ProbeOutcome::Dead(FailureReason::Timeout)),
            1,
            2,
        );
        assert_eq!(line, "1/2 ✕ Sport | Dead: timeout");
    }

    #[test]
    fn test_progress_line_partial_media() {
        let outcome = ProbeOutcome::Alive(MediaInfo::default());
        let line = plain().progress_line(&result(1, "Radio", outcome), 1, 1);
        assert_eq!(line, "1/1 ✓ Radio | Video: Unknown | Audio: Unknown");
    }

    #[test]
    fn test_progress_line_color() {
        let reporter = Reporter::new(Classifier::default(), true);
        let alive = reporter.progress_line(&result(1, "A", alive_1080p60()), 1, 2);
        let dead = reporter.progress_line(
            &result(2, "B", ProbeOutcome::Dead(FailureReason::NoStream)),
            2,
            2,
        );
        assert!(alive.starts_with(GREEN) && alive.ends_with(RESET));
        assert!(dead.starts_with(RED) && dead.ends_with(RESET));
    }

    #[test]
    fn test_format_fps() {
        assert_eq!(format_fps(25.0, 30.0), "25fps");
        assert_eq!(format_fps(29.97002997, 30.0), "29.97fps");
        assert_eq!(format_fps(59.999, 30.0), "60fps");
    }

    #[test]
    fn test_format_fps_near_threshold() {
        assert_eq!(format_fps(30.0, 30.0), "30fps");
        assert_eq!(format_fps(29.999, 30.0), "30fps");
        assert_eq!(format_fps(30.004, 30.0), "30.004fps");
        assert_eq!(format_fps(24.49, 24.0), "24.49fps");

        let reporter = plain();
        let info = match media(Some(1080), Some(30.004)) {
            ProbeOutcome::Alive(info) => info,
            ProbeOutcome::Dead(_) => unreachable!(),
        };
        assert_eq!(reporter.video_descriptor(&info), "1080p 30.004fps HEVC");
    }

    #[test]
    fn test_summary_sections() {
        let report = report(
            vec![
                result(1, "Slow", media(Some(720), Some(25.0))),
                result(2, "Cinema 4K", media(Some(1080), Some(50.0))),
                result(3, "Gone", ProbeOutcome::Dead(FailureReason::ConnectionError)),
                result(4, "Boundary", media(Some(1080), Some(30.0))),
            ],
            false,
        );

        let summary = plain().summary(&report);
        assert_eq!(
            summary,
            "Low framerate channels:\n\
             1. Slow - 25fps\n\
             2. Boundary - 30fps\n\
             \n\
             Mislabeled channels:\n\
             1. Cinema 4K - Expected 4K, got 1080p\n\
             \n\
             Alive: 3 / Dead: 1 / Total: 4\n"
        );
    }

    #[test]
    fn test_summary_omits_empty_sections() {
        let report = report(vec![result(1, "Fine", alive_1080p60())], true);
        assert_eq!(
            plain().summary(&report),
            "Alive: 1 / Dead: 0 / Total: 1 (interrupted)\n"
        );
    }

    #[test]
    fn test_working_and_dead_partition() {
        let report = report(
            vec![
                result(1, "A", alive_1080p60()),
                result(2, "B", ProbeOutcome::Dead(FailureReason::Timeout)),
                result(3, "C", alive_1080p60()),
                result(4, "D", ProbeOutcome::Dead(FailureReason::Cancelled)),
            ],
            false,
        );

        let working: Vec<&str> = report.working().iter().map(|e| e.name.as_str()).collect();
        let dead: Vec<&str> = report.dead().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(working, vec!["A", "C"]);
        assert_eq!(dead, vec!["B", "D"]);
    }

    #[test]
    fn test_render_report_is_ordered_and_stable() {
        let build = || {
            report(
                vec![
                    result(1, "A", alive_1080p60()),
                    result(2, "B", ProbeOutcome::Dead(FailureReason::Timeout)),
                ],
                false,
            )
        };
        let reporter = Reporter::new(Classifier::default(), true);
        let text = reporter.render_report(&build());

        assert_eq!(text, reporter.render_report(&build()));
        assert!(!text.contains('\x1b'));
        assert!(text.starts_with(
            "1/2 ✓ A | Video: 1080p 60fps H264 | Audio: 128 kbps AAC\n2/2 ✕ B | Dead: timeout\n"
        ));
    }
}
