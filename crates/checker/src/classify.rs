//! Classifier module for deriving per-channel facts from probe results.
//!
//! Classification is a pure function of the channel entry and its final
//! probe outcome: low framerate detection and resolution label mismatch.
//! Resolution classes come from a configurable height table.

use crate::config::{ClassifyConfig, ResolutionClassRule};
use crate::playlist::ChannelEntry;
use crate::prober::ProbeOutcome;
use serde::{Deserialize, Serialize};

/// Facts derived from one entry's final probe outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationFacts {
    /// Framerate was reported and is at or below the threshold.
    pub is_low_framerate: bool,
    /// Labeled and measured resolution classes are both known and differ.
    pub is_mislabeled: bool,
    /// Class of the resolution advertised in the name.
    pub labeled_class: Option<String>,
    /// Class of the measured frame height.
    pub measured_class: Option<String>,
}

/// Derives [`ClassificationFacts`] using a resolution class table.
#[derive(Debug, Clone)]
pub struct Classifier {
    /// Rules sorted by descending `min_height`.
    rules: Vec<ResolutionClassRule>,
    fallback_class: String,
    low_framerate_threshold: f64,
}

impl Classifier {
    pub fn new(cfg: &ClassifyConfig) -> Self {
        let mut rules = cfg.resolution_classes.clone();
        rules.sort_by(|a, b| b.min_height.cmp(&a.min_height));
        Self {
            rules,
            fallback_class: cfg.fallback_class.clone(),
            low_framerate_threshold: cfg.low_framerate_threshold,
        }
    }

    /// Maps a frame height to its class label.
    ///
    /// The rule with the highest `min_height` not above `height` wins; heights
    /// below every rule get the fallback class.
    pub fn class_for_height(&self, height: u32) -> &str {
        self.rules
            .iter()
            .find(|rule| height >= rule.min_height)
            .map(|rule| rule.label.as_str())
            .unwrap_or(self.fallback_class.as_str())
    }

    /// Framerate at or below which a channel counts as low framerate.
    pub fn low_framerate_threshold(&self) -> f64 {
        self.low_framerate_threshold
    }

    /// Returns true when a reported framerate is at or below the threshold.
    pub fn is_low_framerate(&self, framerate: Option<f64>) -> bool {
        framerate.is_some_and(|fps| fps <= self.low_framerate_threshold)
    }

    /// Classifies one entry. Dead entries only carry their labeled class.
    pub fn classify(&self, entry: &ChannelEntry, outcome: &ProbeOutcome) -> ClassificationFacts {
        let labeled_class = entry
            .labeled_resolution
            .as_ref()
            .map(|label| self.class_for_height(label.height).to_string());

        let info = match outcome {
            ProbeOutcome::Alive(info) => info,
            ProbeOutcome::Dead(_) => {
                return ClassificationFacts {
                    labeled_class,
                    ..ClassificationFacts::default()
                }
            }
        };

        let measured_class = info
            .height
            .map(|h| self.class_for_height(h).to_string());

        let is_mislabeled = match (&labeled_class, &measured_class) {
            (Some(labeled), Some(measured)) => labeled != measured,
            _ => false,
        };

        ClassificationFacts {
            is_low_framerate: self.is_low_framerate(info.framerate),
            is_mislabeled,
            labeled_class,
            measured_class,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassifyConfig::default())
    }
}
