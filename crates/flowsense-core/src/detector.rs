//! Irregularity & Pattern Detector
//!
//! Each condition pattern has its own additive scoring rule over named
//! features. Every term saturates at 1, the weights of a rule sum to 1, and
//! the final score is capped below certainty: a flag is an advisory
//! resemblance to a known signature, never a diagnosis.

use crate::algo::stats;
use crate::config::PatternThresholds;
use crate::features::{FeatureKey, FeatureVector};
use crate::observation::BiometricKind;
use serde::Serialize;
use std::fmt;

/// Highest score any flag can carry
pub const ADVISORY_SCORE_CEILING: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    Irregularity,
    PcosPattern,
    EndometriosisPattern,
    None,
}

impl PatternCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Irregularity => "irregularity",
            Self::PcosPattern => "pcos_pattern",
            Self::EndometriosisPattern => "endometriosis_pattern",
            Self::None => "none",
        }
    }
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Advisory signal; fields are read-only so a flag cannot be upgraded after scoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternFlag {
    category: PatternCategory,
    score: f64,
    threshold: f64,
    threshold_crossed: bool,
}

impl PatternFlag {
    pub(crate) fn evaluate(category: PatternCategory, raw_score: f64, threshold: f64) -> Self {
        let score = if raw_score.is_finite() {
            raw_score.clamp(0.0, ADVISORY_SCORE_CEILING)
        } else {
            0.0
        };
        Self {
            category,
            score,
            threshold,
            threshold_crossed: category != PatternCategory::None && score > threshold,
        }
    }

    fn none() -> Self {
        Self::evaluate(PatternCategory::None, 0.0, 1.0)
    }

    pub fn category(&self) -> PatternCategory {
        self.category
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn threshold_crossed(&self) -> bool {
        self.threshold_crossed
    }
}

fn saturate(value: f64, full_at: f64) -> f64 {
    if !value.is_finite() || full_at <= 0.0 {
        return 0.0;
    }
    (value / full_at).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct PatternDetector {
    thresholds: PatternThresholds,
}

impl PatternDetector {
    pub fn new(thresholds: PatternThresholds) -> Self {
        Self { thresholds }
    }

    /// One flag per condition category, or a single `None` flag without usable history
    pub fn detect(&self, features: &FeatureVector) -> Vec<PatternFlag> {
        if !features.sufficiency {
            return vec![PatternFlag::none()];
        }
        vec![
            PatternFlag::evaluate(
                PatternCategory::Irregularity,
                irregularity_score(features),
                self.thresholds.irregularity,
            ),
            PatternFlag::evaluate(
                PatternCategory::PcosPattern,
                pcos_score(features),
                self.thresholds.pcos,
            ),
            PatternFlag::evaluate(
                PatternCategory::EndometriosisPattern,
                endometriosis_score(features),
                self.thresholds.endometriosis,
            ),
        ]
    }
}

fn irregularity_score(features: &FeatureVector) -> f64 {
    let lengths = features.included_lengths();
    let mean = stats::mean(&lengths);
    let cv = if mean > 0.0 { stats::std_dev(&lengths) / mean } else { 0.0 };

    let completed = features.get_or(FeatureKey::CompletedCycles, 0.0);
    let outlier_fraction = if completed > 0.0 {
        features.get_or(FeatureKey::OutlierCount, 0.0) / completed
    } else {
        0.0
    };

    0.55 * features.get_or(FeatureKey::IrregularityScore, 0.0).clamp(0.0, 1.0)
        + 0.30 * saturate(cv, 0.25)
        + 0.15 * saturate(outlier_fraction, 0.25)
}

fn pcos_score(features: &FeatureVector) -> f64 {
    let long_cycles = features
        .get(FeatureKey::MedianCycleLength)
        .map_or(0.0, |median| saturate(median - 35.0, 15.0));
    let variability = features
        .get(FeatureKey::CycleLengthSpread)
        .map_or(0.0, |sd| saturate(sd - 7.0, 7.0));
    let androgenic = saturate(features.get_or(FeatureKey::AndrogenicLevel, 0.0), 10.0);
    let heart_rate = saturate(
        features.get_or(FeatureKey::BiometricDelta(BiometricKind::RestingHeartRate), 0.0),
        8.0,
    );

    0.35 * long_cycles + 0.30 * variability + 0.20 * androgenic + 0.15 * heart_rate
}

fn endometriosis_score(features: &FeatureVector) -> f64 {
    let pain_trend = saturate(features.get_or(FeatureKey::PainTrend, 0.0), 1.0);
    let pain_level = saturate(features.get_or(FeatureKey::PainLevel, 0.0), 10.0);
    let shortening = saturate(-features.get_or(FeatureKey::CycleLengthSlope, 0.0), 1.0);
    let long_bleeding = features
        .get(FeatureKey::PeriodLengthMean)
        .map_or(0.0, |days| saturate(days - 7.0, 3.0));

    0.40 * pain_trend + 0.25 * pain_level + 0.20 * shortening + 0.15 * long_bleeding
}
