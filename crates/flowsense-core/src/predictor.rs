//! Ensemble Predictor
//!
//! Runs every estimator over the same feature vector and folds the reports
//! into one cycle-length estimate:
//!
//! - weights are the calibration state's inverse-error weights, renormalized
//!   over the estimators that reported
//! - the calibration bias is added to the combined length
//! - interval variance is the weighted disagreement plus the weighted
//!   per-estimator variances, scaled by the calibration inflation factor
//!
//! Event dates (next start, ovulation, fertile window) are derived from that
//! single length on a fixed calendar.

use crate::calibration::UserCalibrationState;
use crate::config::EngineConfig;
use crate::estimator::{Estimate, Estimator, EstimatorId, default_estimators};
use crate::features::{FeatureKey, FeatureVector};
use crate::metrics;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// One-sided 95% normal quantile
const Z_95: f64 = 1.645;

pub const MIN_CONFIDENCE: f64 = 0.05;
pub const MAX_CONFIDENCE: f64 = 0.99;

/// Days before ovulation that open the fertile window
const FERTILE_DAYS_BEFORE: i64 = 5;
/// Days after ovulation that close it
const FERTILE_DAYS_AFTER: i64 = 1;

/// Extra variance (days²) for events derived through the luteal length
const LUTEAL_VARIANCE_DEFAULT: f64 = 4.0;
const LUTEAL_VARIANCE_PERSONAL: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetEvent {
    NextCycleStart,
    FertileWindowStart,
    FertileWindowEnd,
    OvulationEstimate,
}

impl TargetEvent {
    pub const ALL: [TargetEvent; 4] = [
        Self::NextCycleStart,
        Self::FertileWindowStart,
        Self::FertileWindowEnd,
        Self::OvulationEstimate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NextCycleStart => "next_cycle_start",
            Self::FertileWindowStart => "fertile_window_start",
            Self::FertileWindowEnd => "fertile_window_end",
            Self::OvulationEstimate => "ovulation_estimate",
        }
    }

    /// Discount applied to confidence for events further from the observed signal
    fn confidence_factor(&self) -> f64 {
        match self {
            Self::NextCycleStart => 1.0,
            Self::OvulationEstimate => 0.9,
            Self::FertileWindowStart | Self::FertileWindowEnd => 0.85,
        }
    }

    /// Offset in days from the next cycle start, given the luteal length
    fn offset_from_next_start(&self, luteal: i64) -> i64 {
        match self {
            Self::NextCycleStart => 0,
            Self::OvulationEstimate => -luteal,
            Self::FertileWindowStart => -luteal - FERTILE_DAYS_BEFORE,
            Self::FertileWindowEnd => -luteal + FERTILE_DAYS_AFTER,
        }
    }
}

impl fmt::Display for TargetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: NaiveDate,
    pub upper: NaiveDate,
}

impl ConfidenceInterval {
    pub fn around(point: NaiveDate, half_width: i64) -> Self {
        Self {
            lower: point - Duration::days(half_width),
            upper: point + Duration::days(half_width),
        }
    }

    pub fn width_days(&self) -> i64 {
        (self.upper - self.lower).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.lower <= date && date <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub target_event: TargetEvent,
    pub point_estimate: NaiveDate,
    pub confidence_interval: ConfidenceInterval,
    pub confidence_score: f64,
    pub contributing_estimators: BTreeSet<EstimatorId>,
    /// Each reporting estimator's own date for the target
    pub estimator_estimates: BTreeMap<EstimatorId, NaiveDate>,
    pub sufficiency: bool,
    pub as_of: NaiveDate,
}

/// The single cycle-length estimate every event is derived from
#[derive(Debug, Clone)]
struct Combined {
    length: f64,
    variance: f64,
    reports: Vec<(EstimatorId, Estimate)>,
}

pub struct EnsemblePredictor {
    estimators: Vec<Box<dyn Estimator>>,
    fallback_confidence_cap: f64,
    default_half_width: i64,
    population_median: f64,
    luteal_phase_days: f64,
    min_cycle_days: f64,
    max_cycle_days: f64,
}

impl EnsemblePredictor {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_estimators(config, default_estimators(config.recency_half_life_days))
    }

    /// Accepts unvalidated configs: the cycle-length bounds are ordered here
    /// so a bad config cannot panic a request.
    pub fn with_estimators(config: &EngineConfig, estimators: Vec<Box<dyn Estimator>>) -> Self {
        let min_cycle_days = config.min_cycle_days.max(1);
        Self {
            estimators,
            fallback_confidence_cap: config.fallback_confidence_cap,
            default_half_width: config.default_interval_half_width_days as i64,
            population_median: config.population_median_cycle_days as f64,
            luteal_phase_days: config.luteal_phase_days as f64,
            min_cycle_days: min_cycle_days as f64,
            max_cycle_days: config.outlier_bound_days.max(min_cycle_days) as f64,
        }
    }

    pub fn estimator_ids(&self) -> Vec<EstimatorId> {
        self.estimators.iter().map(|e| e.id()).collect()
    }

    pub fn predict(
        &self,
        features: &FeatureVector,
        calibration: &UserCalibrationState,
        target: TargetEvent,
    ) -> Forecast {
        if !features.sufficiency {
            return self.insufficient(features, target);
        }
        let combined = self.combine(features, calibration);
        self.forecast(features, calibration, &combined, target)
    }

    /// Forecasts for every target event, in [`TargetEvent::ALL`] order
    pub fn predict_all(
        &self,
        features: &FeatureVector,
        calibration: &UserCalibrationState,
    ) -> Vec<Forecast> {
        if !features.sufficiency {
            return TargetEvent::ALL
                .iter()
                .map(|t| self.insufficient(features, *t))
                .collect();
        }
        let combined = self.combine(features, calibration);
        TargetEvent::ALL
            .iter()
            .map(|t| self.forecast(features, calibration, &combined, *t))
            .collect()
    }

    fn combine(&self, features: &FeatureVector, calibration: &UserCalibrationState) -> Combined {
        let reports: Vec<(EstimatorId, Estimate)> = self
            .estimators
            .iter()
            .map(|e| (e.id(), e.estimate(features)))
            .filter(|(_, est)| !est.abstained)
            .map(|(id, est)| {
                let point = est.point.clamp(self.min_cycle_days, self.max_cycle_days);
                (id, Estimate { point, ..est })
            })
            .collect();

        if reports.is_empty() {
            // Only reachable with a custom estimator set that abstains on sufficient data
            let length = features
                .get(FeatureKey::CycleLengthMean(12))
                .unwrap_or(self.population_median);
            let variance = features.get_or(FeatureKey::CycleLengthVariance(12), 0.0);
            return Combined {
                length: length + calibration.cycle_length_bias(),
                variance: variance * calibration.variance_inflation(),
                reports,
            };
        }

        let all_weights = calibration.estimator_weights();
        let raw: Vec<f64> = reports.iter().map(|(id, _)| all_weights[id.index()]).collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = if total > 0.0 {
            raw.iter().map(|w| w / total).collect()
        } else {
            vec![1.0 / reports.len() as f64; reports.len()]
        };

        let mean: f64 = reports
            .iter()
            .zip(&weights)
            .map(|((_, e), w)| w * e.point)
            .sum();
        let disagreement: f64 = reports
            .iter()
            .zip(&weights)
            .map(|((_, e), w)| w * (e.point - mean).powi(2))
            .sum();
        let own: f64 = reports
            .iter()
            .zip(&weights)
            .map(|((_, e), w)| w * e.variance)
            .sum();

        debug!(
            reporting = reports.len(),
            mean, disagreement, own, "Combined estimator reports"
        );

        Combined {
            length: (mean + calibration.cycle_length_bias())
                .clamp(self.min_cycle_days, self.max_cycle_days),
            variance: (disagreement + own) * calibration.variance_inflation(),
            reports,
        }
    }

    fn luteal(&self, features: &FeatureVector) -> (f64, f64) {
        match features.get(FeatureKey::LutealLength) {
            Some(l) => (l, LUTEAL_VARIANCE_PERSONAL),
            None => (self.luteal_phase_days, LUTEAL_VARIANCE_DEFAULT),
        }
    }

    /// Date of `target` given a cycle length, rolled to the upcoming cycle when
    /// the current one's fertile window has already closed
    fn event_date(
        &self,
        anchor: NaiveDate,
        length: f64,
        luteal: f64,
        as_of: NaiveDate,
        target: TargetEvent,
    ) -> NaiveDate {
        let cycle_days = length.round() as i64;
        let next_start = (anchor + Duration::days(cycle_days)).max(as_of);
        if target == TargetEvent::NextCycleStart {
            return next_start;
        }
        let luteal = luteal.round() as i64;
        let fertile_end =
            next_start + Duration::days(TargetEvent::FertileWindowEnd.offset_from_next_start(luteal));
        let base = if fertile_end < as_of {
            next_start + Duration::days(cycle_days)
        } else {
            next_start
        };
        base + Duration::days(target.offset_from_next_start(luteal))
    }

    fn forecast(
        &self,
        features: &FeatureVector,
        calibration: &UserCalibrationState,
        combined: &Combined,
        target: TargetEvent,
    ) -> Forecast {
        let as_of = features.as_of;
        let anchor = features.last_cycle_start.unwrap_or(as_of);
        let (luteal, luteal_variance) = self.luteal(features);

        let unclamped = anchor + Duration::days(combined.length.round() as i64);
        let point = self.event_date(anchor, combined.length, luteal, as_of, target);

        let variance = match target {
            TargetEvent::NextCycleStart => combined.variance,
            _ => combined.variance + luteal_variance,
        };
        let half_width = (Z_95 * variance.max(0.0).sqrt()).ceil().max(1.0) as i64;
        let mut interval = ConfidenceInterval::around(point, half_width);
        if target == TargetEvent::NextCycleStart && unclamped < as_of {
            // Overdue: keep the model's own range and stretch it to today
            interval = ConfidenceInterval::around(unclamped, half_width);
            interval.upper = interval.upper.max(point);
        }

        let estimator_estimates = combined
            .reports
            .iter()
            .map(|(id, est)| {
                let length = est.point + calibration.cycle_length_bias();
                (*id, self.event_date(anchor, length, luteal, as_of, target))
            })
            .collect();

        let forecast = Forecast {
            target_event: target,
            point_estimate: point,
            confidence_interval: interval,
            confidence_score: self.confidence(features, calibration, combined.reports.len(), target),
            contributing_estimators: combined.reports.iter().map(|(id, _)| *id).collect(),
            estimator_estimates,
            sufficiency: true,
            as_of,
        };
        metrics::FORECASTS_TOTAL.inc();
        forecast
    }

    /// Non-increasing in historical variance with everything else fixed
    fn confidence(
        &self,
        features: &FeatureVector,
        calibration: &UserCalibrationState,
        reporting: usize,
        target: TargetEvent,
    ) -> f64 {
        let lengths = features.included_lengths();
        let n = lengths.len() as f64;
        let sample_factor = n / (n + 1.0);
        let sd_hist = crate::algo::stats::std_dev(&lengths) * calibration.variance_inflation().sqrt();
        let dispersion_factor = 1.0 / (1.0 + sd_hist / 4.0);

        let mut score = sample_factor * dispersion_factor * target.confidence_factor();
        if reporting < 2 {
            score = score.min(self.fallback_confidence_cap);
        }
        score.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
    }

    /// Wide default forecast around the population median
    fn insufficient(&self, features: &FeatureVector, target: TargetEvent) -> Forecast {
        let as_of = features.as_of;
        let anchor = features.last_cycle_start.unwrap_or(as_of);
        let point = self.event_date(
            anchor,
            self.population_median,
            self.luteal_phase_days,
            as_of,
            target,
        );
        metrics::FORECASTS_TOTAL.inc();
        metrics::INSUFFICIENT_DATA_TOTAL.inc();
        Forecast {
            target_event: target,
            point_estimate: point,
            confidence_interval: ConfidenceInterval::around(point, self.default_half_width),
            confidence_score: MIN_CONFIDENCE,
            contributing_estimators: BTreeSet::new(),
            estimator_estimates: BTreeMap::new(),
            sufficiency: false,
            as_of,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use crate::observation::{Observation, UserId};

    fn origin() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn history(lengths: &[i64]) -> (Vec<Observation>, NaiveDate) {
        let mut offset = 0;
        let mut obs = vec![Observation::cycle_start(origin())];
        for len in lengths {
            offset += len;
            obs.push(Observation::cycle_start(origin() + Duration::days(offset)));
        }
        (obs, origin() + Duration::days(offset))
    }

    fn predict_at(lengths: &[i64], days_after_last: i64, target: TargetEvent) -> Forecast {
        let config = EngineConfig::default();
        let (obs, last) = history(lengths);
        let fv = FeatureExtractor::new(&config).extract(&obs, last + Duration::days(days_after_last));
        let calibration = UserCalibrationState::new(UserId::new());
        EnsemblePredictor::new(&config).predict(&fv, &calibration, target)
    }

    #[test]
    fn test_regular_history_high_confidence() {
        let (_, last) = history(&[28; 12]);
        let forecast = predict_at(&[28; 12], 2, TargetEvent::NextCycleStart);
        assert!(forecast.sufficiency);
        assert_eq!(forecast.point_estimate, last + Duration::days(28));
        assert!(forecast.confidence_score >= 0.9);
        assert_eq!(forecast.contributing_estimators.len(), 3);
        assert_eq!(forecast.confidence_interval.width_days(), 2);
    }

    #[test]
    fn test_single_estimator_caps_confidence() {
        let forecast = predict_at(&[28, 28], 2, TargetEvent::NextCycleStart);
        assert_eq!(
            forecast.contributing_estimators,
            BTreeSet::from([EstimatorId::Statistical])
        );
        assert!(forecast.confidence_score <= 0.5);
    }

    #[test]
    fn test_derived_events_ordering() {
        let (_, last) = history(&[28; 8]);
        let fv_date = |t| predict_at(&[28; 8], 1, t).point_estimate;
        let next = fv_date(TargetEvent::NextCycleStart);
        let ovulation = fv_date(TargetEvent::OvulationEstimate);
        let fertile_start = fv_date(TargetEvent::FertileWindowStart);
        let fertile_end = fv_date(TargetEvent::FertileWindowEnd);

        assert_eq!(next, last + Duration::days(28));
        assert_eq!(ovulation, next - Duration::days(14));
        assert_eq!(fertile_start, ovulation - Duration::days(5));
        assert_eq!(fertile_end, ovulation + Duration::days(1));
    }

    #[test]
    fn test_fertile_window_rolls_forward_when_past() {
        let (_, last) = history(&[28; 8]);
        let forecast = predict_at(&[28; 8], 20, TargetEvent::OvulationEstimate);
        assert_eq!(forecast.point_estimate, last + Duration::days(28 + 14));
    }

    #[test]
    fn test_overdue_period_reported_as_today() {
        let (_, last) = history(&[28; 8]);
        let as_of = last + Duration::days(35);
        let forecast = predict_at(&[28; 8], 35, TargetEvent::NextCycleStart);
        assert_eq!(forecast.point_estimate, as_of);
        assert!(forecast.confidence_interval.contains(as_of));
    }

    #[test]
    fn test_insufficient_data_default_interval() {
        let config = EngineConfig::default();
        let fv = FeatureExtractor::new(&config).extract(&[], origin());
        let calibration = UserCalibrationState::new(UserId::new());
        let forecasts = EnsemblePredictor::new(&config).predict_all(&fv, &calibration);

        assert_eq!(forecasts.len(), TargetEvent::ALL.len());
        let next = &forecasts[0];
        assert!(!next.sufficiency);
        assert_eq!(next.confidence_score, MIN_CONFIDENCE);
        assert_eq!(next.point_estimate, origin() + Duration::days(28));
        assert_eq!(next.confidence_interval.width_days(), 14);
        assert!(next.contributing_estimators.is_empty());
    }

    #[test]
    fn test_inverted_cycle_bounds_do_not_panic() {
        let (obs, last) = history(&[28; 8]);
        let fv = FeatureExtractor::new(&EngineConfig::default()).extract(&obs, last + Duration::days(1));
        let inverted = EngineConfig {
            min_cycle_days: 40,
            outlier_bound_days: 30,
            ..EngineConfig::default()
        };
        assert!(inverted.validate().is_err());

        let calibration = UserCalibrationState::new(UserId::new());
        let forecast =
            EnsemblePredictor::new(&inverted).predict(&fv, &calibration, TargetEvent::NextCycleStart);
        assert_eq!(forecast.point_estimate, last + Duration::days(40));
        assert!(forecast.confidence_interval.contains(forecast.point_estimate));
    }

    #[test]
    fn test_bias_shifts_point() {
        let config = EngineConfig::default();
        let (obs, last) = history(&[28; 8]);
        let fv = FeatureExtractor::new(&config).extract(&obs, last + Duration::days(1));
        let mut calibration = UserCalibrationState::new(UserId::new());
        calibration.record_bias(3.0, 1.0);

        let forecast =
            EnsemblePredictor::new(&config).predict(&fv, &calibration, TargetEvent::NextCycleStart);
        assert_eq!(forecast.point_estimate, last + Duration::days(31));
    }

    #[test]
    fn test_interval_always_contains_point() {
        let lengths = [24, 35, 27, 31, 22, 38, 29, 26, 33];
        for target in TargetEvent::ALL {
            for days_after in [0, 5, 15, 25, 45] {
                let f = predict_at(&lengths, days_after, target);
                assert!(f.confidence_interval.contains(f.point_estimate), "{target} {days_after}");
                assert!((MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&f.confidence_score));
            }
        }
    }
}
