//! Feature Extractor
//!
//! Turns a user's reconstructed cycle history into a fixed-schema numeric
//! feature vector plus fixed-shape per-cycle and per-day rows. A feature that
//! cannot be computed from the available history is simply absent from the
//! vector; `sufficiency` tells callers whether downstream output can be
//! trusted at all.
//!
//! Every baseline is the user's own history. No population statistics enter
//! the vector.

use crate::algo::{decay_weight, stats};
use crate::config::EngineConfig;
use crate::cycle::CycleHistory;
use crate::observation::{BiometricKind, Observation, SymptomKind};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;

/// Version of the feature layout; persisted calibration state records it
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Trailing windows (in cycles) for cycle-length mean and variance
pub const LENGTH_WINDOWS: [usize; 3] = [3, 6, 12];

/// Width of [`CycleFeatures::row`]
pub const CYCLE_ROW_WIDTH: usize = 6;

/// Previous cycles that form the rolling biometric baseline
const BASELINE_CYCLES: usize = 6;

/// Minimum completed cycles before the robust outlier rule applies
const ROBUST_OUTLIER_MIN_CYCLES: usize = 5;

/// Basal temperature rise (°C) that confirms an ovulatory shift
const TEMPERATURE_SHIFT_C: f64 = 0.2;

/// Minimum basal temperature readings in a cycle before a shift is searched for
const MIN_TEMPERATURE_READINGS: usize = 10;

/// Plausible luteal phase lengths
const LUTEAL_RANGE: std::ops::RangeInclusive<f64> = 9.0..=17.0;

/// Named entries of the feature vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureKey {
    /// Mean of the last `n` included cycle lengths
    CycleLengthMean(usize),
    /// Variance of the last `n` included cycle lengths
    CycleLengthVariance(usize),
    LastCycleLength,
    /// Days per cycle, least squares over the last 12 included cycles
    CycleLengthSlope,
    /// Median of every completed cycle, outliers included
    MedianCycleLength,
    /// Standard deviation of every completed cycle, outliers included
    CycleLengthSpread,
    CompletedCycles,
    IncludedCycles,
    OutlierCount,
    /// Lag-1 autocorrelation of detrended included lengths
    ResidualAutocorrelation,
    IrregularityScore,
    PeriodLengthMean,
    DaysSinceLastStart,
    /// Personal luteal length estimated from basal temperature shifts
    LutealLength,
    /// Slope of per-cycle mean severity
    SymptomTrend(SymptomKind),
    SymptomMean(SymptomKind),
    /// Slope of per-cycle mean pain severity (cramps, pelvic pain)
    PainTrend,
    PainLevel,
    /// Mean severity of acne and excess hair growth
    AndrogenicLevel,
    /// Current cycle mean minus the rolling baseline of previous cycles
    BiometricDelta(BiometricKind),
}

impl FeatureKey {
    pub fn name(&self) -> String {
        match self {
            Self::CycleLengthMean(w) => format!("cycle_length_mean_{w}"),
            Self::CycleLengthVariance(w) => format!("cycle_length_variance_{w}"),
            Self::LastCycleLength => "last_cycle_length".to_string(),
            Self::CycleLengthSlope => "cycle_length_slope".to_string(),
            Self::MedianCycleLength => "median_cycle_length".to_string(),
            Self::CycleLengthSpread => "cycle_length_spread".to_string(),
            Self::CompletedCycles => "completed_cycles".to_string(),
            Self::IncludedCycles => "included_cycles".to_string(),
            Self::OutlierCount => "outlier_count".to_string(),
            Self::ResidualAutocorrelation => "residual_autocorrelation".to_string(),
            Self::IrregularityScore => "irregularity_score".to_string(),
            Self::PeriodLengthMean => "period_length_mean".to_string(),
            Self::DaysSinceLastStart => "days_since_last_start".to_string(),
            Self::LutealLength => "luteal_length".to_string(),
            Self::SymptomTrend(kind) => format!("symptom_trend_{}", kind.name()),
            Self::SymptomMean(kind) => format!("symptom_mean_{}", kind.name()),
            Self::PainTrend => "pain_trend".to_string(),
            Self::PainLevel => "pain_level".to_string(),
            Self::AndrogenicLevel => "androgenic_level".to_string(),
            Self::BiometricDelta(kind) => format!("biometric_delta_{}", kind.name()),
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Fixed-shape summary of one completed cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleFeatures {
    pub start: NaiveDate,
    pub length_days: u32,
    /// Excluded from mean/variance, kept for irregularity scoring
    pub outlier: bool,
    pub period_days: Option<u32>,
    /// Mean severity of every symptom logged in the cycle (0 when none)
    pub symptom_load: f64,
    /// Mean severity of pain symptoms (0 when none)
    pub pain: f64,
    pub temperature_delta: f64,
    pub heart_rate_delta: f64,
    pub sleep_delta: f64,
}

impl CycleFeatures {
    /// Model input row; column 0 is the cycle's own length
    pub fn row(&self) -> [f64; CYCLE_ROW_WIDTH] {
        [
            self.length_days as f64,
            self.symptom_load,
            self.pain,
            self.temperature_delta,
            self.heart_rate_delta,
            self.sleep_delta,
        ]
    }
}

/// One day of the current (open) cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayFeatures {
    pub date: NaiveDate,
    pub cycle_day: u32,
    pub basal_temperature: Option<f64>,
    pub temperature_delta: Option<f64>,
    pub heart_rate_delta: Option<f64>,
    pub sleep_delta: Option<f64>,
    pub symptom_load: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub schema_version: u32,
    pub as_of: NaiveDate,
    /// False when no completed cycle survives outlier exclusion
    pub sufficiency: bool,
    /// Exactly one usable cycle
    pub low_confidence: bool,
    pub last_cycle_start: Option<NaiveDate>,
    values: BTreeMap<FeatureKey, f64>,
    /// Completed cycles, oldest first
    pub cycles: Vec<CycleFeatures>,
    /// Days of the open cycle up to `as_of`
    pub days: Vec<DayFeatures>,
}

impl FeatureVector {
    fn empty(as_of: NaiveDate) -> Self {
        Self {
            schema_version: FEATURE_SCHEMA_VERSION,
            as_of,
            sufficiency: false,
            low_confidence: false,
            last_cycle_start: None,
            values: BTreeMap::new(),
            cycles: Vec::new(),
            days: Vec::new(),
        }
    }

    /// `None` marks the feature as insufficient
    pub fn get(&self, key: FeatureKey) -> Option<f64> {
        self.values.get(&key).copied()
    }

    pub fn get_or(&self, key: FeatureKey, default: f64) -> f64 {
        self.get(key).unwrap_or(default)
    }

    pub fn values(&self) -> impl Iterator<Item = (FeatureKey, f64)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    /// Lengths that survived outlier exclusion, oldest first
    pub fn included_lengths(&self) -> Vec<f64> {
        self.cycles
            .iter()
            .filter(|c| !c.outlier)
            .map(|c| c.length_days as f64)
            .collect()
    }

    /// Included cycles, oldest first
    pub fn included_cycles(&self) -> impl Iterator<Item = &CycleFeatures> {
        self.cycles.iter().filter(|c| !c.outlier)
    }

    fn set(&mut self, key: FeatureKey, value: f64) {
        if value.is_finite() {
            self.values.insert(key, value);
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    outlier_bound_days: u32,
    robust_outlier_z: f64,
    half_life_days: f64,
    min_cycle_days: u32,
}

impl FeatureExtractor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            outlier_bound_days: config.outlier_bound_days,
            robust_outlier_z: config.robust_outlier_z,
            half_life_days: config.recency_half_life_days,
            min_cycle_days: config.min_cycle_days,
        }
    }

    /// Reconstruct the cycle history visible on `as_of`
    pub fn history(&self, observations: &[Observation], as_of: NaiveDate) -> CycleHistory {
        let visible: Vec<Observation> = observations
            .iter()
            .filter(|o| o.date <= as_of)
            .cloned()
            .collect();
        CycleHistory::reconstruct(&visible, self.min_cycle_days)
    }

    pub fn extract(&self, observations: &[Observation], as_of: NaiveDate) -> FeatureVector {
        let history = self.history(observations, as_of);
        self.extract_with_history(&history, as_of)
    }

    pub fn extract_with_history(&self, history: &CycleHistory, as_of: NaiveDate) -> FeatureVector {
        let mut fv = FeatureVector::empty(as_of);
        fv.last_cycle_start = history.last_start();

        if let Some(start) = fv.last_cycle_start {
            fv.set(FeatureKey::DaysSinceLastStart, (as_of - start).num_days() as f64);
        }

        let completed: Vec<_> = history.completed().collect();
        let lengths: Vec<f64> = completed
            .iter()
            .filter_map(|c| c.length_days)
            .map(f64::from)
            .collect();
        let outliers = self.outlier_mask(&lengths);

        // Per-cycle biometric means feed both the rows and the rolling baselines
        let biometric_means: Vec<[Option<f64>; 3]> = history
            .cycles
            .iter()
            .map(|c| BiometricKind::ALL.map(|k| mean_of(c.biometric_values(k))))
            .collect();

        fv.cycles = completed
            .iter()
            .zip(&outliers)
            .enumerate()
            .map(|(i, (cycle, &outlier))| {
                let [temperature_delta, heart_rate_delta, sleep_delta] =
                    BiometricKind::ALL.map(|k| biometric_delta(&biometric_means, i, k).unwrap_or(0.0));
                CycleFeatures {
                    start: cycle.start_date,
                    length_days: cycle.length_days.unwrap_or_default(),
                    outlier,
                    period_days: cycle.period_days(),
                    symptom_load: mean_of(cycle.symptoms.iter().map(|s| s.severity as f64))
                        .unwrap_or(0.0),
                    pain: mean_of(
                        cycle
                            .symptoms
                            .iter()
                            .filter(|s| s.kind.is_pain())
                            .map(|s| s.severity as f64),
                    )
                    .unwrap_or(0.0),
                    temperature_delta,
                    heart_rate_delta,
                    sleep_delta,
                }
            })
            .collect();

        fv.set(FeatureKey::CompletedCycles, lengths.len() as f64);
        let outlier_count = outliers.iter().filter(|o| **o).count();
        fv.set(FeatureKey::OutlierCount, outlier_count as f64);

        let included = fv.included_lengths();
        fv.set(FeatureKey::IncludedCycles, included.len() as f64);
        fv.sufficiency = !included.is_empty();
        fv.low_confidence = included.len() == 1;

        if fv.sufficiency {
            for window in LENGTH_WINDOWS {
                let tail = &included[included.len().saturating_sub(window)..];
                fv.set(FeatureKey::CycleLengthMean(window), stats::mean(tail));
                fv.set(FeatureKey::CycleLengthVariance(window), stats::variance(tail));
            }
            let recent = &included[included.len().saturating_sub(12)..];
            fv.set(FeatureKey::CycleLengthSlope, stats::slope(recent));
            if recent.len() >= 3 {
                fv.set(
                    FeatureKey::ResidualAutocorrelation,
                    stats::lag1_autocorrelation(&stats::detrend(recent)),
                );
            }
        }

        if let Some(&last) = lengths.last() {
            fv.set(FeatureKey::LastCycleLength, last);
            fv.set(FeatureKey::MedianCycleLength, stats::median(&lengths));
            fv.set(FeatureKey::CycleLengthSpread, stats::std_dev(&lengths));
            fv.set(FeatureKey::IrregularityScore, self.irregularity(&fv.cycles, as_of));
        }

        let periods: Vec<f64> = history
            .cycles
            .iter()
            .filter_map(|c| c.period_days())
            .map(f64::from)
            .collect();
        if !periods.is_empty() {
            fv.set(FeatureKey::PeriodLengthMean, stats::mean(&periods));
        }

        if let Some(luteal) = luteal_length(history) {
            fv.set(FeatureKey::LutealLength, luteal);
        }

        self.symptom_features(&mut fv, history);

        // Current cycle against the cycles before it
        if let Some(last_idx) = history.cycles.len().checked_sub(1) {
            for kind in BiometricKind::ALL {
                if let Some(delta) = biometric_delta(&biometric_means, last_idx, kind) {
                    fv.set(FeatureKey::BiometricDelta(kind), delta);
                }
            }
        }

        if let Some(current) = history.current() {
            let idx = history.cycles.len() - 1;
            let baselines = BiometricKind::ALL.map(|k| baseline(&biometric_means, idx, k));
            let last_day = as_of.min(
                current.start_date + chrono::Duration::days(self.outlier_bound_days as i64),
            );
            fv.days = current
                .start_date
                .iter_days()
                .take_while(|d| *d <= last_day)
                .map(|date| {
                    let reading = |kind: BiometricKind| {
                        mean_of(
                            current
                                .biometrics
                                .iter()
                                .filter(|b| b.kind == kind && b.date == date)
                                .map(|b| b.value),
                        )
                    };
                    let delta = |kind: BiometricKind, base: Option<f64>| {
                        reading(kind).zip(base).map(|(v, b)| v - b)
                    };
                    DayFeatures {
                        date,
                        cycle_day: (date - current.start_date).num_days() as u32 + 1,
                        basal_temperature: reading(BiometricKind::BasalTemperature),
                        temperature_delta: delta(BiometricKind::BasalTemperature, baselines[0]),
                        heart_rate_delta: delta(BiometricKind::RestingHeartRate, baselines[1]),
                        sleep_delta: delta(BiometricKind::SleepHours, baselines[2]),
                        symptom_load: mean_of(
                            current
                                .symptoms
                                .iter()
                                .filter(|s| s.date == date)
                                .map(|s| s.severity as f64),
                        )
                        .unwrap_or(0.0),
                    }
                })
                .collect();
        }

        fv
    }

    /// Marks completed cycles excluded from mean/variance
    fn outlier_mask(&self, lengths: &[f64]) -> Vec<bool> {
        let bound = self.outlier_bound_days as f64;
        let robust = lengths.len() >= ROBUST_OUTLIER_MIN_CYCLES;
        let median = stats::median(lengths);
        let scale = stats::MAD_TO_SIGMA * stats::mad(lengths).max(1.0);

        lengths
            .iter()
            .map(|&len| len > bound || (robust && (len - median).abs() / scale > self.robust_outlier_z))
            .collect()
    }

    /// Recency-weighted mean deviation from the median, outliers included
    fn irregularity(&self, cycles: &[CycleFeatures], as_of: NaiveDate) -> f64 {
        let lengths: Vec<f64> = cycles.iter().map(|c| c.length_days as f64).collect();
        let median = stats::median(&lengths);
        if median <= 0.0 {
            return 0.0;
        }
        let (deviations, weights): (Vec<f64>, Vec<f64>) = cycles
            .iter()
            .map(|c| {
                let deviation = ((c.length_days as f64 - median).abs() / (0.25 * median)).min(1.0);
                let age = (as_of - c.start).num_days() as f64;
                (deviation, decay_weight(age, self.half_life_days))
            })
            .unzip();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return stats::mean(&deviations);
        }
        deviations.iter().zip(&weights).map(|(d, w)| d * w).sum::<f64>() / total
    }

    fn symptom_features(&self, fv: &mut FeatureVector, history: &CycleHistory) {
        for kind in SymptomKind::ALL {
            let per_cycle: Vec<f64> = history
                .cycles
                .iter()
                .filter_map(|c| mean_of(c.symptom_severities(kind)))
                .collect();
            if per_cycle.is_empty() {
                continue;
            }
            let all: Vec<f64> = history
                .cycles
                .iter()
                .flat_map(|c| c.symptom_severities(kind))
                .collect();
            fv.set(FeatureKey::SymptomMean(kind), stats::mean(&all));
            if per_cycle.len() >= 2 {
                fv.set(FeatureKey::SymptomTrend(kind), stats::slope(&per_cycle));
            }
        }

        let pain_per_cycle: Vec<f64> = history
            .cycles
            .iter()
            .filter_map(|c| {
                mean_of(
                    c.symptoms
                        .iter()
                        .filter(|s| s.kind.is_pain())
                        .map(|s| s.severity as f64),
                )
            })
            .collect();
        if !pain_per_cycle.is_empty() {
            fv.set(FeatureKey::PainLevel, stats::mean(&pain_per_cycle));
        }
        if pain_per_cycle.len() >= 2 {
            fv.set(FeatureKey::PainTrend, stats::slope(&pain_per_cycle));
        }

        let androgenic: Vec<f64> = history
            .cycles
            .iter()
            .flat_map(|c| c.symptoms.iter())
            .filter(|s| s.kind.is_androgenic())
            .map(|s| s.severity as f64)
            .collect();
        if !androgenic.is_empty() {
            fv.set(FeatureKey::AndrogenicLevel, stats::mean(&androgenic));
        }
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn kind_index(kind: BiometricKind) -> usize {
    match kind {
        BiometricKind::BasalTemperature => 0,
        BiometricKind::RestingHeartRate => 1,
        BiometricKind::SleepHours => 2,
    }
}

/// Mean of up to [`BASELINE_CYCLES`] per-cycle means preceding cycle `idx`
fn baseline(means: &[[Option<f64>; 3]], idx: usize, kind: BiometricKind) -> Option<f64> {
    let k = kind_index(kind);
    let previous: Vec<f64> = means[..idx]
        .iter()
        .rev()
        .filter_map(|m| m[k])
        .take(BASELINE_CYCLES)
        .collect();
    (!previous.is_empty()).then(|| stats::mean(&previous))
}

fn biometric_delta(means: &[[Option<f64>; 3]], idx: usize, kind: BiometricKind) -> Option<f64> {
    let own = means.get(idx)?[kind_index(kind)]?;
    baseline(means, idx, kind).map(|b| own - b)
}

/// First cycle day of a sustained basal temperature rise.
///
/// Three consecutive readings above the highest of the six before them, the
/// third at least [`TEMPERATURE_SHIFT_C`] above it. `readings` must be ordered
/// by cycle day.
pub fn temperature_shift(readings: &[(u32, f64)]) -> Option<u32> {
    if readings.len() < 9 {
        return None;
    }
    (6..=readings.len() - 3).find_map(|i| {
        let cover = readings[i - 6..i]
            .iter()
            .map(|r| r.1)
            .fold(f64::NEG_INFINITY, f64::max);
        let run = &readings[i..i + 3];
        let sustained = run.iter().all(|r| r.1 > cover) && run[2].1 >= cover + TEMPERATURE_SHIFT_C;
        sustained.then_some(readings[i].0)
    })
}

/// Median luteal length over completed cycles with a detectable shift
fn luteal_length(history: &CycleHistory) -> Option<f64> {
    let estimates: Vec<f64> = history
        .completed()
        .filter_map(|cycle| {
            let length = cycle.length_days? as f64;
            let mut readings: Vec<(u32, f64)> = cycle
                .biometrics
                .iter()
                .filter(|b| b.kind == BiometricKind::BasalTemperature)
                .filter_map(|b| cycle.cycle_day(b.date).map(|d| (d, b.value)))
                .collect();
            if readings.len() < MIN_TEMPERATURE_READINGS {
                return None;
            }
            readings.sort_by_key(|r| r.0);
            let rise_day = temperature_shift(&readings)?;
            // Ovulation is taken as the day before the first elevated reading
            let luteal = length - (rise_day as f64 - 1.0);
            LUTEAL_RANGE.contains(&luteal).then_some(luteal)
        })
        .collect();

    (!estimates.is_empty()).then(|| stats::median(&estimates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    fn starts(lengths: &[i64]) -> Vec<Observation> {
        let mut offset = 0;
        let mut obs = vec![Observation::cycle_start(day(0))];
        for len in lengths {
            offset += len;
            obs.push(Observation::cycle_start(day(offset)));
        }
        obs
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(&EngineConfig::default())
    }

    #[test]
    fn test_zero_history_is_insufficient() {
        let fv = extractor().extract(&[], day(0));
        assert!(!fv.sufficiency);
        assert_eq!(fv.get(FeatureKey::CycleLengthMean(3)), None);
        assert_eq!(fv.schema_version, FEATURE_SCHEMA_VERSION);
    }

    #[test]
    fn test_single_cycle_is_low_confidence() {
        let fv = extractor().extract(&starts(&[30]), day(35));
        assert!(fv.sufficiency);
        assert!(fv.low_confidence);
        assert_eq!(fv.get(FeatureKey::CycleLengthMean(6)), Some(30.0));
        assert_eq!(fv.get(FeatureKey::CycleLengthVariance(6)), Some(0.0));
        assert_eq!(fv.get(FeatureKey::DaysSinceLastStart), Some(5.0));
    }

    #[test]
    fn test_long_cycle_excluded_from_mean_but_scored() {
        let fv = extractor().extract(&starts(&[28, 28, 120, 28]), day(210));
        assert_eq!(fv.get(FeatureKey::OutlierCount), Some(1.0));
        assert_eq!(fv.get(FeatureKey::CycleLengthMean(12)), Some(28.0));
        assert_eq!(fv.get(FeatureKey::CycleLengthVariance(12)), Some(0.0));
        assert!(fv.get(FeatureKey::IrregularityScore).unwrap() > 0.0);
    }

    #[test]
    fn test_robust_outlier_rule_needs_enough_cycles() {
        let few = extractor().extract(&starts(&[28, 28, 35]), day(100));
        assert_eq!(few.get(FeatureKey::OutlierCount), Some(0.0));

        let many = extractor().extract(&starts(&[28, 28, 28, 28, 35, 28]), day(190));
        assert_eq!(many.get(FeatureKey::OutlierCount), Some(1.0));
        assert_eq!(many.get(FeatureKey::CycleLengthMean(12)), Some(28.0));
    }

    #[test]
    fn test_trailing_windows() {
        let fv = extractor().extract(&starts(&[26, 26, 26, 30, 30, 30]), day(200));
        assert_eq!(fv.get(FeatureKey::CycleLengthMean(3)), Some(30.0));
        assert_eq!(fv.get(FeatureKey::CycleLengthMean(6)), Some(28.0));
        assert!(fv.get(FeatureKey::CycleLengthSlope).unwrap() > 0.0);
    }

    #[test]
    fn test_regular_history_has_zero_irregularity() {
        let fv = extractor().extract(&starts(&[28; 6]), day(170));
        assert_eq!(fv.get(FeatureKey::IrregularityScore), Some(0.0));
    }

    #[test]
    fn test_raised_outlier_bound_keeps_long_cycle() {
        let obs = starts(&[28, 28, 100, 28]);
        let default = extractor().extract(&obs, day(190));
        assert_eq!(default.get(FeatureKey::CycleLengthMean(12)), Some(28.0));

        let lenient = FeatureExtractor::new(&EngineConfig {
            outlier_bound_days: 120,
            ..EngineConfig::default()
        })
        .extract(&obs, day(190));
        assert_eq!(lenient.get(FeatureKey::OutlierCount), Some(0.0));
        assert_eq!(lenient.get(FeatureKey::CycleLengthMean(12)), Some(46.0));
    }

    #[test]
    fn test_shorter_half_life_fades_old_irregularity() {
        let obs = starts(&[40, 28, 28, 28, 28, 28]);
        let as_of = day(185);
        let slow = extractor()
            .extract(&obs, as_of)
            .get(FeatureKey::IrregularityScore)
            .unwrap();
        let fast = FeatureExtractor::new(&EngineConfig {
            recency_half_life_days: 10.0,
            ..EngineConfig::default()
        })
        .extract(&obs, as_of)
        .get(FeatureKey::IrregularityScore)
        .unwrap();

        assert!(slow > 0.0);
        assert!(fast < slow);
    }

    #[test]
    fn test_future_observations_are_ignored() {
        let fv = extractor().extract(&starts(&[28, 28, 28]), day(60));
        assert_eq!(fv.get(FeatureKey::CompletedCycles), Some(2.0));
        assert_eq!(fv.last_cycle_start, Some(day(56)));
    }

    #[test]
    fn test_symptom_trend_and_pain() {
        let mut obs = starts(&[28, 28, 28]);
        for (cycle, severity) in [(0, 2), (1, 4), (2, 6), (3, 8)] {
            obs.push(Observation::symptom(day(cycle * 28 + 1), SymptomKind::Cramps, severity));
        }
        let fv = extractor().extract(&obs, day(90));
        assert!((fv.get(FeatureKey::SymptomTrend(SymptomKind::Cramps)).unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(fv.get(FeatureKey::SymptomMean(SymptomKind::Cramps)), Some(5.0));
        assert!((fv.get(FeatureKey::PainTrend).unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(fv.get(FeatureKey::SymptomTrend(SymptomKind::Acne)), None);
        assert_eq!(fv.cycles[2].pain, 6.0);
    }

    #[test]
    fn test_biometric_delta_uses_own_baseline() {
        let mut obs = starts(&[28, 28]);
        obs.push(Observation::biometric(day(3), BiometricKind::RestingHeartRate, 60.0));
        obs.push(Observation::biometric(day(31), BiometricKind::RestingHeartRate, 62.0));
        obs.push(Observation::biometric(day(59), BiometricKind::RestingHeartRate, 67.0));
        let fv = extractor().extract(&obs, day(60));

        assert_eq!(fv.get(FeatureKey::BiometricDelta(BiometricKind::RestingHeartRate)), Some(6.0));
        assert_eq!(fv.cycles[1].heart_rate_delta, 2.0);
        assert_eq!(fv.days.len(), 5);
        assert_eq!(fv.days[3].heart_rate_delta, Some(6.0));
        assert_eq!(fv.days[0].heart_rate_delta, None);
    }

    #[test]
    fn test_temperature_shift_detection() {
        let mut readings: Vec<(u32, f64)> = (1..=14).map(|d| (d, 36.4)).collect();
        readings.extend((15..=28).map(|d| (d, 36.8)));
        assert_eq!(temperature_shift(&readings), Some(15));

        let flat: Vec<(u32, f64)> = (1..=28).map(|d| (d, 36.5)).collect();
        assert_eq!(temperature_shift(&flat), None);
    }

    #[test]
    fn test_luteal_length_from_temperature() {
        let mut obs = starts(&[30, 30]);
        for cycle in 0..2 {
            for d in 0..30 {
                let temp = if d >= 17 { 36.8 } else { 36.4 };
                obs.push(Observation::biometric(
                    day(cycle * 30 + d),
                    BiometricKind::BasalTemperature,
                    temp,
                ));
            }
        }
        let fv = extractor().extract(&obs, day(61));
        // Rise on cycle day 18, ovulation on day 17, 13 luteal days
        assert_eq!(fv.get(FeatureKey::LutealLength), Some(13.0));
    }
}
