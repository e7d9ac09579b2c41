//! Cycle-length estimators
//!
//! Each estimator predicts the length of the next cycle from the same
//! [`FeatureVector`] and reports its own uncertainty, or abstains when its
//! window is too short. The ensemble never needs to know which concrete
//! estimator it is talking to.

use crate::algo::{ForestParams, HoltWinters, RegressionForest, decay_weight, stats};
use crate::features::{CYCLE_ROW_WIDTH, FeatureVector};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NUM_ESTIMATORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorId {
    Statistical,
    TreeEnsemble,
    Sequence,
}

impl EstimatorId {
    pub const ALL: [EstimatorId; NUM_ESTIMATORS] =
        [Self::Statistical, Self::TreeEnsemble, Self::Sequence];

    pub fn index(&self) -> usize {
        match self {
            Self::Statistical => 0,
            Self::TreeEnsemble => 1,
            Self::Sequence => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Statistical => "statistical",
            Self::TreeEnsemble => "tree_ensemble",
            Self::Sequence => "sequence",
        }
    }
}

impl fmt::Display for EstimatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One estimator's answer: a cycle length in days with its variance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub point: f64,
    pub variance: f64,
    pub abstained: bool,
}

impl Estimate {
    pub fn report(point: f64, variance: f64) -> Self {
        if !point.is_finite() {
            return Self::abstain();
        }
        Self {
            point,
            variance: if variance.is_finite() { variance.max(0.0) } else { 0.0 },
            abstained: false,
        }
    }

    pub fn abstain() -> Self {
        Self {
            point: 0.0,
            variance: 0.0,
            abstained: true,
        }
    }
}

pub trait Estimator: Send + Sync {
    fn id(&self) -> EstimatorId;

    /// Predict the next cycle length. Must be a pure function of `features`.
    fn estimate(&self, features: &FeatureVector) -> Estimate;
}

/// Recency-weighted moving average with a Holt-Winters seasonal adjustment
#[derive(Debug, Clone)]
pub struct StatisticalEstimator {
    half_life_days: f64,
}

impl StatisticalEstimator {
    /// Cycles in one seasonal period
    pub const SEASON: usize = 3;
    /// Included cycles before the seasonal term is trusted
    pub const MIN_SEASONAL_CYCLES: usize = 6;

    pub fn new(half_life_days: f64) -> Self {
        Self { half_life_days }
    }
}

impl Estimator for StatisticalEstimator {
    fn id(&self) -> EstimatorId {
        EstimatorId::Statistical
    }

    fn estimate(&self, features: &FeatureVector) -> Estimate {
        let (lengths, weights): (Vec<f64>, Vec<f64>) = features
            .included_cycles()
            .map(|c| {
                let age = (features.as_of - c.start).num_days() as f64;
                (c.length_days as f64, decay_weight(age, self.half_life_days))
            })
            .unzip();
        if lengths.is_empty() {
            return Estimate::abstain();
        }

        let (wma, wvar) = stats::weighted_mean_variance(&lengths, &weights);
        let n_eff = stats::effective_sample_size(&weights).max(1.0);

        let seasonal = if lengths.len() >= Self::MIN_SEASONAL_CYCLES {
            HoltWinters::fit(0.3, 0.1, 0.3, Self::SEASON, &lengths).next_seasonal()
        } else {
            0.0
        };

        Estimate::report(wma + 0.5 * seasonal, wvar * (1.0 + 1.0 / n_eff))
    }
}

/// Bagged regression trees over per-cycle rows
#[derive(Debug, Clone)]
pub struct TreeEnsembleEstimator {
    params: ForestParams,
}

impl TreeEnsembleEstimator {
    pub const MIN_TRAINING_ROWS: usize = 6;

    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }

    /// (row of cycle i, length of cycle i + 1) for consecutive included cycles
    fn training_set(features: &FeatureVector) -> (Vec<Vec<f64>>, Vec<f64>) {
        features
            .cycles
            .windows(2)
            .filter(|pair| !pair[0].outlier && !pair[1].outlier)
            .map(|pair| (pair[0].row().to_vec(), pair[1].length_days as f64))
            .unzip()
    }
}

impl Default for TreeEnsembleEstimator {
    fn default() -> Self {
        Self::new(ForestParams::default())
    }
}

/// Digest of the training data; seeds the forest so identical history grows identical trees
fn training_seed(rows: &[Vec<f64>], targets: &[f64]) -> u64 {
    let mut bytes = Vec::with_capacity((rows.len() * CYCLE_ROW_WIDTH + targets.len()) * 8);
    for value in rows.iter().flatten().chain(targets) {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    xxhash_rust::xxh3::xxh3_64(&bytes)
}

impl Estimator for TreeEnsembleEstimator {
    fn id(&self) -> EstimatorId {
        EstimatorId::TreeEnsemble
    }

    fn estimate(&self, features: &FeatureVector) -> Estimate {
        let (rows, targets) = Self::training_set(features);
        if rows.len() < Self::MIN_TRAINING_ROWS {
            return Estimate::abstain();
        }
        let Some(latest) = features.included_cycles().last() else {
            return Estimate::abstain();
        };

        let seed = training_seed(&rows, &targets);
        match RegressionForest::fit(&rows, &targets, self.params, seed) {
            Some(forest) => {
                let (point, variance) = forest.predict(&latest.row());
                Estimate::report(point, variance)
            }
            None => Estimate::abstain(),
        }
    }
}

/// Linear trend plus AR(1) on the detrended residuals of the last K cycles
#[derive(Debug, Clone)]
pub struct SequenceEstimator {
    window: usize,
}

impl SequenceEstimator {
    pub const DEFAULT_WINDOW: usize = 6;
    pub const MIN_CYCLES: usize = 4;
    const MAX_PHI: f64 = 0.9;

    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(Self::MIN_CYCLES),
        }
    }
}

impl Default for SequenceEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

impl Estimator for SequenceEstimator {
    fn id(&self) -> EstimatorId {
        EstimatorId::Sequence
    }

    fn estimate(&self, features: &FeatureVector) -> Estimate {
        let lengths = features.included_lengths();
        if lengths.len() < Self::MIN_CYCLES {
            return Estimate::abstain();
        }
        let recent = &lengths[lengths.len() - self.window.min(lengths.len())..];

        let (intercept, slope) = stats::linear_fit(recent);
        let residuals = stats::detrend(recent);
        let phi = stats::lag1_autocorrelation(&residuals).clamp(-Self::MAX_PHI, Self::MAX_PHI);
        let last_residual = residuals.last().copied().unwrap_or(0.0);

        let trend_next = intercept + slope * recent.len() as f64;
        let variance = stats::variance(&residuals) * (1.0 - phi * phi);

        Estimate::report(trend_next + phi * last_residual, variance)
    }
}

/// The three estimators in [`EstimatorId::ALL`] order
pub fn default_estimators(half_life_days: f64) -> Vec<Box<dyn Estimator>> {
    vec![
        Box::new(StatisticalEstimator::new(half_life_days)),
        Box::new(TreeEnsembleEstimator::default()),
        Box::new(SequenceEstimator::default()),
    ]
}
