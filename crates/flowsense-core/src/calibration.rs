//! Per-user calibration state
//!
//! Small scalar corrections learned from realized outcomes: a signed bias on
//! the predicted cycle length, a variance inflation factor for the intervals
//! and a running absolute error per estimator (which becomes the ensemble
//! weights). Only the learning controller writes it; everything else reads a
//! snapshot.

use crate::algo::Ewma;
use crate::estimator::{EstimatorId, NUM_ESTIMATORS};
use crate::features::FEATURE_SCHEMA_VERSION;
use crate::metrics;
use crate::observation::UserId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Error (days) assumed for an estimator that has never been scored
pub const PRIOR_ESTIMATOR_ERROR_DAYS: f64 = 2.0;

/// Floor on tracked error so a lucky streak cannot take all the weight
const MIN_ERROR_DAYS: f64 = 0.25;

pub const MIN_VARIANCE_INFLATION: f64 = 1.0;
pub const MAX_VARIANCE_INFLATION: f64 = 3.0;
pub const MAX_BIAS_DAYS: f64 = 7.0;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration schema version {found} does not match feature schema {expected}")]
    SchemaVersionMismatch { found: u32, expected: u32 },

    #[error("calibration encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCalibrationState {
    user_id: UserId,
    schema_version: u32,
    cycle_length_bias: Ewma,
    variance_inflation: f64,
    estimator_errors: [Ewma; NUM_ESTIMATORS],
    outcomes_recorded: u64,
    last_outcome: Option<NaiveDate>,
}

impl UserCalibrationState {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            schema_version: FEATURE_SCHEMA_VERSION,
            cycle_length_bias: Ewma::new(),
            variance_inflation: MIN_VARIANCE_INFLATION,
            estimator_errors: [Ewma::seeded(PRIOR_ESTIMATOR_ERROR_DAYS); NUM_ESTIMATORS],
            outcomes_recorded: 0,
            last_outcome: None,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Days added to every predicted cycle length
    pub fn cycle_length_bias(&self) -> f64 {
        self.cycle_length_bias.value()
    }

    pub fn variance_inflation(&self) -> f64 {
        self.variance_inflation
    }

    pub fn estimator_error(&self, id: EstimatorId) -> f64 {
        self.estimator_errors[id.index()].value()
    }

    pub fn outcomes_recorded(&self) -> u64 {
        self.outcomes_recorded
    }

    pub fn last_outcome(&self) -> Option<NaiveDate> {
        self.last_outcome
    }

    /// Inverse-error weights over all estimators, summing to 1
    pub fn estimator_weights(&self) -> [f64; NUM_ESTIMATORS] {
        let inverse = self
            .estimator_errors
            .map(|e| 1.0 / e.value().max(MIN_ERROR_DAYS));
        let total: f64 = inverse.iter().sum();
        inverse.map(|w| w / total)
    }

    pub fn check_schema(&self) -> Result<(), CalibrationError> {
        if self.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(CalibrationError::SchemaVersionMismatch {
                found: self.schema_version,
                expected: FEATURE_SCHEMA_VERSION,
            });
        }
        Ok(())
    }

    /// Reset to defaults when the stored state predates the running feature schema
    pub fn reconcile(self) -> Self {
        match self.check_schema() {
            Ok(()) => self,
            Err(err) => {
                warn!(user = %self.user_id, error = %err, "Resetting calibration state");
                metrics::CALIBRATION_RESETS_TOTAL.inc();
                Self::new(self.user_id)
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CalibrationError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CalibrationError> {
        Ok(bincode::deserialize(bytes)?)
    }

    // Mutation is reserved for the learning controller

    pub(crate) fn record_estimator_error(&mut self, id: EstimatorId, abs_error: f64, alpha: f64) {
        self.estimator_errors[id.index()].update(abs_error, alpha);
    }

    pub(crate) fn record_bias(&mut self, signed_error: f64, alpha: f64) {
        let target = (self.cycle_length_bias.value() + signed_error).clamp(-MAX_BIAS_DAYS, MAX_BIAS_DAYS);
        self.cycle_length_bias.update(target, alpha);
    }

    pub(crate) fn scale_inflation(&mut self, factor: f64) {
        self.variance_inflation = (self.variance_inflation * factor)
            .clamp(MIN_VARIANCE_INFLATION, MAX_VARIANCE_INFLATION);
    }

    pub(crate) fn mark_outcome(&mut self, date: NaiveDate) {
        self.outcomes_recorded += 1;
        self.last_outcome = Some(self.last_outcome.map_or(date, |d| d.max(date)));
    }

    #[cfg(test)]
    pub(crate) fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = UserCalibrationState::new(UserId::new());
        assert_eq!(state.cycle_length_bias(), 0.0);
        assert_eq!(state.variance_inflation(), 1.0);
        assert_eq!(state.estimator_error(EstimatorId::Sequence), PRIOR_ESTIMATOR_ERROR_DAYS);
        let weights = state.estimator_weights();
        for w in weights {
            assert!((w - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_lower_error_gets_more_weight() {
        let mut state = UserCalibrationState::new(UserId::new());
        state.record_estimator_error(EstimatorId::TreeEnsemble, 0.5, 0.5);
        state.record_estimator_error(EstimatorId::Sequence, 6.0, 0.5);
        let w = state.estimator_weights();
        assert!(w[1] > w[0] && w[0] > w[2]);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inflation_and_bias_are_bounded() {
        let mut state = UserCalibrationState::new(UserId::new());
        for _ in 0..50 {
            state.scale_inflation(1.1);
            state.record_bias(30.0, 1.0);
        }
        assert_eq!(state.variance_inflation(), MAX_VARIANCE_INFLATION);
        assert_eq!(state.cycle_length_bias(), MAX_BIAS_DAYS);
        state.scale_inflation(0.01);
        assert_eq!(state.variance_inflation(), MIN_VARIANCE_INFLATION);
    }

    #[test]
    fn test_reconcile_resets_stale_schema() {
        let user = UserId::new();
        let mut stale = UserCalibrationState::new(user).with_schema_version(0);
        stale.scale_inflation(2.0);
        assert!(matches!(
            stale.check_schema(),
            Err(CalibrationError::SchemaVersionMismatch { found: 0, .. })
        ));

        let fresh = stale.reconcile();
        assert_eq!(fresh, UserCalibrationState::new(user));
    }

    #[test]
    fn test_bincode_round_trip() {
        let mut state = UserCalibrationState::new(UserId::new());
        state.record_bias(2.0, 0.3);
        state.mark_outcome(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        let decoded = UserCalibrationState::from_bytes(&state.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, state);
        assert!(UserCalibrationState::from_bytes(&[1, 2]).is_err());
    }
}
