//! Walk-forward backtest
//!
//! Replays a synthetic history one cycle at a time. At each step the engine
//! sees only what was logged up to the day after the latest start, forecasts
//! the next start, and the realized start is fed back through the online
//! learning controller before the next step.

use crate::generator::SyntheticHistory;
use chrono::Duration;
use flowsense_core::estimator::EstimatorId;
use flowsense_core::{
    CitationRegistry, EngineConfig, ForecastEngine, OnlineLearningController, TargetEvent,
    UserCalibrationState, UserId,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Completed cycles required before the first forecast is scored
pub const DEFAULT_WARMUP_CYCLES: usize = 3;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorSummary {
    pub forecasts: usize,
    pub mean_absolute_error_days: f64,
}

impl ErrorSummary {
    fn from_errors(errors: &[f64]) -> Self {
        let forecasts = errors.len();
        let mean_absolute_error_days = if forecasts == 0 {
            0.0
        } else {
            errors.iter().sum::<f64>() / forecasts as f64
        };
        Self {
            forecasts,
            mean_absolute_error_days,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub scenario: String,
    pub cycles: usize,
    pub ensemble: ErrorSummary,
    pub estimators: BTreeMap<EstimatorId, ErrorSummary>,
    /// Share of realized starts inside the forecast interval
    pub interval_coverage: f64,
    pub mean_interval_width_days: f64,
    pub mean_confidence: f64,
    pub final_bias_days: f64,
    pub final_variance_inflation: f64,
}

pub struct Backtest<'r> {
    engine: ForecastEngine<'r>,
    controller: OnlineLearningController,
    warmup_cycles: usize,
}

impl<'r> Backtest<'r> {
    pub fn new(config: EngineConfig, registry: &'r CitationRegistry) -> Self {
        Self {
            controller: OnlineLearningController::new(&config),
            engine: ForecastEngine::new(config, registry),
            warmup_cycles: DEFAULT_WARMUP_CYCLES,
        }
    }

    pub fn with_warmup(mut self, cycles: usize) -> Self {
        self.warmup_cycles = cycles.max(1);
        self
    }

    pub fn run(&self, scenario: &str, history: &SyntheticHistory) -> BacktestReport {
        let mut calibration = UserCalibrationState::new(UserId::new());
        let mut ensemble_errors = Vec::new();
        let mut estimator_errors: BTreeMap<EstimatorId, Vec<f64>> = BTreeMap::new();
        let mut hits = 0usize;
        let mut widths = Vec::new();
        let mut confidences = Vec::new();

        for step in self.warmup_cycles..history.starts.len().saturating_sub(1) {
            let as_of = history.starts[step] + Duration::days(1);
            let actual = history.starts[step + 1];
            let visible = history.visible(as_of);

            let forecasts = self.engine.forecast(&visible, &calibration, as_of);
            let Some(forecast) = forecasts
                .iter()
                .find(|f| f.target_event == TargetEvent::NextCycleStart)
            else {
                continue;
            };

            let error = (actual - forecast.point_estimate).num_days().abs() as f64;
            ensemble_errors.push(error);
            for (id, date) in &forecast.estimator_estimates {
                let e = (actual - *date).num_days().abs() as f64;
                estimator_errors.entry(*id).or_default().push(e);
            }
            if forecast.confidence_interval.contains(actual) {
                hits += 1;
            }
            widths.push(forecast.confidence_interval.width_days() as f64);
            confidences.push(forecast.confidence_score);

            debug!(
                step,
                predicted = %forecast.point_estimate,
                actual = %actual,
                error,
                "Backtest step"
            );
            calibration = self.controller.record_outcome(forecast, actual, &calibration);
        }

        let evaluated = ensemble_errors.len();
        let mean = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        BacktestReport {
            scenario: scenario.to_string(),
            cycles: history.starts.len().saturating_sub(1),
            ensemble: ErrorSummary::from_errors(&ensemble_errors),
            estimators: estimator_errors
                .iter()
                .map(|(id, errors)| (*id, ErrorSummary::from_errors(errors)))
                .collect(),
            interval_coverage: if evaluated == 0 {
                0.0
            } else {
                hits as f64 / evaluated as f64
            },
            mean_interval_width_days: mean(&widths),
            mean_confidence: mean(&confidences),
            final_bias_days: calibration.cycle_length_bias(),
            final_variance_inflation: calibration.variance_inflation(),
        }
    }
}
