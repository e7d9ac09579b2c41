//! Forecast Engine
//!
//! Request facade over the pipeline:
//! observations -> cycle history -> features -> forecasts + flags -> insights.
//!
//! The engine holds configuration and the borrowed citation registry only.
//! Calibration state is passed in and never written here; outcomes go through
//! [`crate::learning`].

use crate::calibration::UserCalibrationState;
use crate::citation::CitationRegistry;
use crate::config::EngineConfig;
use crate::cycle::ExcludedRecord;
use crate::detector::{PatternDetector, PatternFlag};
use crate::error::EngineError;
use crate::features::{FeatureExtractor, FeatureKey, FeatureVector};
use crate::insight::{Insight, InsightComposer, InsightError};
use crate::observation::{Observation, UserId};
use crate::phase::PhaseEstimate;
use crate::predictor::{EnsemblePredictor, Forecast, TargetEvent};
use crate::store::{CalibrationStore, ObservationSource};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

/// Everything one request produces
#[derive(Debug, Clone, Serialize)]
pub struct InsightReport {
    pub as_of: NaiveDate,
    pub sufficiency: bool,
    pub phase: Option<PhaseEstimate>,
    pub forecasts: Vec<Forecast>,
    pub flags: Vec<PatternFlag>,
    pub insights: Vec<Insight>,
    #[serde(serialize_with = "serialize_errors")]
    pub missing_citations: Vec<InsightError>,
    pub excluded_records: Vec<ExcludedRecord>,
}

impl InsightReport {
    pub fn forecast(&self, target: TargetEvent) -> Option<&Forecast> {
        self.forecasts.iter().find(|f| f.target_event == target)
    }
}

fn serialize_errors<S: serde::Serializer>(
    errors: &[InsightError],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

pub struct ForecastEngine<'r> {
    config: EngineConfig,
    registry: &'r CitationRegistry,
    extractor: FeatureExtractor,
    predictor: EnsemblePredictor,
    detector: PatternDetector,
    composer: InsightComposer,
}

impl<'r> ForecastEngine<'r> {
    pub fn new(config: EngineConfig, registry: &'r CitationRegistry) -> Self {
        Self::with_predictor(EnsemblePredictor::new(&config), config, registry)
    }

    /// Swap the estimator set, e.g. to run a single estimator in a backtest
    pub fn with_predictor(
        predictor: EnsemblePredictor,
        config: EngineConfig,
        registry: &'r CitationRegistry,
    ) -> Self {
        Self {
            extractor: FeatureExtractor::new(&config),
            detector: PatternDetector::new(config.pattern_thresholds),
            composer: InsightComposer::new(),
            predictor,
            config,
            registry,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn features(&self, observations: &[Observation], as_of: NaiveDate) -> FeatureVector {
        self.extractor.extract(observations, as_of)
    }

    /// Forecasts only, without flags or insights
    pub fn forecast(
        &self,
        observations: &[Observation],
        calibration: &UserCalibrationState,
        as_of: NaiveDate,
    ) -> Vec<Forecast> {
        let features = self.extractor.extract(observations, as_of);
        self.predictor.predict_all(&features, calibration)
    }

    pub fn analyze(
        &self,
        observations: &[Observation],
        calibration: &UserCalibrationState,
        as_of: NaiveDate,
    ) -> InsightReport {
        let history = self.extractor.history(observations, as_of);
        let features = self.extractor.extract_with_history(&history, as_of);

        let forecasts = self.predictor.predict_all(&features, calibration);
        let flags = self.detector.detect(&features);
        let composition = self.composer.compose(&forecasts, &flags, self.registry);

        let expected_length = forecasts
            .iter()
            .find(|f| f.target_event == TargetEvent::NextCycleStart && f.sufficiency)
            .zip(features.last_cycle_start)
            .map(|(f, start)| (f.point_estimate - start).num_days() as f64)
            .unwrap_or(self.config.population_median_cycle_days as f64);
        let phase = PhaseEstimate::estimate(
            &features,
            expected_length,
            self.config.luteal_phase_days as f64,
        );

        debug!(
            as_of = %as_of,
            cycles = features.get_or(FeatureKey::CompletedCycles, 0.0),
            sufficiency = features.sufficiency,
            insights = composition.insights.len(),
            "Analyzed history"
        );

        InsightReport {
            as_of,
            sufficiency: features.sufficiency,
            phase,
            forecasts,
            flags,
            insights: composition.insights,
            missing_citations: composition.missing_citations,
            excluded_records: history.excluded,
        }
    }

    /// Pull one user's data through the store boundaries and analyze it
    pub fn analyze_user(
        &self,
        source: &dyn ObservationSource,
        store: &dyn CalibrationStore,
        user: UserId,
        as_of: NaiveDate,
    ) -> Result<InsightReport, EngineError> {
        let observations = source.observations(user)?;
        let calibration = store.get_or_default(user)?.reconcile();
        let report = self.analyze(&observations, &calibration, as_of);
        info!(
            user = %user,
            observations = observations.len(),
            sufficiency = report.sufficiency,
            "Insight report produced"
        );
        Ok(report)
    }
}
