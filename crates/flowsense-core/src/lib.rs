//! FlowSense Core
//!
//! Cycle forecasting and insight engine. Given a user's ordered observation
//! stream (cycle starts and ends, symptoms, biometrics) it produces:
//! - calibrated forecasts of the next cycle start, fertile window and
//!   ovulation, each with an interval and a confidence score;
//! - advisory pattern flags (irregularity, PCOS-pattern, endometriosis-pattern);
//! - citation-backed insights explaining both.
//!
//! Realized outcomes are fed back through [`learning`] to adjust per-user
//! ensemble weights and interval widths.

pub mod algo;
pub mod calibration;
pub mod citation;
pub mod config;
pub mod cycle;
pub mod detector;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod features;
pub mod insight;
pub mod learning;
pub mod metrics;
pub mod observation;
pub mod phase;
pub mod predictor;
pub mod store;

pub use calibration::UserCalibrationState;
pub use citation::{CitationRecord, CitationRegistry, TopicCategory};
pub use config::EngineConfig;
pub use detector::{PatternCategory, PatternFlag};
pub use engine::{ForecastEngine, InsightReport};
pub use error::EngineError;
pub use insight::{Insight, Topic};
pub use learning::{CalibrationWorker, OnlineLearningController, OutcomeChannel, OutcomeEvent};
pub use observation::{BiometricKind, Observation, SymptomKind, UserId};
pub use phase::{CyclePhase, PhaseEstimate};
pub use predictor::{ConfidenceInterval, Forecast, TargetEvent};
