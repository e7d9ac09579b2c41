use crate::calibration::CalibrationError;
use crate::citation::CitationError;
use crate::config::ConfigError;
use crate::insight::InsightError;
use crate::store::StoreError;
use thiserror::Error;

/// Failures surfaced by the engine. Too little history is never one of them:
/// it is reported through `sufficiency` on the forecasts.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("citation registry error: {0}")]
    Citation(#[from] CitationError),

    #[error("calibration state error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Insight(#[from] InsightError),
}
