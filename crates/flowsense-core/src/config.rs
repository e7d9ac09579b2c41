//! Engine configuration
//!
//! Every tunable has a default, so an empty environment yields a working
//! engine. Values are read from an optional file and then from environment
//! variables with the `FLOWSENSE` prefix, using `__` to separate nested keys:
//!
//! - `FLOWSENSE__OUTLIER_BOUND_DAYS=120` -> `outlier_bound_days = 120`
//! - `FLOWSENSE__PATTERN_THRESHOLDS__PCOS=0.8` -> `pattern_thresholds.pcos = 0.8`

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Outlier bound must be longer than the minimum cycle length")]
    InvalidOutlierBound,

    #[error("Minimum cycle length must be at least one day")]
    InvalidMinCycle,

    #[error("Recency half-life must be positive")]
    InvalidHalfLife,

    #[error("Pattern threshold for {0} must be in (0, 1]")]
    InvalidThreshold(&'static str),

    #[error("Fallback confidence cap must be in (0, 1]")]
    InvalidConfidenceCap,

    #[error("Default interval half-width must be at least one day")]
    InvalidIntervalWidth,

    #[error("Population median cycle length must be at least the minimum cycle length")]
    InvalidPopulationMedian,

    #[error("Robust outlier z-score must be positive")]
    InvalidOutlierZ,

    #[error("Luteal phase must be shorter than the population median cycle")]
    InvalidLutealPhase,
}

/// Per-category score thresholds for pattern flags
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternThresholds {
    pub irregularity: f64,
    pub pcos: f64,
    pub endometriosis: f64,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            irregularity: 0.6,
            pcos: 0.7,
            endometriosis: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cycles longer than this are excluded from mean/variance
    pub outlier_bound_days: u32,
    /// Half-life of the recency weighting and of calibration error tracking
    pub recency_half_life_days: f64,
    pub pattern_thresholds: PatternThresholds,
    /// Confidence ceiling when fewer than two estimators report
    pub fallback_confidence_cap: f64,
    /// Half-width of the interval returned without usable history
    pub default_interval_half_width_days: u32,
    pub population_median_cycle_days: u32,
    /// Robust z-score beyond which a cycle is treated as an outlier
    pub robust_outlier_z: f64,
    /// Starts closer together than this are the same cycle start
    pub min_cycle_days: u32,
    /// Luteal length used when no personal estimate exists
    pub luteal_phase_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            outlier_bound_days: 90,
            recency_half_life_days: 90.0,
            pattern_thresholds: PatternThresholds::default(),
            fallback_confidence_cap: 0.5,
            default_interval_half_width_days: 7,
            population_median_cycle_days: 28,
            robust_outlier_z: 3.5,
            min_cycle_days: 10,
            luteal_phase_days: 14,
        }
    }
}

impl EngineConfig {
    /// Load from `.env` and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load from an optional config file, then overlay environment variables
    ///
    /// The file format follows its extension (`.toml`, `.json`, `.yaml`).
    /// The result is validated before it is returned.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: EngineConfig = builder
            .add_source(
                config::Environment::with_prefix("FLOWSENSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_cycle_days == 0 {
            return Err(ValidationError::InvalidMinCycle);
        }
        if self.outlier_bound_days <= self.min_cycle_days {
            return Err(ValidationError::InvalidOutlierBound);
        }
        if !(self.recency_half_life_days > 0.0) {
            return Err(ValidationError::InvalidHalfLife);
        }
        let thresholds = [
            ("irregularity", self.pattern_thresholds.irregularity),
            ("pcos", self.pattern_thresholds.pcos),
            ("endometriosis", self.pattern_thresholds.endometriosis),
        ];
        for (name, value) in thresholds {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ValidationError::InvalidThreshold(name));
            }
        }
        if !(self.fallback_confidence_cap > 0.0 && self.fallback_confidence_cap <= 1.0) {
            return Err(ValidationError::InvalidConfidenceCap);
        }
        if self.default_interval_half_width_days == 0 {
            return Err(ValidationError::InvalidIntervalWidth);
        }
        if self.population_median_cycle_days < self.min_cycle_days {
            return Err(ValidationError::InvalidPopulationMedian);
        }
        if !(self.robust_outlier_z > 0.0) {
            return Err(ValidationError::InvalidOutlierZ);
        }
        if self.luteal_phase_days == 0 || self.luteal_phase_days >= self.population_median_cycle_days {
            return Err(ValidationError::InvalidLutealPhase);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.outlier_bound_days, 90);
        assert_eq!(config.recency_half_life_days, 90.0);
        assert_eq!(config.fallback_confidence_cap, 0.5);
        assert_eq!(config.default_interval_half_width_days, 7);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "outlier_bound_days = 120\n\n[pattern_thresholds]\npcos = 0.8"
        )
        .unwrap();

        let config = EngineConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.outlier_bound_days, 120);
        assert_eq!(config.pattern_thresholds.pcos, 0.8);
        // Untouched values keep their defaults
        assert_eq!(config.pattern_thresholds.endometriosis, 0.7);
        assert_eq!(config.recency_half_life_days, 90.0);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "fallback_confidence_cap = 1.5").unwrap();

        let err = EngineConfig::load_from(Some(file.path())).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationFailed(ValidationError::InvalidConfidenceCap)
        ));
    }

    #[test]
    fn test_validate_thresholds() {
        let mut config = EngineConfig::default();
        config.pattern_thresholds.endometriosis = 0.0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidThreshold("endometriosis"))
        );
    }

    #[test]
    fn test_validate_half_life() {
        let config = EngineConfig {
            recency_half_life_days: 0.0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidHalfLife));
    }

    #[test]
    fn test_validate_min_cycle() {
        let config = EngineConfig {
            min_cycle_days: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidMinCycle));
    }

    #[test]
    fn test_validate_interval_width() {
        let config = EngineConfig {
            default_interval_half_width_days: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidIntervalWidth));
    }
}
