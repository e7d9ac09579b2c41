//! Named synthetic users
//!
//! - **regular**: steady 28-day cycles
//! - **irregular**: wide cycle-to-cycle variation
//! - **outlier**: regular with an occasional very long cycle
//! - **pcos_like**: long, variable cycles with androgenic symptoms
//! - **endometriosis_like**: worsening pain, shortening cycles, long bleeding
//! - **sparse**: few cycles, little symptom logging, no wearable

use crate::generator::CycleProfile;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Regular,
    Irregular,
    Outlier,
    PcosLike,
    EndometriosisLike,
    Sparse,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Self::Regular,
        Self::Irregular,
        Self::Outlier,
        Self::PcosLike,
        Self::EndometriosisLike,
        Self::Sparse,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Irregular => "irregular",
            Self::Outlier => "outlier",
            Self::PcosLike => "pcos_like",
            Self::EndometriosisLike => "endometriosis_like",
            Self::Sparse => "sparse",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Regular => "Steady 28-day cycles with light symptoms",
            Self::Irregular => "Cycle lengths varying by about a week",
            Self::Outlier => "Regular cycles with an occasional very long one",
            Self::PcosLike => "Long variable cycles, androgenic symptoms, rising heart rate",
            Self::EndometriosisLike => "Worsening pain, shortening cycles, long bleeding",
            Self::Sparse => "Three cycles, rare symptom logs, no biometrics",
        }
    }

    /// Accepts the canonical name and a few aliases
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().replace('-', "_").as_str() {
            "regular" | "normal" => Some(Self::Regular),
            "irregular" => Some(Self::Irregular),
            "outlier" => Some(Self::Outlier),
            "pcos_like" | "pcos" => Some(Self::PcosLike),
            "endometriosis_like" | "endometriosis" | "endo" => Some(Self::EndometriosisLike),
            "sparse" => Some(Self::Sparse),
            _ => None,
        }
    }

    pub fn default_cycles(&self) -> usize {
        match self {
            Self::Sparse => 3,
            _ => 14,
        }
    }

    pub fn profile(&self) -> CycleProfile {
        let base = CycleProfile::default();
        match self {
            Self::Regular => CycleProfile {
                length_sd: 0.8,
                ..base
            },
            Self::Irregular => CycleProfile {
                mean_length: 31.0,
                length_sd: 6.0,
                ..base
            },
            Self::Outlier => CycleProfile {
                length_sd: 0.8,
                long_cycle_chance: 0.1,
                long_cycle_extra_days: 25.0,
                ..base
            },
            Self::PcosLike => CycleProfile {
                mean_length: 48.0,
                length_sd: 12.0,
                androgenic_level: 7.0,
                ovulatory: false,
                heart_rate_drift: 1.0,
                ..base
            },
            Self::EndometriosisLike => CycleProfile {
                length_sd: 1.2,
                length_trend: -0.4,
                period_days: 8.5,
                pain_level: 4.0,
                pain_trend: 0.45,
                logging_rate: 0.9,
                ..base
            },
            Self::Sparse => CycleProfile {
                logging_rate: 0.05,
                tracks_biometrics: false,
                ..base
            },
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// (name, description) for every scenario
pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    Scenario::ALL
        .iter()
        .map(|s| (s.name(), s.description()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::CycleGenerator;
    use chrono::{Duration, NaiveDate};
    use flowsense_core::{CitationRegistry, EngineConfig, ForecastEngine, PatternCategory};
    use flowsense_core::{UserCalibrationState, UserId};

    #[test]
    fn test_parse_names_and_aliases() {
        for scenario in Scenario::ALL {
            assert_eq!(Scenario::parse(scenario.name()), Some(scenario));
        }
        assert_eq!(Scenario::parse("PCOS"), Some(Scenario::PcosLike));
        assert_eq!(Scenario::parse("endometriosis-like"), Some(Scenario::EndometriosisLike));
        assert_eq!(Scenario::parse("lunar"), None);
    }

    fn pattern_score(scenario: Scenario, category: PatternCategory) -> f64 {
        let first = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let history = CycleGenerator::new(42).generate(&scenario.profile(), first, scenario.default_cycles());
        let last = *history.starts.last().unwrap();
        let as_of = last + Duration::days(2);

        let registry = CitationRegistry::bundled().unwrap();
        let engine = ForecastEngine::new(EngineConfig::default(), &registry);
        let report = engine.analyze(&history.visible(as_of), &UserCalibrationState::new(UserId::new()), as_of);
        report
            .flags
            .iter()
            .find(|f| f.category() == category)
            .map(|f| f.score())
            .unwrap()
    }

    #[test]
    fn test_condition_scenarios_score_above_regular() {
        let regular_pcos = pattern_score(Scenario::Regular, PatternCategory::PcosPattern);
        let pcos = pattern_score(Scenario::PcosLike, PatternCategory::PcosPattern);
        assert!(pcos > regular_pcos, "{pcos} <= {regular_pcos}");

        let regular_endo = pattern_score(Scenario::Regular, PatternCategory::EndometriosisPattern);
        let endo = pattern_score(Scenario::EndometriosisLike, PatternCategory::EndometriosisPattern);
        assert!(endo > regular_endo, "{endo} <= {regular_endo}");
    }
}
