//! Cycle phase for the `as_of` date.

use crate::features::{FeatureKey, FeatureVector, temperature_shift};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bleeding days assumed when no cycle-end has ever been logged
const DEFAULT_PERIOD_DAYS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Menstrual,
    Follicular,
    Ovulatory,
    Luteal,
}

impl CyclePhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Menstrual => "menstrual",
            Self::Follicular => "follicular",
            Self::Ovulatory => "ovulatory",
            Self::Luteal => "luteal",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseEstimate {
    pub phase: CyclePhase,
    /// 1-based day of the open cycle
    pub cycle_day: u32,
    pub expected_ovulation_day: u32,
    /// A basal temperature shift has been observed this cycle
    pub shift_confirmed: bool,
}

impl PhaseEstimate {
    /// `None` before the first logged cycle start.
    ///
    /// `expected_length` is the forecast length of the open cycle and
    /// `default_luteal_days` stands in until a personal luteal length exists.
    pub fn estimate(
        features: &FeatureVector,
        expected_length: f64,
        default_luteal_days: f64,
    ) -> Option<Self> {
        let since_start = features.get(FeatureKey::DaysSinceLastStart)?;
        let cycle_day = since_start.max(0.0) as u32 + 1;

        let period = features
            .get(FeatureKey::PeriodLengthMean)
            .unwrap_or(DEFAULT_PERIOD_DAYS)
            .round()
            .max(1.0) as u32;
        let luteal = features
            .get(FeatureKey::LutealLength)
            .unwrap_or(default_luteal_days);
        let expected_ovulation_day = ((expected_length - luteal).round().max(0.0) as u32).max(period + 1);

        let mut readings: Vec<(u32, f64)> = features
            .days
            .iter()
            .filter_map(|d| d.basal_temperature.map(|t| (d.cycle_day, t)))
            .collect();
        readings.sort_by_key(|r| r.0);
        let shift_day = temperature_shift(&readings);

        let phase = if cycle_day <= period {
            CyclePhase::Menstrual
        } else if shift_day.is_some_and(|d| cycle_day > d) {
            CyclePhase::Luteal
        } else if cycle_day + 1 >= expected_ovulation_day && cycle_day <= expected_ovulation_day + 1 {
            CyclePhase::Ovulatory
        } else if cycle_day < expected_ovulation_day {
            CyclePhase::Follicular
        } else {
            CyclePhase::Luteal
        };

        Some(Self {
            phase,
            cycle_day,
            expected_ovulation_day,
            shift_confirmed: shift_day.is_some(),
        })
    }
}
