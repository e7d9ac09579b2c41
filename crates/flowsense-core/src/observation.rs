//! Raw Observation Model
//!
//! Observations are the only source of truth the engine consumes. They are
//! immutable once recorded; a correction is a new Observation carrying a
//! `supersedes` back-reference to the record it replaces.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Highest symptom severity a user can report.
pub const MAX_SEVERITY: u8 = 10;

/// Identifier of a single recorded observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(pub Uuid);

impl ObservationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the user that owns a partition of observations and calibration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Symptom kinds a user can log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymptomKind {
    Cramps,
    PelvicPain,
    Headache,
    Bloating,
    Acne,
    Fatigue,
    MoodChange,
    HeavyFlow,
    ExcessHairGrowth,
}

impl SymptomKind {
    pub const ALL: [SymptomKind; 9] = [
        Self::Cramps,
        Self::PelvicPain,
        Self::Headache,
        Self::Bloating,
        Self::Acne,
        Self::Fatigue,
        Self::MoodChange,
        Self::HeavyFlow,
        Self::ExcessHairGrowth,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cramps => "cramps",
            Self::PelvicPain => "pelvic_pain",
            Self::Headache => "headache",
            Self::Bloating => "bloating",
            Self::Acne => "acne",
            Self::Fatigue => "fatigue",
            Self::MoodChange => "mood_change",
            Self::HeavyFlow => "heavy_flow",
            Self::ExcessHairGrowth => "excess_hair_growth",
        }
    }

    /// Pain-type symptoms feed the endometriosis-pattern rule
    pub fn is_pain(&self) -> bool {
        matches!(self, Self::Cramps | Self::PelvicPain)
    }

    /// Androgen-associated symptoms feed the PCOS-pattern rule
    pub fn is_androgenic(&self) -> bool {
        matches!(self, Self::Acne | Self::ExcessHairGrowth)
    }
}

/// Device- or user-reported biometric channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricKind {
    /// Basal body temperature in °C
    BasalTemperature,
    /// Resting heart rate in beats per minute
    RestingHeartRate,
    /// Sleep duration in hours
    SleepHours,
}

impl BiometricKind {
    pub const ALL: [BiometricKind; 3] = [
        Self::BasalTemperature,
        Self::RestingHeartRate,
        Self::SleepHours,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::BasalTemperature => "basal_temperature",
            Self::RestingHeartRate => "resting_heart_rate",
            Self::SleepHours => "sleep_hours",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::BasalTemperature => "°C",
            Self::RestingHeartRate => "bpm",
            Self::SleepHours => "h",
        }
    }
}

/// What an observation records
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObservationKind {
    CycleStart,
    /// End of menstrual bleeding within the current cycle
    CycleEnd,
    Symptom {
        kind: SymptomKind,
        severity: u8,
    },
    Biometric {
        kind: BiometricKind,
        value: f64,
    },
}

/// A single immutable, timestamped record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    /// When the record was entered; decides precedence between conflicting records
    pub recorded_at: DateTime<Utc>,
    /// Calendar day the record refers to
    pub date: NaiveDate,
    pub kind: ObservationKind,
    /// Record this one corrects (lookup only)
    #[serde(default)]
    pub supersedes: Option<ObservationId>,
}

impl Observation {
    /// Create an observation recorded at noon UTC of the day it refers to
    pub fn new(date: NaiveDate, kind: ObservationKind) -> Self {
        let kind = match kind {
            ObservationKind::Symptom { kind, severity } => ObservationKind::Symptom {
                kind,
                severity: severity.min(MAX_SEVERITY),
            },
            other => other,
        };
        Self {
            id: ObservationId::new(),
            recorded_at: date.and_time(NaiveTime::MIN).and_utc() + chrono::Duration::hours(12),
            date,
            kind,
            supersedes: None,
        }
    }

    pub fn cycle_start(date: NaiveDate) -> Self {
        Self::new(date, ObservationKind::CycleStart)
    }

    pub fn cycle_end(date: NaiveDate) -> Self {
        Self::new(date, ObservationKind::CycleEnd)
    }

    pub fn symptom(date: NaiveDate, kind: SymptomKind, severity: u8) -> Self {
        Self::new(date, ObservationKind::Symptom { kind, severity })
    }

    pub fn biometric(date: NaiveDate, kind: BiometricKind, value: f64) -> Self {
        Self::new(date, ObservationKind::Biometric { kind, value })
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = at;
        self
    }

    /// Build a corrective edit of this observation
    pub fn correct(&self, date: NaiveDate, kind: ObservationKind, at: DateTime<Utc>) -> Self {
        let mut edit = Self::new(date, kind).recorded_at(at);
        edit.supersedes = Some(self.id);
        edit
    }

    /// Precedence key: most recently recorded wins, ties broken by id
    pub(crate) fn precedence(&self) -> (DateTime<Utc>, ObservationId) {
        (self.recorded_at, self.id)
    }
}

/// Drop every observation that a later edit supersedes
pub fn effective(observations: &[Observation]) -> Vec<&Observation> {
    let superseded: HashSet<ObservationId> =
        observations.iter().filter_map(|o| o.supersedes).collect();

    observations
        .iter()
        .filter(|o| !superseded.contains(&o.id))
        .collect()
}
