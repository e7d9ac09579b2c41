//! Seeded synthetic cycle histories
//!
//! Produces the observation stream a tracking app would log for a user with a
//! given [`CycleProfile`]: cycle starts and ends, symptoms, and daily
//! biometrics. The same seed always yields the same history.

use chrono::{Duration, NaiveDate};
use flowsense_core::{BiometricKind, Observation, SymptomKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

const MIN_LENGTH: f64 = 15.0;
const MAX_LENGTH: f64 = 120.0;
const LUTEAL_DAYS: i64 = 14;
const BASE_TEMPERATURE_C: f64 = 36.4;
const LUTEAL_RISE_C: f64 = 0.35;
const BASE_HEART_RATE: f64 = 62.0;
const BASE_SLEEP_HOURS: f64 = 7.4;

/// Behavior of one synthetic user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleProfile {
    pub mean_length: f64,
    pub length_sd: f64,
    /// Days added to the mean per cycle (negative shortens)
    pub length_trend: f64,
    /// Chance of an occasional very long cycle
    pub long_cycle_chance: f64,
    pub long_cycle_extra_days: f64,
    pub period_days: f64,
    /// Mean pain severity (0-10) on bleeding days
    pub pain_level: f64,
    pub pain_trend: f64,
    /// Mean acne / hair-growth severity; 0 disables
    pub androgenic_level: f64,
    /// Chance a symptom is logged on a given eligible day
    pub logging_rate: f64,
    pub tracks_biometrics: bool,
    /// Basal temperature rises after ovulation
    pub ovulatory: bool,
    /// Resting heart rate drift in bpm per cycle
    pub heart_rate_drift: f64,
}

impl Default for CycleProfile {
    fn default() -> Self {
        Self {
            mean_length: 28.0,
            length_sd: 1.0,
            length_trend: 0.0,
            long_cycle_chance: 0.0,
            long_cycle_extra_days: 0.0,
            period_days: 5.0,
            pain_level: 2.0,
            pain_trend: 0.0,
            androgenic_level: 0.0,
            logging_rate: 0.6,
            tracks_biometrics: true,
            ovulatory: true,
            heart_rate_drift: 0.0,
        }
    }
}

/// Observations plus the ground-truth cycle starts they were generated from
#[derive(Debug, Clone)]
pub struct SyntheticHistory {
    pub observations: Vec<Observation>,
    /// Every cycle start, oldest first; the last one opens an unfinished cycle
    pub starts: Vec<NaiveDate>,
}

impl SyntheticHistory {
    pub fn lengths(&self) -> Vec<i64> {
        self.starts
            .windows(2)
            .map(|w| (w[1] - w[0]).num_days())
            .collect()
    }

    /// Observations a user could have logged by `as_of`
    pub fn visible(&self, as_of: NaiveDate) -> Vec<Observation> {
        self.observations
            .iter()
            .filter(|o| o.date <= as_of)
            .cloned()
            .collect()
    }
}

pub struct CycleGenerator {
    rng: StdRng,
}

impl CycleGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn normal(&mut self, mean: f64, sd: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        mean + sd * z
    }

    fn severity(&mut self, mean: f64) -> u8 {
        self.normal(mean, 1.0).round().clamp(0.0, 10.0) as u8
    }

    /// `cycles` completed cycles starting at `first_start`, plus the start of the next
    pub fn generate(
        &mut self,
        profile: &CycleProfile,
        first_start: NaiveDate,
        cycles: usize,
    ) -> SyntheticHistory {
        let mut observations = Vec::new();
        let mut starts = Vec::with_capacity(cycles + 1);
        let mut start = first_start;

        for index in 0..cycles {
            let mut length = self.normal(
                profile.mean_length + profile.length_trend * index as f64,
                profile.length_sd,
            );
            if profile.long_cycle_chance > 0.0 && self.rng.random_bool(profile.long_cycle_chance) {
                length += profile.long_cycle_extra_days;
            }
            let length = length.round().clamp(MIN_LENGTH, MAX_LENGTH) as i64;

            starts.push(start);
            self.cycle(profile, index, start, length, &mut observations);
            start += Duration::days(length);
        }
        starts.push(start);
        observations.push(Observation::cycle_start(start));

        SyntheticHistory {
            observations,
            starts,
        }
    }

    fn cycle(
        &mut self,
        profile: &CycleProfile,
        index: usize,
        start: NaiveDate,
        length: i64,
        out: &mut Vec<Observation>,
    ) {
        out.push(Observation::cycle_start(start));

        let period = self
            .normal(profile.period_days, 0.7)
            .round()
            .clamp(2.0, (length - 1) as f64) as i64;
        out.push(Observation::cycle_end(start + Duration::days(period - 1)));

        let pain = profile.pain_level + profile.pain_trend * index as f64;
        let ovulation_day = (length - LUTEAL_DAYS).max(1);

        for day in 0..length {
            let date = start + Duration::days(day);

            if day < period && self.rng.random_bool(profile.logging_rate) {
                out.push(Observation::symptom(date, SymptomKind::Cramps, self.severity(pain)));
                if pain > 5.0 {
                    out.push(Observation::symptom(date, SymptomKind::PelvicPain, self.severity(pain - 1.0)));
                }
            }
            if profile.androgenic_level > 0.0 && day % 7 == 3 && self.rng.random_bool(profile.logging_rate) {
                let kind = if day % 14 == 3 {
                    SymptomKind::Acne
                } else {
                    SymptomKind::ExcessHairGrowth
                };
                out.push(Observation::symptom(date, kind, self.severity(profile.androgenic_level)));
            }
            if day + 3 >= length && self.rng.random_bool(profile.logging_rate * 0.5) {
                out.push(Observation::symptom(date, SymptomKind::Bloating, self.severity(3.0)));
            }

            if profile.tracks_biometrics {
                let rise = if profile.ovulatory && day >= ovulation_day {
                    LUTEAL_RISE_C
                } else {
                    0.0
                };
                let temperature = self.normal(BASE_TEMPERATURE_C + rise, 0.05);
                let heart_rate =
                    self.normal(BASE_HEART_RATE + profile.heart_rate_drift * index as f64, 1.5);
                let sleep = self.normal(BASE_SLEEP_HOURS, 0.4);
                out.push(Observation::biometric(date, BiometricKind::BasalTemperature, temperature));
                out.push(Observation::biometric(date, BiometricKind::RestingHeartRate, heart_rate));
                out.push(Observation::biometric(date, BiometricKind::SleepHours, sleep));
            }
        }
    }
}
