//! Cycle Reconstruction
//!
//! Cycle records are derived, never stored: they are rebuilt from the ordered
//! observation stream on every request. Conflicting or impossible records are
//! excluded deterministically (most recently recorded observation wins) and
//! reported back to the caller instead of failing the request.

use crate::metrics;
use crate::observation::{
    BiometricKind, MAX_SEVERITY, Observation, ObservationId, ObservationKind, SymptomKind,
    effective,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A symptom entry attached to a cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymptomEntry {
    pub date: NaiveDate,
    pub kind: SymptomKind,
    pub severity: u8,
}

/// A biometric reading attached to a cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiometricEntry {
    pub date: NaiveDate,
    pub kind: BiometricKind,
    pub value: f64,
}

/// One menstrual cycle, bounded by consecutive start observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub start_date: NaiveDate,
    /// Last day of the cycle (day before the next start); `None` while open
    pub end_date: Option<NaiveDate>,
    /// `None` while the cycle is open
    pub length_days: Option<u32>,
    /// Last day of bleeding, when reported
    pub period_end: Option<NaiveDate>,
    pub symptoms: Vec<SymptomEntry>,
    pub biometrics: Vec<BiometricEntry>,
    pub start_observation: ObservationId,
}

impl CycleRecord {
    pub fn is_complete(&self) -> bool {
        self.length_days.is_some()
    }

    /// Bleeding duration in days, counting the start day
    pub fn period_days(&self) -> Option<u32> {
        self.period_end
            .map(|end| (end - self.start_date).num_days() as u32 + 1)
    }

    /// 1-based day of cycle for `date`
    pub fn cycle_day(&self, date: NaiveDate) -> Option<u32> {
        let offset = (date - self.start_date).num_days();
        if offset < 0 {
            return None;
        }
        if let Some(len) = self.length_days {
            if offset >= len as i64 {
                return None;
            }
        }
        Some(offset as u32 + 1)
    }

    pub fn symptom_severities(&self, kind: SymptomKind) -> impl Iterator<Item = f64> + '_ {
        self.symptoms
            .iter()
            .filter(move |s| s.kind == kind)
            .map(|s| s.severity as f64)
    }

    pub fn biometric_values(&self, kind: BiometricKind) -> impl Iterator<Item = f64> + '_ {
        self.biometrics
            .iter()
            .filter(move |b| b.kind == kind)
            .map(|b| b.value)
    }
}

/// Why a record was dropped from reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Start too close to another start; the other one was recorded later
    OverlappingCycle { kept: ObservationId },
    /// End of bleeding dated before any cycle start
    NegativeLength,
    /// Second end-of-bleeding record for the same cycle
    ConflictingPeriodEnd { kept: ObservationId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedRecord {
    pub observation_id: ObservationId,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// Ordered, non-overlapping cycles for one user plus everything that was excluded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleHistory {
    pub cycles: Vec<CycleRecord>,
    pub excluded: Vec<ExcludedRecord>,
}

impl CycleHistory {
    /// Rebuild cycles from raw observations
    ///
    /// Starts closer than `min_cycle_days` apart are treated as overlapping
    /// records of the same cycle start. Two starts on the same date always
    /// overlap, whatever the bound.
    pub fn reconstruct(observations: &[Observation], min_cycle_days: u32) -> Self {
        let min_gap = min_cycle_days.max(1) as i64;
        let live = effective(observations);
        let mut excluded = Vec::new();

        let mut starts: Vec<&Observation> = live
            .iter()
            .copied()
            .filter(|o| matches!(o.kind, ObservationKind::CycleStart))
            .collect();
        starts.sort_by_key(|o| (o.date, o.precedence()));

        // Resolve overlapping starts
        let mut accepted: Vec<&Observation> = Vec::with_capacity(starts.len());
        for candidate in starts {
            let overlaps = accepted.last().is_some_and(|prev| {
                (candidate.date - prev.date).num_days() < min_gap
            });
            if !overlaps {
                accepted.push(candidate);
                continue;
            }
            let Some(prev) = accepted.pop() else {
                continue;
            };
            let (kept, dropped) = if candidate.precedence() > prev.precedence() {
                (candidate, prev)
            } else {
                (prev, candidate)
            };
            accepted.push(kept);
            excluded.push(ExcludedRecord {
                observation_id: dropped.id,
                date: dropped.date,
                reason: ExclusionReason::OverlappingCycle { kept: kept.id },
            });
        }

        let mut cycles: Vec<CycleRecord> = accepted
            .iter()
            .enumerate()
            .map(|(i, start)| {
                let next = accepted.get(i + 1).map(|n| n.date);
                CycleRecord {
                    start_date: start.date,
                    end_date: next.and_then(|n| n.pred_opt()),
                    length_days: next.map(|n| (n - start.date).num_days() as u32),
                    period_end: None,
                    symptoms: Vec::new(),
                    biometrics: Vec::new(),
                    start_observation: start.id,
                }
            })
            .collect();

        // Attach end-of-bleeding records
        let mut ends: Vec<&Observation> = live
            .iter()
            .copied()
            .filter(|o| matches!(o.kind, ObservationKind::CycleEnd))
            .collect();
        ends.sort_by_key(|o| (o.date, o.precedence()));

        let mut period_end_source: Vec<Option<&Observation>> = vec![None; cycles.len()];
        for end in ends {
            let Some(idx) = cycle_index(&cycles, end.date) else {
                excluded.push(ExcludedRecord {
                    observation_id: end.id,
                    date: end.date,
                    reason: ExclusionReason::NegativeLength,
                });
                continue;
            };
            match period_end_source[idx] {
                None => {
                    period_end_source[idx] = Some(end);
                }
                Some(current) => {
                    let (kept, dropped) = if end.precedence() > current.precedence() {
                        (end, current)
                    } else {
                        (current, end)
                    };
                    period_end_source[idx] = Some(kept);
                    excluded.push(ExcludedRecord {
                        observation_id: dropped.id,
                        date: dropped.date,
                        reason: ExclusionReason::ConflictingPeriodEnd { kept: kept.id },
                    });
                }
            }
        }
        for (cycle, source) in cycles.iter_mut().zip(period_end_source) {
            cycle.period_end = source.map(|o| o.date);
        }

        // Attach symptoms and biometrics
        let mut details: Vec<&Observation> = live
            .iter()
            .copied()
            .filter(|o| {
                matches!(
                    o.kind,
                    ObservationKind::Symptom { .. } | ObservationKind::Biometric { .. }
                )
            })
            .collect();
        details.sort_by_key(|o| (o.date, o.precedence()));

        for obs in details {
            let Some(idx) = cycle_index(&cycles, obs.date) else {
                continue;
            };
            match obs.kind {
                ObservationKind::Symptom { kind, severity } => {
                    cycles[idx].symptoms.push(SymptomEntry {
                        date: obs.date,
                        kind,
                        severity: severity.min(MAX_SEVERITY),
                    });
                }
                ObservationKind::Biometric { kind, value } if value.is_finite() => {
                    cycles[idx].biometrics.push(BiometricEntry {
                        date: obs.date,
                        kind,
                        value,
                    });
                }
                _ => {}
            }
        }

        for record in &excluded {
            warn!(
                observation = %record.observation_id,
                date = %record.date,
                reason = ?record.reason,
                "Excluded malformed cycle record"
            );
            metrics::MALFORMED_RECORDS_TOTAL.inc();
        }

        Self { cycles, excluded }
    }

    pub fn completed(&self) -> impl Iterator<Item = &CycleRecord> {
        self.cycles.iter().filter(|c| c.is_complete())
    }

    /// The open (in-progress) cycle, if any
    pub fn current(&self) -> Option<&CycleRecord> {
        self.cycles.last().filter(|c| !c.is_complete())
    }

    pub fn last_start(&self) -> Option<NaiveDate> {
        self.cycles.last().map(|c| c.start_date)
    }
}

/// Index of the cycle containing `date`, if any
fn cycle_index(cycles: &[CycleRecord], date: NaiveDate) -> Option<usize> {
    let after = cycles.partition_point(|c| c.start_date <= date);
    after.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    #[test]
    fn test_reconstruct_regular_history() {
        let obs: Vec<Observation> = (0..4).map(|i| Observation::cycle_start(day(i * 28))).collect();
        let history = CycleHistory::reconstruct(&obs, 10);

        assert_eq!(history.cycles.len(), 4);
        assert_eq!(history.completed().count(), 3);
        assert!(history.excluded.is_empty());
        assert_eq!(history.cycles[0].length_days, Some(28));
        assert_eq!(history.cycles[0].end_date, Some(day(27)));
        assert_eq!(history.current().map(|c| c.start_date), Some(day(84)));
    }

    #[test]
    fn test_overlapping_start_most_recent_wins() {
        let early = Observation::cycle_start(day(0));
        let relogged = Observation::cycle_start(day(3))
            .recorded_at(early.recorded_at + Duration::days(5));
        let next = Observation::cycle_start(day(30));
        let obs = vec![early.clone(), relogged.clone(), next];

        let history = CycleHistory::reconstruct(&obs, 10);

        assert_eq!(history.cycles.len(), 2);
        assert_eq!(history.cycles[0].start_date, day(3));
        assert_eq!(history.cycles[0].length_days, Some(27));
        assert_eq!(history.excluded.len(), 1);
        assert_eq!(history.excluded[0].observation_id, early.id);
        assert_eq!(
            history.excluded[0].reason,
            ExclusionReason::OverlappingCycle { kept: relogged.id }
        );
    }

    #[test]
    fn test_overlap_resolution_is_order_independent() {
        let a = Observation::cycle_start(day(0));
        let b = Observation::cycle_start(day(2)).recorded_at(a.recorded_at - Duration::days(1));
        let forward = CycleHistory::reconstruct(&[a.clone(), b.clone()], 10);
        let backward = CycleHistory::reconstruct(&[b, a.clone()], 10);

        assert_eq!(forward, backward);
        assert_eq!(forward.cycles[0].start_observation, a.id);
    }

    #[test]
    fn test_same_day_starts_overlap_without_bound() {
        let first = Observation::cycle_start(day(0));
        let again = Observation::cycle_start(day(0)).recorded_at(first.recorded_at + Duration::hours(1));
        let obs = vec![first.clone(), again.clone(), Observation::cycle_start(day(28))];

        let history = CycleHistory::reconstruct(&obs, 0);

        assert_eq!(history.cycles.len(), 2);
        assert_eq!(history.cycles[0].start_observation, again.id);
        assert_eq!(history.cycles[0].length_days, Some(28));
        assert_eq!(history.cycles[0].end_date, Some(day(27)));
        assert!(history.completed().all(|c| c.length_days.is_some_and(|l| l > 0)));
        assert_eq!(history.excluded.len(), 1);
        assert_eq!(history.excluded[0].observation_id, first.id);
    }

    #[test]
    fn test_deserialized_severity_is_clamped() {
        let start = Observation::cycle_start(day(0));
        let mut json = serde_json::to_value(Observation::symptom(day(1), SymptomKind::Cramps, 5)).unwrap();
        json["kind"]["severity"] = serde_json::json!(200);
        let loud: Observation = serde_json::from_value(json).unwrap();
        assert!(matches!(loud.kind, ObservationKind::Symptom { severity: 200, .. }));

        let history = CycleHistory::reconstruct(&[start, loud], 10);
        assert_eq!(history.cycles[0].symptoms[0].severity, MAX_SEVERITY);
    }

    #[test]
    fn test_end_before_first_start_is_negative_length() {
        let stray_end = Observation::cycle_end(day(-4));
        let obs = vec![
            stray_end.clone(),
            Observation::cycle_start(day(0)),
            Observation::cycle_end(day(4)),
        ];
        let history = CycleHistory::reconstruct(&obs, 10);

        assert_eq!(history.cycles[0].period_end, Some(day(4)));
        assert_eq!(history.cycles[0].period_days(), Some(5));
        assert_eq!(history.excluded.len(), 1);
        assert_eq!(history.excluded[0].observation_id, stray_end.id);
        assert_eq!(history.excluded[0].reason, ExclusionReason::NegativeLength);
    }

    #[test]
    fn test_symptoms_attach_to_containing_cycle() {
        let obs = vec![
            Observation::cycle_start(day(0)),
            Observation::symptom(day(2), SymptomKind::Cramps, 6),
            Observation::cycle_start(day(28)),
            Observation::symptom(day(29), SymptomKind::Cramps, 4),
            Observation::symptom(day(-3), SymptomKind::Headache, 3),
        ];
        let history = CycleHistory::reconstruct(&obs, 10);

        assert_eq!(history.cycles[0].symptoms.len(), 1);
        assert_eq!(history.cycles[1].symptoms.len(), 1);
        assert_eq!(history.cycles[1].symptoms[0].severity, 4);
    }

    #[test]
    fn test_cycle_day() {
        let obs = vec![Observation::cycle_start(day(0)), Observation::cycle_start(day(28))];
        let history = CycleHistory::reconstruct(&obs, 10);
        let first = &history.cycles[0];

        assert_eq!(first.cycle_day(day(0)), Some(1));
        assert_eq!(first.cycle_day(day(27)), Some(28));
        assert_eq!(first.cycle_day(day(28)), None);
        assert_eq!(first.cycle_day(day(-1)), None);
    }
}
