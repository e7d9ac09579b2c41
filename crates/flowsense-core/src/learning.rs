//! Online Learning Controller
//!
//! The only writer of [`UserCalibrationState`]. Each realized outcome nudges
//! the per-estimator error trackers (and therefore the ensemble weights), the
//! cycle-length bias and the interval inflation. Smoothing follows the same
//! half-life family as the feature extractor's recency weighting, decayed by
//! the days elapsed since the previous outcome.
//!
//! Outcomes can also be queued on an [`OutcomeChannel`] and applied by a
//! [`CalibrationWorker`] thread, so forecast requests never wait on
//! calibration writes. A forecast may therefore read state that is one update
//! behind.

use crate::algo::smoothing_factor;
use crate::calibration::UserCalibrationState;
use crate::config::EngineConfig;
use crate::metrics;
use crate::observation::UserId;
use crate::predictor::{Forecast, TargetEvent};
use crate::store::{CalibrationStore, StoreError};
use chrono::NaiveDate;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tracing::{debug, info, warn};

const INFLATION_GROWTH: f64 = 1.1;
const INFLATION_DECAY: f64 = 0.97;

#[derive(Debug, Clone)]
pub struct OnlineLearningController {
    half_life_days: f64,
    first_interval_days: f64,
}

impl OnlineLearningController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            half_life_days: config.recency_half_life_days,
            first_interval_days: config.population_median_cycle_days as f64,
        }
    }

    /// Apply one realized outcome and return the updated state
    pub fn record_outcome(
        &self,
        predicted: &Forecast,
        actual: NaiveDate,
        state: &UserCalibrationState,
    ) -> UserCalibrationState {
        let mut next = state.clone();

        let elapsed = state
            .last_outcome()
            .map(|last| (actual - last).num_days().max(1) as f64)
            .unwrap_or(self.first_interval_days);
        let alpha = smoothing_factor(elapsed, self.half_life_days);

        for (id, date) in &predicted.estimator_estimates {
            let abs_error = (actual - *date).num_days().abs() as f64;
            next.record_estimator_error(*id, abs_error, alpha);
        }

        if predicted.sufficiency && predicted.target_event == TargetEvent::NextCycleStart {
            let signed_error = (actual - predicted.point_estimate).num_days() as f64;
            next.record_bias(signed_error, alpha);
            if predicted.confidence_interval.contains(actual) {
                next.scale_inflation(INFLATION_DECAY);
            } else {
                next.scale_inflation(INFLATION_GROWTH);
            }
        }

        next.mark_outcome(actual);
        metrics::OUTCOMES_RECORDED_TOTAL.inc();
        debug!(
            user = %state.user_id(),
            target = %predicted.target_event,
            alpha,
            bias = next.cycle_length_bias(),
            inflation = next.variance_inflation(),
            "Recorded outcome"
        );
        next
    }
}

/// A realized event queued for calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub user_id: UserId,
    pub forecast: Forecast,
    pub actual: NaiveDate,
}

#[derive(Debug, Default)]
pub struct OutcomeStats {
    pub received: AtomicU64,
    pub applied: AtomicU64,
    pub dropped: AtomicU64,
    pub failed: AtomicU64,
}

impl OutcomeStats {
    pub fn snapshot(&self) -> OutcomeStatsSnapshot {
        OutcomeStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeStatsSnapshot {
    pub received: u64,
    pub applied: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Bounded queue between request handlers and the calibration worker
pub struct OutcomeChannel;

impl OutcomeChannel {
    pub fn new(capacity: usize) -> (OutcomeSender, OutcomeReceiver) {
        let (sender, receiver) = bounded(capacity);
        let stats = Arc::new(OutcomeStats::default());
        (
            OutcomeSender {
                sender,
                stats: Arc::clone(&stats),
            },
            OutcomeReceiver { receiver, stats },
        )
    }
}

/// Cloneable, non-blocking producer handle
#[derive(Clone)]
pub struct OutcomeSender {
    sender: Sender<OutcomeEvent>,
    stats: Arc<OutcomeStats>,
}

impl OutcomeSender {
    /// Never blocks; a full or closed queue hands the event back
    pub fn send(&self, event: OutcomeEvent) -> Result<(), OutcomeEvent> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(e)) | Err(TrySendError::Disconnected(e)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> OutcomeStatsSnapshot {
        self.stats.snapshot()
    }
}

pub struct OutcomeReceiver {
    receiver: Receiver<OutcomeEvent>,
    stats: Arc<OutcomeStats>,
}

impl OutcomeReceiver {
    /// Drain pending events without blocking
    pub fn drain(&self) -> Vec<OutcomeEvent> {
        self.receiver.try_iter().collect()
    }

    pub fn stats(&self) -> OutcomeStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Single consumer thread; applying outcomes in queue order keeps at most one
/// calibration write in flight per user
pub struct CalibrationWorker;

impl CalibrationWorker {
    /// Runs until every sender is dropped; the handle yields the number of applied outcomes
    pub fn spawn(
        receiver: OutcomeReceiver,
        store: Arc<dyn CalibrationStore>,
        controller: OnlineLearningController,
    ) -> io::Result<thread::JoinHandle<u64>> {
        thread::Builder::new()
            .name("flowsense-calibration".to_string())
            .spawn(move || {
                info!("Calibration worker active");
                let mut applied = 0u64;
                for event in receiver.receiver.iter() {
                    match apply(&*store, &controller, &event) {
                        Ok(()) => {
                            applied += 1;
                            receiver.stats.applied.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            receiver.stats.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(user = %event.user_id, error = %err, "Failed to apply outcome");
                        }
                    }
                }
                info!(applied, "Calibration worker stopped");
                applied
            })
    }
}

/// Read-modify-write of one user's calibration state
pub fn apply(
    store: &dyn CalibrationStore,
    controller: &OnlineLearningController,
    event: &OutcomeEvent,
) -> Result<(), StoreError> {
    let state = store.get_or_default(event.user_id)?.reconcile();
    let updated = controller.record_outcome(&event.forecast, event.actual, &state);
    store.put(&updated)
}
