use chrono::{Duration, NaiveDate};
use flowsense_core::citation::CitationRegistry;
use flowsense_core::config::EngineConfig;
use flowsense_core::features::FeatureKey;
use flowsense_core::insight::InsightError;
use flowsense_core::learning::{CalibrationWorker, OnlineLearningController, OutcomeChannel, OutcomeEvent};
use flowsense_core::store::{CalibrationStore, InMemoryStore};
use flowsense_core::{
    ForecastEngine, Observation, PatternCategory, TargetEvent, Topic, TopicCategory,
    UserCalibrationState, UserId,
};
use std::sync::Arc;

fn origin() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 9).unwrap()
}

fn starts(lengths: &[i64]) -> (Vec<Observation>, NaiveDate) {
    let mut date = origin();
    let mut obs = vec![Observation::cycle_start(date)];
    for len in lengths {
        date += Duration::days(*len);
        obs.push(Observation::cycle_start(date));
    }
    (obs, date)
}

fn fresh() -> UserCalibrationState {
    UserCalibrationState::new(UserId::new())
}

#[test]
fn test_regular_twelve_cycles() {
    let registry = CitationRegistry::bundled().unwrap();
    let engine = ForecastEngine::new(EngineConfig::default(), &registry);
    let (obs, last) = starts(&[28; 12]);

    let report = engine.analyze(&obs, &fresh(), last + Duration::days(1));
    let next = report.forecast(TargetEvent::NextCycleStart).unwrap();

    assert!(next.sufficiency);
    assert!(next.confidence_score >= 0.9, "{}", next.confidence_score);
    let error = (next.point_estimate - (last + Duration::days(28))).num_days().abs();
    assert!(error <= 1);
    assert!(report.flags.iter().all(|f| !f.threshold_crossed()));
}

#[test]
fn test_single_long_cycle_among_regular() {
    let mut lengths = [28i64; 12];
    lengths[5] = 35;
    let registry = CitationRegistry::bundled().unwrap();
    let engine = ForecastEngine::new(EngineConfig::default(), &registry);
    let (obs, last) = starts(&lengths);
    let as_of = last + Duration::days(1);

    let features = engine.features(&obs, as_of);
    assert_eq!(features.get(FeatureKey::OutlierCount), Some(1.0));
    assert_eq!(features.get(FeatureKey::CycleLengthMean(12)), Some(28.0));
    assert!(features.get(FeatureKey::IrregularityScore).unwrap() > 0.0);

    let report = engine.analyze(&obs, &fresh(), as_of);
    let irregularity = report
        .flags
        .iter()
        .find(|f| f.category() == PatternCategory::Irregularity)
        .unwrap();
    assert!(!irregularity.threshold_crossed());
    assert!(irregularity.score() > 0.0);

    let next = report.forecast(TargetEvent::NextCycleStart).unwrap();
    assert_eq!(next.point_estimate, last + Duration::days(28));
}

#[test]
fn test_zero_observations() {
    let registry = CitationRegistry::bundled().unwrap();
    let engine = ForecastEngine::new(EngineConfig::default(), &registry);
    let today = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

    let report = engine.analyze(&[], &fresh(), today);
    assert!(!report.sufficiency);
    assert!(report.phase.is_none());
    for forecast in &report.forecasts {
        assert!(!forecast.sufficiency);
        assert_eq!(forecast.confidence_score, 0.05);
        assert_eq!(forecast.confidence_interval.width_days(), 14);
    }
    let next = report.forecast(TargetEvent::NextCycleStart).unwrap();
    assert_eq!(next.point_estimate, today + Duration::days(28));

    assert_eq!(report.flags.len(), 1);
    assert_eq!(report.flags[0].category(), PatternCategory::None);
    assert_eq!(report.insights[0].topic(), Topic::DataQuality);
}

#[test]
fn test_registry_without_fertility_window() {
    let bundled = CitationRegistry::bundled().unwrap();
    let records = TopicCategory::ALL
        .into_iter()
        .filter(|c| *c != TopicCategory::FertilityWindow)
        .flat_map(|c| bundled.lookup_topic(c).to_vec())
        .collect();
    let registry = CitationRegistry::from_records(bundled.version(), records);
    assert!(registry.validate().is_err());

    let engine = ForecastEngine::new(EngineConfig::default(), &registry);
    let (obs, last) = starts(&[28; 6]);
    let report = engine.analyze(&obs, &fresh(), last + Duration::days(1));

    assert_eq!(
        report.missing_citations,
        vec![InsightError::MissingCitation {
            topic: Topic::FertilityWindow
        }]
    );
    assert!(report.insights.iter().all(|i| i.topic() != Topic::FertilityWindow));
    assert!(report.insights.iter().all(|i| !i.citations().is_empty()));
    assert!(report.insights.iter().any(|i| i.topic() == Topic::CyclePrediction));
}

#[test]
fn test_malformed_history_is_reported_not_fatal() {
    let registry = CitationRegistry::bundled().unwrap();
    let engine = ForecastEngine::new(EngineConfig::default(), &registry);
    let (mut obs, last) = starts(&[28; 6]);
    // Duplicate start three days after a real one
    obs.push(Observation::cycle_start(origin() + Duration::days(31)));

    let report = engine.analyze(&obs, &fresh(), last + Duration::days(1));
    assert_eq!(report.excluded_records.len(), 1);
    assert!(report.sufficiency);
}

#[test]
fn test_outcomes_applied_by_worker_shift_next_forecast() {
    let config = EngineConfig::default();
    let registry = CitationRegistry::bundled().unwrap();
    let engine = ForecastEngine::new(config.clone(), &registry);
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::new();

    let (obs, last) = starts(&[28; 8]);
    store.extend(user, obs.clone()).unwrap();
    let as_of = last + Duration::days(1);
    let before = engine.analyze_user(&*store, &*store, user, as_of).unwrap();
    let baseline = before.forecast(TargetEvent::NextCycleStart).unwrap().clone();

    let (sender, receiver) = OutcomeChannel::new(8);
    let worker = CalibrationWorker::spawn(
        receiver,
        store.clone(),
        OnlineLearningController::new(&config),
    )
    .unwrap();

    // Periods keep arriving four days after the forecast
    for i in 0..3 {
        let actual = baseline.point_estimate + Duration::days(4 + 28 * i);
        sender
            .send(OutcomeEvent {
                user_id: user,
                forecast: baseline.clone(),
                actual,
            })
            .unwrap();
    }
    drop(sender);
    assert_eq!(worker.join().unwrap(), 3);

    let state = store.get(user).unwrap().unwrap();
    assert_eq!(state.outcomes_recorded(), 3);
    assert!(state.cycle_length_bias() > 1.0);
    assert!(state.variance_inflation() > 1.0);

    let after = engine.analyze_user(&*store, &*store, user, as_of).unwrap();
    let shifted = after.forecast(TargetEvent::NextCycleStart).unwrap();
    assert!(shifted.point_estimate > baseline.point_estimate);
    assert!(shifted.confidence_interval.width_days() >= baseline.confidence_interval.width_days());
}
