//! Insight Composer
//!
//! Binds forecasts and pattern flags to citations and fixed explanation
//! templates. An [`Insight`] for a health-bearing topic cannot be constructed
//! without at least one citation, so an uncited insight can never reach the
//! presentation layer: the composer omits it and reports the omission.

use crate::citation::{CitationRecord, CitationRegistry, TopicCategory};
use crate::detector::{PatternCategory, PatternFlag};
use crate::metrics;
use crate::predictor::{Forecast, TargetEvent};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    CyclePrediction,
    FertilityWindow,
    Ovulation,
    CycleIrregularity,
    Pcos,
    Endometriosis,
    /// Notes about the user's own data, carrying no medical claim
    DataQuality,
}

impl Topic {
    /// Citation category backing this topic; `None` for topics without medical content
    pub fn category(&self) -> Option<TopicCategory> {
        match self {
            Self::CyclePrediction => Some(TopicCategory::CyclePrediction),
            Self::FertilityWindow => Some(TopicCategory::FertilityWindow),
            Self::Ovulation => Some(TopicCategory::Ovulation),
            Self::CycleIrregularity => Some(TopicCategory::CycleIrregularity),
            Self::Pcos => Some(TopicCategory::Pcos),
            Self::Endometriosis => Some(TopicCategory::Endometriosis),
            Self::DataQuality => None,
        }
    }

    pub fn is_health_bearing(&self) -> bool {
        self.category().is_some()
    }

    pub fn for_target(target: TargetEvent) -> Self {
        match target {
            TargetEvent::NextCycleStart => Self::CyclePrediction,
            TargetEvent::FertileWindowStart | TargetEvent::FertileWindowEnd => {
                Self::FertilityWindow
            }
            TargetEvent::OvulationEstimate => Self::Ovulation,
        }
    }

    pub fn for_pattern(category: PatternCategory) -> Option<Self> {
        match category {
            PatternCategory::Irregularity => Some(Self::CycleIrregularity),
            PatternCategory::PcosPattern => Some(Self::Pcos),
            PatternCategory::EndometriosisPattern => Some(Self::Endometriosis),
            PatternCategory::None => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.category() {
            Some(category) => category.as_str(),
            None => "data_quality",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The output an insight explains
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Evidence {
    Forecast(Forecast),
    Flag(PatternFlag),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsightError {
    #[error("no citations registered for health-bearing topic {topic}")]
    MissingCitation { topic: Topic },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    topic: Topic,
    evidence: Evidence,
    explanation: String,
    citations: Vec<CitationRecord>,
}

impl Insight {
    /// Fails for a health-bearing topic without citations
    pub fn new(
        topic: Topic,
        evidence: Evidence,
        explanation: String,
        citations: Vec<CitationRecord>,
    ) -> Result<Self, InsightError> {
        if topic.is_health_bearing() && citations.is_empty() {
            return Err(InsightError::MissingCitation { topic });
        }
        Ok(Self {
            topic,
            evidence,
            explanation,
            citations,
        })
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn citations(&self) -> &[CitationRecord] {
        &self.citations
    }
}

/// Insights that could be emitted plus every topic that had to be omitted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composition {
    pub insights: Vec<Insight>,
    pub missing_citations: Vec<InsightError>,
}

impl Composition {
    pub fn is_complete(&self) -> bool {
        self.missing_citations.is_empty()
    }

    /// First omission as an error, otherwise the insights
    pub fn into_result(self) -> Result<Vec<Insight>, InsightError> {
        match self.missing_citations.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.insights),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsightComposer;

impl InsightComposer {
    pub fn new() -> Self {
        Self
    }

    /// One insight per forecast and per crossed flag, in input order
    pub fn compose(
        &self,
        forecasts: &[Forecast],
        flags: &[PatternFlag],
        registry: &CitationRegistry,
    ) -> Composition {
        let mut composition = Composition::default();

        if let Some(forecast) = forecasts
            .iter()
            .find(|f| f.target_event == TargetEvent::NextCycleStart && !f.sufficiency)
        {
            push(
                &mut composition,
                Topic::DataQuality,
                Evidence::Forecast(forecast.clone()),
                data_quality_text(forecast),
                registry,
            );
        }

        for forecast in forecasts {
            push(
                &mut composition,
                Topic::for_target(forecast.target_event),
                Evidence::Forecast(forecast.clone()),
                forecast_text(forecast),
                registry,
            );
        }

        for flag in flags.iter().filter(|f| f.threshold_crossed()) {
            let Some(topic) = Topic::for_pattern(flag.category()) else {
                continue;
            };
            push(
                &mut composition,
                topic,
                Evidence::Flag(*flag),
                flag_text(flag),
                registry,
            );
        }

        composition
    }

    /// Like [`compose`](Self::compose) but any omitted insight fails the whole call
    pub fn compose_strict(
        &self,
        forecasts: &[Forecast],
        flags: &[PatternFlag],
        registry: &CitationRegistry,
    ) -> Result<Vec<Insight>, InsightError> {
        self.compose(forecasts, flags, registry).into_result()
    }
}

fn push(
    composition: &mut Composition,
    topic: Topic,
    evidence: Evidence,
    explanation: String,
    registry: &CitationRegistry,
) {
    let citations = topic
        .category()
        .map(|c| registry.lookup_topic(c).to_vec())
        .unwrap_or_default();

    match Insight::new(topic, evidence, explanation, citations) {
        Ok(insight) => composition.insights.push(insight),
        Err(err) => {
            error!(topic = %topic, "Omitting insight without citations");
            metrics::MISSING_CITATIONS_TOTAL.inc();
            if !composition.missing_citations.contains(&err) {
                composition.missing_citations.push(err);
            }
        }
    }
}

fn forecast_text(forecast: &Forecast) -> String {
    let point = forecast.point_estimate.format("%Y-%m-%d");
    let lower = forecast.confidence_interval.lower.format("%Y-%m-%d");
    let upper = forecast.confidence_interval.upper.format("%Y-%m-%d");
    let confidence = (forecast.confidence_score * 100.0).round();
    match forecast.target_event {
        TargetEvent::NextCycleStart => format!(
            "Your next period is estimated to start on {point} (likely between {lower} and {upper}; confidence {confidence}%)."
        ),
        TargetEvent::FertileWindowStart => format!(
            "Your fertile window is estimated to open on {point} (likely between {lower} and {upper}; confidence {confidence}%)."
        ),
        TargetEvent::FertileWindowEnd => format!(
            "Your fertile window is estimated to close on {point} (likely between {lower} and {upper}; confidence {confidence}%)."
        ),
        TargetEvent::OvulationEstimate => format!(
            "Ovulation is estimated around {point} (likely between {lower} and {upper}; confidence {confidence}%)."
        ),
    }
}

fn flag_text(flag: &PatternFlag) -> String {
    let score = (flag.score() * 100.0).round();
    match flag.category() {
        PatternCategory::Irregularity => format!(
            "Your recent cycle lengths vary more than usual (pattern score {score}%). This is not a diagnosis; consider discussing it with a clinician."
        ),
        PatternCategory::PcosPattern => format!(
            "Your logged cycles and symptoms resemble a pattern sometimes associated with PCOS (pattern score {score}%). This is not a diagnosis; consider discussing it with a clinician."
        ),
        PatternCategory::EndometriosisPattern => format!(
            "Your logged pain and cycle changes resemble a pattern sometimes associated with endometriosis (pattern score {score}%). This is not a diagnosis; consider discussing it with a clinician."
        ),
        PatternCategory::None => format!("No pattern detected (pattern score {score}%)."),
    }
}

fn data_quality_text(forecast: &Forecast) -> String {
    let width = forecast.confidence_interval.width_days();
    format!(
        "Log at least one complete cycle to personalize predictions. Until then estimates use a {width}-day range."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::ConfidenceInterval;
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, BTreeSet};

    fn forecast(target: TargetEvent, sufficiency: bool) -> Forecast {
        let point = NaiveDate::from_ymd_opt(2024, 5, 20).unwrap();
        Forecast {
            target_event: target,
            point_estimate: point,
            confidence_interval: ConfidenceInterval::around(point, 2),
            confidence_score: 0.82,
            contributing_estimators: BTreeSet::new(),
            estimator_estimates: BTreeMap::new(),
            sufficiency,
            as_of: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        }
    }

    fn registry_without(category: TopicCategory) -> CitationRegistry {
        let bundled = CitationRegistry::bundled().unwrap();
        let records = TopicCategory::ALL
            .into_iter()
            .filter(|c| *c != category)
            .flat_map(|c| bundled.lookup_topic(c).to_vec())
            .collect();
        CitationRegistry::from_records(1, records)
    }

    #[test]
    fn test_health_bearing_insight_requires_citation() {
        let result = Insight::new(
            Topic::Pcos,
            Evidence::Flag(PatternFlag::evaluate(PatternCategory::PcosPattern, 0.8, 0.7)),
            "text".to_string(),
            Vec::new(),
        );
        assert_eq!(
            result.unwrap_err(),
            InsightError::MissingCitation { topic: Topic::Pcos }
        );
    }

    #[test]
    fn test_data_quality_needs_no_citation() {
        let insight = Insight::new(
            Topic::DataQuality,
            Evidence::Forecast(forecast(TargetEvent::NextCycleStart, false)),
            "text".to_string(),
            Vec::new(),
        );
        assert!(insight.is_ok());
    }

    #[test]
    fn test_compose_attaches_citations() {
        let registry = CitationRegistry::bundled().unwrap();
        let forecasts: Vec<Forecast> = TargetEvent::ALL.iter().map(|t| forecast(*t, true)).collect();
        let composition = InsightComposer::new().compose(&forecasts, &[], &registry);

        assert!(composition.is_complete());
        assert_eq!(composition.insights.len(), 4);
        for insight in &composition.insights {
            assert!(!insight.citations().is_empty());
        }
        assert!(composition.insights[0].explanation().contains("2024-05-20"));
        assert!(composition.insights[0].explanation().contains("82%"));
    }

    #[test]
    fn test_missing_fertility_citations_omit_insight() {
        let registry = registry_without(TopicCategory::FertilityWindow);
        let forecasts: Vec<Forecast> = TargetEvent::ALL.iter().map(|t| forecast(*t, true)).collect();
        let composition = InsightComposer::new().compose(&forecasts, &[], &registry);

        assert_eq!(composition.insights.len(), 2);
        assert!(
            composition
                .insights
                .iter()
                .all(|i| i.topic() != Topic::FertilityWindow)
        );
        assert_eq!(
            composition.missing_citations,
            vec![InsightError::MissingCitation {
                topic: Topic::FertilityWindow
            }]
        );

        let strict = InsightComposer::new().compose_strict(&forecasts, &[], &registry);
        assert!(matches!(
            strict,
            Err(InsightError::MissingCitation {
                topic: Topic::FertilityWindow
            })
        ));
    }

    #[test]
    fn test_only_crossed_flags_become_insights() {
        let registry = CitationRegistry::bundled().unwrap();
        let flags = [
            PatternFlag::evaluate(PatternCategory::Irregularity, 0.9, 0.6),
            PatternFlag::evaluate(PatternCategory::PcosPattern, 0.2, 0.7),
            PatternFlag::evaluate(PatternCategory::None, 0.0, 1.0),
        ];
        let composition = InsightComposer::new().compose(&[], &flags, &registry);

        assert_eq!(composition.insights.len(), 1);
        assert_eq!(composition.insights[0].topic(), Topic::CycleIrregularity);
        assert!(composition.insights[0].explanation().contains("not a diagnosis"));
    }

    #[test]
    fn test_insufficient_history_adds_data_quality_note() {
        let registry = CitationRegistry::bundled().unwrap();
        let composition = InsightComposer::new().compose(
            &[forecast(TargetEvent::NextCycleStart, false)],
            &[],
            &registry,
        );
        assert_eq!(composition.insights[0].topic(), Topic::DataQuality);
        assert!(composition.insights[0].citations().is_empty());
        assert_eq!(composition.insights[1].topic(), Topic::CyclePrediction);
    }
}
