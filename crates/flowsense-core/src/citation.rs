//! Citation Registry
//!
//! Static evidence records keyed by topic category. The dataset is loaded and
//! validated once at startup; a malformed dataset, or one that leaves any
//! category of the topic taxonomy empty, is rejected before the engine serves
//! a single request. After install the registry is shared read-only by every
//! request thread.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::info;

/// Dataset compiled into the binary
pub const BUNDLED_DATASET: &str = include_str!("../data/citations.json");

const MIN_YEAR: u16 = 1900;
const MAX_YEAR: u16 = 2100;

static GLOBAL: OnceCell<CitationRegistry> = OnceCell::new();

/// Health-bearing topic categories of the insight taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    CyclePrediction,
    FertilityWindow,
    Ovulation,
    CycleIrregularity,
    Pcos,
    Endometriosis,
}

impl TopicCategory {
    pub const ALL: [TopicCategory; 6] = [
        Self::CyclePrediction,
        Self::FertilityWindow,
        Self::Ovulation,
        Self::CycleIrregularity,
        Self::Pcos,
        Self::Endometriosis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CyclePrediction => "cycle_prediction",
            Self::FertilityWindow => "fertility_window",
            Self::Ovulation => "ovulation",
            Self::CycleIrregularity => "cycle_irregularity",
            Self::Pcos => "pcos",
            Self::Endometriosis => "endometriosis",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    pub organization: String,
    pub title: String,
    pub year: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub category: TopicCategory,
}

#[derive(Debug, Deserialize)]
struct Dataset {
    version: u32,
    citations: Vec<CitationRecord>,
}

#[derive(Debug, Error)]
pub enum CitationError {
    #[error("citation dataset is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("citation dataset has no records for category {0}")]
    EmptyCategory(TopicCategory),

    #[error("citation record {index} is invalid: {reason}")]
    InvalidRecord { index: usize, reason: &'static str },

    #[error("a citation registry is already installed")]
    AlreadyInstalled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitationRegistry {
    version: u32,
    by_category: BTreeMap<TopicCategory, Vec<CitationRecord>>,
}

impl CitationRegistry {
    /// Parse and validate a dataset; fails on the first problem found
    pub fn load(json: &str) -> Result<Self, CitationError> {
        let dataset: Dataset = serde_json::from_str(json)?;
        for (index, record) in dataset.citations.iter().enumerate() {
            validate_record(record).map_err(|reason| CitationError::InvalidRecord { index, reason })?;
        }
        let registry = Self::from_records(dataset.version, dataset.citations);
        registry.validate()?;
        Ok(registry)
    }

    /// The dataset shipped with the crate
    pub fn bundled() -> Result<Self, CitationError> {
        Self::load(BUNDLED_DATASET)
    }

    /// Build without the completeness check. Records keep their input order per category.
    pub fn from_records(version: u32, records: Vec<CitationRecord>) -> Self {
        let mut by_category: BTreeMap<TopicCategory, Vec<CitationRecord>> = BTreeMap::new();
        for record in records {
            by_category.entry(record.category).or_default().push(record);
        }
        Self {
            version,
            by_category,
        }
    }

    /// Every taxonomy category must have at least one record
    pub fn validate(&self) -> Result<(), CitationError> {
        for category in TopicCategory::ALL {
            if self.lookup_topic(category).is_empty() {
                return Err(CitationError::EmptyCategory(category));
            }
        }
        Ok(())
    }

    /// Fails closed: an unrecognized category yields no citations
    pub fn lookup(&self, category: &str) -> &[CitationRecord] {
        match TopicCategory::parse(category) {
            Some(c) => self.lookup_topic(c),
            None => &[],
        }
    }

    pub fn lookup_topic(&self, category: TopicCategory) -> &[CitationRecord] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make `registry` the process-wide instance. Only the first call succeeds.
    pub fn install(registry: CitationRegistry) -> Result<&'static CitationRegistry, CitationError> {
        let mut installed = false;
        let global = GLOBAL.get_or_init(|| {
            installed = true;
            registry
        });
        if !installed {
            return Err(CitationError::AlreadyInstalled);
        }
        info!(
            version = global.version,
            records = global.len(),
            "Citation registry installed"
        );
        Ok(global)
    }

    /// Install the bundled dataset unless a registry is already present
    pub fn install_bundled() -> Result<&'static CitationRegistry, CitationError> {
        if let Some(existing) = GLOBAL.get() {
            return Ok(existing);
        }
        match Self::install(Self::bundled()?) {
            Err(CitationError::AlreadyInstalled) => Self::global().ok_or(CitationError::AlreadyInstalled),
            other => other,
        }
    }

    pub fn global() -> Option<&'static CitationRegistry> {
        GLOBAL.get()
    }
}

fn validate_record(record: &CitationRecord) -> Result<(), &'static str> {
    if record.organization.trim().is_empty() {
        return Err("organization is empty");
    }
    if record.title.trim().is_empty() {
        return Err("title is empty");
    }
    if !(MIN_YEAR..=MAX_YEAR).contains(&record.year) {
        return Err("year out of range");
    }
    let has_link = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !has_link(&record.doi) && !has_link(&record.url) {
        return Err("neither doi nor url present");
    }
    Ok(())
}
