//! # flowsense-sim
//!
//! Synthetic cycle histories with known ground truth, for exercising
//! `flowsense-core` end to end.
//!
//! - [`generator`] turns a [`CycleProfile`] and a seed into an observation stream.
//! - [`scenarios`] names the profiles (regular, irregular, outlier, pcos_like,
//!   endometriosis_like, sparse).
//! - [`backtest`] replays a history walk-forward, feeding realized starts back
//!   through the online learning controller, and reports forecast error.
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use flowsense_core::{CitationRegistry, EngineConfig};
//! use flowsense_sim::{Backtest, CycleGenerator, Scenario};
//!
//! let registry = CitationRegistry::bundled().unwrap();
//! let scenario = Scenario::Irregular;
//! let first = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
//! let history = CycleGenerator::new(42).generate(&scenario.profile(), first, 14);
//! let report = Backtest::new(EngineConfig::default(), &registry).run(scenario.name(), &history);
//! println!("MAE {:.2} days", report.ensemble.mean_absolute_error_days);
//! ```

pub mod backtest;
pub mod generator;
pub mod scenarios;

pub use backtest::{Backtest, BacktestReport, ErrorSummary};
pub use generator::{CycleGenerator, CycleProfile, SyntheticHistory};
pub use scenarios::{Scenario, list_scenarios};
