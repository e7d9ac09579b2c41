//! Process-wide counters
//!
//! Counters live in a crate-owned registry so embedding services can expose
//! them next to their own without name clashes in the default registry.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).expect("metric name and help are valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric registered once");
    c
}

pub static FORECASTS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("flowsense_forecasts_total", "Total forecasts produced"));

pub static INSUFFICIENT_DATA_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "flowsense_insufficient_data_total",
        "Forecasts produced without usable cycle history",
    )
});

pub static MISSING_CITATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "flowsense_missing_citations_total",
        "Insights omitted because their topic had no citations",
    )
});

pub static CALIBRATION_RESETS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "flowsense_calibration_resets_total",
        "Calibration states reset after a feature schema change",
    )
});

pub static OUTCOMES_RECORDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "flowsense_outcomes_recorded_total",
        "Realized outcomes applied to calibration state",
    )
});

pub static MALFORMED_RECORDS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "flowsense_malformed_records_total",
        "Observations excluded from cycle reconstruction",
    )
});

/// Text exposition of every counter
pub fn gather_text() -> String {
    // Touch every counter so it is exported even before first use
    let _ = (
        FORECASTS_TOTAL.get(),
        INSUFFICIENT_DATA_TOTAL.get(),
        MISSING_CITATIONS_TOTAL.get(),
        CALIBRATION_RESETS_TOTAL.get(),
        OUTCOMES_RECORDED_TOTAL.get(),
        MALFORMED_RECORDS_TOTAL.get(),
    );

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
