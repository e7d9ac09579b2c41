//! flowsense-sim - synthetic histories and backtests
//!
//! Usage:
//!   flowsense-sim report --scenario pcos_like --seed 7
//!   flowsense-sim backtest --scenario all --cycles 24
//!   flowsense-sim list

use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use flowsense_core::estimator::EstimatorId;
use flowsense_core::{CitationRegistry, EngineConfig, ForecastEngine, UserCalibrationState, UserId};
use flowsense_sim::{Backtest, CycleGenerator, Scenario, list_scenarios};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowsense-sim")]
#[command(about = "Synthetic cycle histories and walk-forward backtests for the forecasting engine")]
struct Cli {
    /// Engine configuration file (TOML, YAML or JSON); environment overrides still apply
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the insight report for one synthetic user
    Report {
        #[arg(short, long, default_value = "regular")]
        scenario: String,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Completed cycles to generate (scenario default when omitted)
        #[arg(long)]
        cycles: Option<usize>,

        /// Days after the latest start to analyze at
        #[arg(long, default_value = "1")]
        day: i64,

        #[arg(short, long, default_value = "pretty")]
        format: OutputFormat,
    },

    /// Walk-forward backtest of next-start forecasts
    Backtest {
        /// Scenario name, or "all"
        #[arg(short, long, default_value = "all")]
        scenario: String,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "24")]
        cycles: usize,

        #[arg(short, long, default_value = "pretty")]
        format: OutputFormat,
    },

    /// List available scenarios
    List,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match EngineConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Invalid engine configuration");
            return ExitCode::FAILURE;
        }
    };
    let registry = match CitationRegistry::install_bundled() {
        Ok(registry) => registry,
        Err(err) => {
            error!(error = %err, "Citation dataset rejected");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Report {
            scenario,
            seed,
            cycles,
            day,
            format,
        } => run_report(config, registry, &scenario, seed, cycles, day, format),
        Commands::Backtest {
            scenario,
            seed,
            cycles,
            format,
        } => run_backtest(config, registry, &scenario, seed, cycles, format),
        Commands::List => {
            run_list();
            ExitCode::SUCCESS
        }
    }
}

fn first_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap_or_default()
}

fn parse_scenario(name: &str) -> Option<Scenario> {
    let scenario = Scenario::parse(name);
    if scenario.is_none() {
        error!(scenario = name, "Unknown scenario (see `flowsense-sim list`)");
    }
    scenario
}

fn run_report(
    config: EngineConfig,
    registry: &CitationRegistry,
    scenario: &str,
    seed: u64,
    cycles: Option<usize>,
    day: i64,
    format: OutputFormat,
) -> ExitCode {
    let Some(scenario) = parse_scenario(scenario) else {
        return ExitCode::FAILURE;
    };
    let cycles = cycles.unwrap_or_else(|| scenario.default_cycles());
    let history = CycleGenerator::new(seed).generate(&scenario.profile(), first_start(), cycles);
    let last = history.starts.last().copied().unwrap_or_else(first_start);
    let as_of = last + Duration::days(day.max(0));

    let engine = ForecastEngine::new(config, registry);
    let report = engine.analyze(
        &history.visible(as_of),
        &UserCalibrationState::new(UserId::new()),
        as_of,
    );
    info!(scenario = %scenario, seed, cycles, as_of = %as_of, "Report generated");

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "Failed to encode report");
                return ExitCode::FAILURE;
            }
        },
        OutputFormat::Pretty => {
            println!("Scenario {scenario} (seed {seed}), as of {as_of}");
            println!("History lengths: {:?}", history.lengths());
            if let Some(phase) = report.phase {
                println!("Phase: {} (cycle day {})", phase.phase, phase.cycle_day);
            }
            println!();
            for forecast in &report.forecasts {
                println!(
                    "{:<22} {}  [{} .. {}]  confidence {:.2}",
                    forecast.target_event.name(),
                    forecast.point_estimate,
                    forecast.confidence_interval.lower,
                    forecast.confidence_interval.upper,
                    forecast.confidence_score
                );
            }
            println!();
            for flag in &report.flags {
                let marker = if flag.threshold_crossed() { " [FLAG]" } else { "" };
                println!(
                    "{:<22} score {:.2} / threshold {:.2}{}",
                    flag.category().name(),
                    flag.score(),
                    flag.threshold(),
                    marker
                );
            }
            println!();
            for insight in &report.insights {
                println!("- {}", insight.explanation());
                for citation in insight.citations() {
                    println!("    {} ({}) {}", citation.organization, citation.year, citation.title);
                }
            }
            for missing in &report.missing_citations {
                println!("! {missing}");
            }
        }
    }
    ExitCode::SUCCESS
}

fn run_backtest(
    config: EngineConfig,
    registry: &CitationRegistry,
    scenario: &str,
    seed: u64,
    cycles: usize,
    format: OutputFormat,
) -> ExitCode {
    let scenarios: Vec<Scenario> = if scenario.eq_ignore_ascii_case("all") {
        Scenario::ALL.to_vec()
    } else {
        match parse_scenario(scenario) {
            Some(s) => vec![s],
            None => return ExitCode::FAILURE,
        }
    };

    let backtest = Backtest::new(config, registry);
    let reports: Vec<_> = scenarios
        .iter()
        .map(|s| {
            let history = CycleGenerator::new(seed).generate(&s.profile(), first_start(), cycles);
            backtest.run(s.name(), &history)
        })
        .collect();

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "Failed to encode backtest");
                return ExitCode::FAILURE;
            }
        },
        OutputFormat::Pretty => {
            println!(
                "{:<20} {:>6} {:>9} {:>9} {:>9} {:>9} {:>9} {:>7}",
                "scenario", "steps", "ensemble", "stat", "tree", "sequence", "coverage", "width"
            );
            for report in &reports {
                let mae = |id| {
                    report
                        .estimators
                        .get(&id)
                        .map(|e| format!("{:.2}", e.mean_absolute_error_days))
                        .unwrap_or_else(|| "-".to_string())
                };
                println!(
                    "{:<20} {:>6} {:>9.2} {:>9} {:>9} {:>9} {:>8.0}% {:>7.1}",
                    report.scenario,
                    report.ensemble.forecasts,
                    report.ensemble.mean_absolute_error_days,
                    mae(EstimatorId::Statistical),
                    mae(EstimatorId::TreeEnsemble),
                    mae(EstimatorId::Sequence),
                    report.interval_coverage * 100.0,
                    report.mean_interval_width_days
                );
            }
        }
    }
    ExitCode::SUCCESS
}

fn run_list() {
    println!("Available scenarios:");
    for (name, description) in list_scenarios() {
        println!("  {name:<20} {description}");
    }
    println!("\nUsage: flowsense-sim report --scenario <SCENARIO> [--seed N]");
}
