//! Growth Pattern Analyzer CLI
//!
//! Cron-friendly entry point: each invocation performs exactly one action
//! (collect, import, or an analysis run) and exits with a code that names
//! the failure kind.

mod commands;
mod config;
mod output;

use analyzer_lib::{AnalysisError, Analyzer, RunMode};
use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use commands::{analysis, samples};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Growth Pattern Analyzer
#[derive(Parser)]
#[command(name = "growth-analyzer")]
#[command(author, version, about = "Forecasting and anomaly analysis for a memory store", long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["comprehensive", "metrics", "trends", "anomalies", "recommendations", "charts", "import"])
))]
pub struct Cli {
    /// Run every stage, persist results, write the report and charts
    #[arg(long)]
    pub comprehensive: bool,

    /// Collect one live sample into the metrics store
    #[arg(long)]
    pub metrics: bool,

    /// Forecast the configured target metrics
    #[arg(long, visible_alias = "predict")]
    pub trends: bool,

    /// Detect and categorise anomalies
    #[arg(long)]
    pub anomalies: bool,

    /// Score health and generate recommendations
    #[arg(long)]
    pub recommendations: bool,

    /// Write chart artifacts only
    #[arg(long)]
    pub charts: bool,

    /// Append samples from a JSON array file
    #[arg(long, value_name = "FILE")]
    pub import: Option<PathBuf>,

    /// Forecast horizon in days (overrides configuration)
    #[arg(long, value_name = "DAYS")]
    pub horizon: Option<usize>,

    /// Configuration file (defaults to ~/.config/growth-analyzer/config.json)
    #[arg(long, short, value_name = "PATH", env = "GROWTH_ANALYZER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,
}

/// The single action selected on the command line
enum Action {
    Run(RunMode),
    Collect,
    Import(PathBuf),
}

impl Cli {
    fn action(&self) -> Action {
        if let Some(path) = &self.import {
            Action::Import(path.clone())
        } else if self.metrics {
            Action::Collect
        } else if self.trends {
            Action::Run(RunMode::Trends)
        } else if self.anomalies {
            Action::Run(RunMode::Anomalies)
        } else if self.recommendations {
            Action::Run(RunMode::Recommendations)
        } else if self.charts {
            Action::Run(RunMode::Charts)
        } else {
            Action::Run(RunMode::Comprehensive)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries tables and JSON
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    if let Err(err) = execute(cli).await {
        let analysis_error = err.downcast_ref::<AnalysisError>();
        let kind = analysis_error.map(AnalysisError::kind).unwrap_or("internal");
        let code = analysis_error.map(AnalysisError::exit_code).unwrap_or(1);

        error!(event = "command_failed", kind = %kind, exit_code = code, error = %format!("{:#}", err), "Command failed");
        output::print_error(&format!("{:#}", err));
        std::process::exit(code);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = config::load(cli.config.as_deref())?;
    if let Some(horizon) = cli.horizon {
        config.prediction_horizon_days = horizon;
    }
    let analyzer = Analyzer::new(config).context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %analyzer.config().database_path.display(),
        "Starting growth-analyzer"
    );

    match cli.action() {
        Action::Run(mode) => analysis::run_analysis(&analyzer, mode, cli.format).await,
        Action::Collect => samples::collect_metrics(&analyzer, cli.format).await,
        Action::Import(path) => samples::import_samples(&analyzer, &path, cli.format).await,
    }
}
