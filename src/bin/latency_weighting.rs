//! Latency Weighting Analysis
//!
//! Quantifies how update latency degrades short-horizon price accuracy and
//! derives a per exchange/feed decay weight and skip threshold.
//!
//! Usage:
//!   latency_weighting --input logs/gate_activity.csv --output-summary out/summary.csv
//!   latency_weighting --config analysis.toml --min-samples 500
//!
//! Flags override values from `--config`, which override built-in defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use latency_weighting::{run_analysis, AnalysisConfig};

#[derive(Parser, Debug)]
#[command(name = "latency_weighting")]
#[command(about = "Quantify latency effects and derive weighting heuristics")]
struct Args {
    /// TOML file with an analysis config
    #[arg(long, env = "LATENCY_WEIGHTING_CONFIG")]
    config: Option<PathBuf>,

    /// CSV activity log (default: logs/gate_activity.csv)
    #[arg(long, env = "LATENCY_WEIGHTING_INPUT")]
    input: Option<PathBuf>,

    /// Optional row limit for faster iteration
    #[arg(long)]
    limit: Option<usize>,

    /// Max horizon (ms) for the next update used as ground truth
    #[arg(long)]
    horizon_ms: Option<f64>,

    /// Minimum samples per exchange/feed required for heuristics
    #[arg(long)]
    min_samples: Option<usize>,

    /// Slow/fast error ratio at or above which a skip threshold is recommended
    #[arg(long)]
    skip_ratio: Option<f64>,

    /// Write the per-exchange summary CSV here
    #[arg(long)]
    output_summary: Option<PathBuf>,

    /// Write the regression coefficients CSV here
    #[arg(long)]
    output_regression: Option<PathBuf>,

    /// Write the full run report as JSON here
    #[arg(long)]
    output_report: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_toml_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => AnalysisConfig::default(),
        };
        if let Some(input) = self.input {
            config.input = input;
        }
        if self.limit.is_some() {
            config.limit = self.limit;
        }
        if let Some(horizon_ms) = self.horizon_ms {
            config.horizon_ms = horizon_ms;
        }
        if let Some(min_samples) = self.min_samples {
            config.min_samples = min_samples;
        }
        if let Some(skip_ratio) = self.skip_ratio {
            config.skip_ratio = skip_ratio;
        }
        if self.output_summary.is_some() {
            config.output_summary = self.output_summary;
        }
        if self.output_regression.is_some() {
            config.output_regression = self.output_regression;
        }
        if self.output_report.is_some() {
            config.output_report = self.output_report;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str())),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.into_config()?;
    let run = run_analysis(&config)
        .with_context(|| format!("latency analysis of {}", config.input.display()))?;

    print!("{}", run.report.render());
    Ok(())
}
