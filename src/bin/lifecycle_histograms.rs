//! Quote Lifecycle Histograms
//!
//! Reconstructs one lifecycle per quote (cancel, fills, acknowledgments) and
//! summarizes quote/cancel latency distributions.
//!
//! Usage:
//!   lifecycle_histograms logs/gate_activity.csv --exchange gate --bins 100
//!   lifecycle_histograms --output-lifecycles out/lifecycles.csv

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use latency_weighting::histogram::render_histograms;
use latency_weighting::{run_lifecycle, LifecycleConfig};

#[derive(Parser, Debug)]
#[command(name = "lifecycle_histograms")]
#[command(about = "Histograms for quote and cancel latencies")]
struct Args {
    /// CSV produced by the activity logger (default: logs/gate_activity.csv)
    csv: Option<PathBuf>,

    /// TOML file with a lifecycle config
    #[arg(long, env = "LIFECYCLE_CONFIG")]
    config: Option<PathBuf>,

    /// Optional exchange filter (e.g. gate, bybit)
    #[arg(long)]
    exchange: Option<String>,

    /// Number of bins per histogram
    #[arg(long)]
    bins: Option<usize>,

    /// Optional row limit
    #[arg(long)]
    limit: Option<usize>,

    /// Write histogram bins as CSV here
    #[arg(long)]
    output_histograms: Option<PathBuf>,

    /// Write the reconstructed lifecycle table as CSV here
    #[arg(long)]
    output_lifecycles: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<LifecycleConfig> {
        let mut config = match &self.config {
            Some(path) => LifecycleConfig::from_toml_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => LifecycleConfig::default(),
        };
        if let Some(csv) = self.csv {
            config.input = csv;
        }
        if self.exchange.is_some() {
            config.exchange = self.exchange;
        }
        if let Some(bins) = self.bins {
            config.bins = bins;
        }
        if self.limit.is_some() {
            config.limit = self.limit;
        }
        if self.output_histograms.is_some() {
            config.output_histograms = self.output_histograms;
        }
        if self.output_lifecycles.is_some() {
            config.output_lifecycles = self.output_lifecycles;
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
    let run = run_lifecycle(&config)
        .with_context(|| format!("lifecycle reconstruction of {}", config.input.display()))?;

    println!("Quote lifecycles: {}", run.lifecycles.len());
    print!("{}", render_histograms(&run.histograms));
    Ok(())
}
