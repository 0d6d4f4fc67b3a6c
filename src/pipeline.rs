//! End-to-end runs: load, compute, optionally save.
//!
//! ```text
//! analysis:   CSV ─► EventTable ─► FeatureSet ─┬─► fit_regression
//!                                              └─► summarize_by_group ─► attach_weights
//!
//! lifecycle:  CSV ─► EventTable ─► build_quote_lifecycles ─► build_latency_histograms
//! ```
//!
//! Nothing is written until every computation step has succeeded, so a fatal
//! error never leaves partial outputs behind.

use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::config::{AnalysisConfig, LifecycleConfig};
use crate::error::{AnalysisError, Result};
use crate::features::{build_features, FeatureSet, DEFAULT_FEATURES, TARGET};
use crate::histogram::{build_latency_histograms, export_histograms_csv, LatencyHistogram};
use crate::lifecycle::{build_quote_lifecycles, export_lifecycles_csv, QuoteLifecycle};
use crate::output::create_output;
use crate::regression::{fit_regression, Categorical};
use crate::report::{AnalysisReport, SavedOutput};
use crate::summary::{summarize_by_group, GroupSummaryTable, SummaryConfig};
use crate::table::{load_event_table, LoadOptions};
use crate::weighting::{attach_weights, WeightedRows};

// =============================================================================
// ANALYSIS
// =============================================================================

/// Outputs of one weighting analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub features: FeatureSet,
    pub summaries: GroupSummaryTable,
    pub weights: WeightedRows,
    pub report: AnalysisReport,
}

pub fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisRun> {
    config.validate()?;

    let table = load_event_table(&config.input, LoadOptions::analysis(config.limit))?;
    info!(
        input = %config.input.display(),
        rows = table.len(),
        "loaded activity log"
    );

    let features = build_features(&table, config.horizon_ms);
    if features.is_empty() {
        return Err(AnalysisError::NoRowsAfterHorizon {
            horizon_ms: config.horizon_ms,
        });
    }
    info!(
        rows = features.len(),
        horizon_ms = config.horizon_ms,
        "built latency features"
    );

    let numeric = features.available_features(&DEFAULT_FEATURES);
    let mut categoricals = vec![Categorical::Exchange];
    if features.has_feed() {
        categoricals.push(Categorical::Feed);
    }
    let regression = fit_regression(&features.rows, &numeric, &categoricals, TARGET)?;
    info!(
        samples = regression.sample_count,
        r2 = regression.r2,
        terms = regression.coefficients.len(),
        "fitted latency regression"
    );

    let summaries = summarize_by_group(
        &features,
        SummaryConfig {
            min_samples: config.min_samples,
            skip_ratio: config.skip_ratio,
        },
    );
    let weights = attach_weights(&features, &summaries);
    info!(
        groups = summaries.len(),
        skipped = weights.skipped(),
        "derived weighting policy"
    );

    let mut report = AnalysisReport::new(
        config.input.clone(),
        config.horizon_ms,
        regression,
        &summaries,
        &weights,
    );
    save_analysis_outputs(config, &summaries, &mut report)?;

    Ok(AnalysisRun {
        features,
        summaries,
        weights,
        report,
    })
}

fn save_analysis_outputs(
    config: &AnalysisConfig,
    summaries: &GroupSummaryTable,
    report: &mut AnalysisReport,
) -> Result<()> {
    if let Some(path) = &config.output_summary {
        summaries.write_csv(create_output(path)?)?;
        saved(report, "exchange summary", path);
    }
    if let Some(path) = &config.output_regression {
        report.regression.write_csv(create_output(path)?)?;
        saved(report, "regression coefficients", path);
    }
    if let Some(path) = &config.output_report {
        saved(report, "run report", path);
        let json = report.to_json()?;
        let mut file = create_output(path)?;
        file.write_all(json.as_bytes())?;
        file.flush()?;
    }
    Ok(())
}

fn saved(report: &mut AnalysisReport, label: &'static str, path: &Path) {
    info!(path = %path.display(), "saved {}", label);
    report.saved.push(SavedOutput {
        label,
        path: path.to_path_buf(),
    });
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Outputs of one lifecycle reconstruction.
#[derive(Debug, Clone)]
pub struct LifecycleRun {
    pub lifecycles: Vec<QuoteLifecycle>,
    pub histograms: Vec<LatencyHistogram>,
}

pub fn run_lifecycle(config: &LifecycleConfig) -> Result<LifecycleRun> {
    config.validate()?;

    let mut table = load_event_table(&config.input, LoadOptions::lifecycle(config.limit))?;
    if !table.columns().event_type {
        return Err(AnalysisError::MissingColumns {
            columns: vec!["event_type"],
        });
    }
    if let Some(exchange) = config.exchange_filter() {
        table = table.filter_exchange(&exchange);
        info!(exchange = %exchange, rows = table.len(), "applied exchange filter");
    }

    let lifecycles = build_quote_lifecycles(&table);
    if lifecycles.is_empty() {
        return Err(AnalysisError::NoLifecycleData);
    }
    let histograms = build_latency_histograms(&lifecycles, config.bins);
    info!(
        quotes = lifecycles.len(),
        bins = config.bins,
        "reconstructed quote lifecycles"
    );

    if let Some(path) = &config.output_lifecycles {
        export_lifecycles_csv(&lifecycles, create_output(path)?)?;
        info!(path = %path.display(), "saved quote lifecycles");
    }
    if let Some(path) = &config.output_histograms {
        export_histograms_csv(&histograms, create_output(path)?)?;
        info!(path = %path.display(), "saved histogram bins");
    }

    Ok(LifecycleRun {
        lifecycles,
        histograms,
    })
}
