//! Per exchange/feed latency heuristics.
//!
//! For every group with enough samples the rows are split by relative engine
//! latency into a *fast* quartile (`rel <= p25`) and a *slow* quartile
//! (`rel >= p75`). Comparing their mean errors gives:
//!
//! ```text
//! error_ratio = slow_mean_error / fast_mean_error
//! lambda      = max(0, ln(error_ratio) / (slow_mean_rel - fast_mean_rel))
//! ```
//!
//! `lambda` is the per-millisecond exponential decay rate implied by the
//! observed error growth. A negative rate would mean error shrinks with
//! latency; that is treated as noise and clamped to zero.
//!
//! A skip threshold (`p90` of relative latency) is recommended only when
//! `error_ratio >= skip_ratio` and that percentile is strictly positive.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::features::{FeatureSet, LatencyFeatureRow};
use crate::output::opt_float_cell;
use crate::stats;
use crate::table::UNKNOWN_FEED;

const FAST_QUANTILE: f64 = 0.25;
const SLOW_QUANTILE: f64 = 0.75;
const SKIP_QUANTILE: f64 = 0.90;

// =============================================================================
// GROUP KEY
// =============================================================================

/// `(exchange, feed)` when the input has a feed column, else `exchange` alone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub exchange: String,
    pub feed: Option<String>,
}

impl GroupKey {
    pub fn for_row(row: &LatencyFeatureRow, by_feed: bool) -> Self {
        Self {
            exchange: row.exchange.clone(),
            feed: by_feed.then(|| row.feed.clone()),
        }
    }

    /// Feed as written to output tables.
    pub fn feed_label(&self) -> &str {
        self.feed.as_deref().unwrap_or(UNKNOWN_FEED)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.feed {
            Some(feed) => write!(f, "{}/{}", self.exchange, feed),
            None => write!(f, "{}", self.exchange),
        }
    }
}

// =============================================================================
// SUMMARY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryConfig {
    pub min_samples: usize,
    pub skip_ratio: f64,
}

/// Heuristics for one group. Computed once per run, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeFeedSummary {
    pub exchange: String,
    pub feed: String,
    pub samples: usize,
    pub median_latency_ms: Option<f64>,
    pub mean_abs_error_bps: Option<f64>,
    pub corr_rel_latency_error: Option<f64>,
    pub fast_mean_rel_latency_ms: Option<f64>,
    pub slow_mean_rel_latency_ms: Option<f64>,
    pub fast_mean_error_bps: Option<f64>,
    pub slow_mean_error_bps: Option<f64>,
    pub slow_fast_error_ratio: Option<f64>,
    pub lambda_for_exp_weight: Option<f64>,
    pub skip_threshold_rel_ms: Option<f64>,
}

const SUMMARY_HEADER: [&str; 13] = [
    "exchange",
    "feed",
    "samples",
    "median_latency_ms",
    "mean_abs_error_bps",
    "corr_rel_latency_error",
    "fast_mean_rel_latency_ms",
    "slow_mean_rel_latency_ms",
    "fast_mean_error_bps",
    "slow_mean_error_bps",
    "slow_fast_error_ratio",
    "lambda_for_exp_weight",
    "skip_threshold_rel_ms",
];

/// Immutable lookup table of group summaries, ordered by `(exchange, feed)`.
#[derive(Debug, Clone, Default)]
pub struct GroupSummaryTable {
    by_feed: bool,
    summaries: BTreeMap<GroupKey, ExchangeFeedSummary>,
}

impl GroupSummaryTable {
    pub fn by_feed(&self) -> bool {
        self.by_feed
    }

    pub fn get(&self, key: &GroupKey) -> Option<&ExchangeFeedSummary> {
        self.summaries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExchangeFeedSummary> {
        self.summaries.values()
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(SUMMARY_HEADER)?;
        for s in self.iter() {
            wtr.write_record([
                s.exchange.clone(),
                s.feed.clone(),
                s.samples.to_string(),
                opt_float_cell(s.median_latency_ms),
                opt_float_cell(s.mean_abs_error_bps),
                opt_float_cell(s.corr_rel_latency_error),
                opt_float_cell(s.fast_mean_rel_latency_ms),
                opt_float_cell(s.slow_mean_rel_latency_ms),
                opt_float_cell(s.fast_mean_error_bps),
                opt_float_cell(s.slow_mean_error_bps),
                opt_float_cell(s.slow_fast_error_ratio),
                opt_float_cell(s.lambda_for_exp_weight),
                opt_float_cell(s.skip_threshold_rel_ms),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Compute heuristics for every group with at least `min_samples` usable rows.
///
/// Groups below the threshold are silently left out.
pub fn summarize_by_group(features: &FeatureSet, config: SummaryConfig) -> GroupSummaryTable {
    let by_feed = features.has_feed();

    let mut groups: BTreeMap<GroupKey, Vec<&LatencyFeatureRow>> = BTreeMap::new();
    for row in &features.rows {
        groups
            .entry(GroupKey::for_row(row, by_feed))
            .or_default()
            .push(row);
    }

    let total_groups = groups.len();
    let summaries: BTreeMap<GroupKey, ExchangeFeedSummary> = groups
        .into_iter()
        .filter_map(|(key, rows)| {
            let summary = summarize_group(&key, &rows, config)?;
            Some((key, summary))
        })
        .collect();

    debug!(
        groups = total_groups,
        summarized = summaries.len(),
        min_samples = config.min_samples,
        "summarized exchange/feed groups"
    );

    GroupSummaryTable { by_feed, summaries }
}

/// Usable sample: relative latency, raw latency and error all defined.
struct Sample {
    latency: f64,
    rel_latency: f64,
    error: f64,
}

fn summarize_group(
    key: &GroupKey,
    rows: &[&LatencyFeatureRow],
    config: SummaryConfig,
) -> Option<ExchangeFeedSummary> {
    let samples: Vec<Sample> = rows
        .iter()
        .filter_map(|r| {
            Some(Sample {
                latency: r.latency_engine_ms?,
                rel_latency: r.latency_engine_ms_rel?,
                error: r.abs_error_bps?,
            })
        })
        .collect();
    if samples.is_empty() || samples.len() < config.min_samples {
        return None;
    }

    let latency: Vec<f64> = samples.iter().map(|s| s.latency).collect();
    let rel: Vec<f64> = samples.iter().map(|s| s.rel_latency).collect();
    let error: Vec<f64> = samples.iter().map(|s| s.error).collect();

    let fast_q = stats::quantile(&rel, FAST_QUANTILE)?;
    let slow_q = stats::quantile(&rel, SLOW_QUANTILE)?;
    let (fast_lat, fast_err) = subset_means(&samples, |s| s.rel_latency <= fast_q);
    let (slow_lat, slow_err) = subset_means(&samples, |s| s.rel_latency >= slow_q);

    let error_ratio = match (slow_err, fast_err) {
        (Some(slow), Some(fast)) if fast != 0.0 => Some(slow / fast).filter(|r| r.is_finite()),
        _ => None,
    };

    let lambda = match (error_ratio, fast_lat, slow_lat) {
        (Some(ratio), Some(fast), Some(slow)) if ratio > 0.0 && slow != fast => {
            Some((ratio.ln() / (slow - fast)).max(0.0))
        }
        _ => None,
    };

    let skip_threshold = error_ratio
        .filter(|&ratio| ratio >= config.skip_ratio)
        .and_then(|_| stats::quantile(&rel, SKIP_QUANTILE))
        .filter(|&t| t > 0.0);

    Some(ExchangeFeedSummary {
        exchange: key.exchange.clone(),
        feed: key.feed_label().to_string(),
        samples: samples.len(),
        median_latency_ms: stats::median(&latency),
        mean_abs_error_bps: stats::mean(&error),
        corr_rel_latency_error: stats::pearson(&rel, &error),
        fast_mean_rel_latency_ms: fast_lat,
        slow_mean_rel_latency_ms: slow_lat,
        fast_mean_error_bps: fast_err,
        slow_mean_error_bps: slow_err,
        slow_fast_error_ratio: error_ratio,
        lambda_for_exp_weight: lambda,
        skip_threshold_rel_ms: skip_threshold,
    })
}

/// Mean relative latency and mean error over the samples matching `keep`.
fn subset_means(samples: &[Sample], keep: impl Fn(&Sample) -> bool) -> (Option<f64>, Option<f64>) {
    let (lat, err): (Vec<f64>, Vec<f64>) = samples
        .iter()
        .filter(|s| keep(s))
        .map(|s| (s.rel_latency, s.error))
        .unzip();
    (stats::mean(&lat), stats::mean(&err))
}
