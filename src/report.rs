//! Human-readable and JSON rendering of an analysis run.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::regression::RegressionResult;
use crate::summary::{ExchangeFeedSummary, GroupSummaryTable};
use crate::weighting::WeightedRows;

/// Everything a run produced, in a serializable form.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub input: PathBuf,
    pub horizon_ms: f64,
    /// Feature rows retained after the horizon filter
    pub total_samples: usize,
    pub regression: RegressionResult,
    pub summaries: Vec<ExchangeFeedSummary>,
    pub skipped_updates: usize,
    pub skipped_fraction: f64,
    pub saved: Vec<SavedOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedOutput {
    pub label: &'static str,
    pub path: PathBuf,
}

impl AnalysisReport {
    pub fn new(
        input: PathBuf,
        horizon_ms: f64,
        regression: RegressionResult,
        summaries: &GroupSummaryTable,
        weights: &WeightedRows,
    ) -> Self {
        let skipped_updates = if summaries.is_empty() {
            0
        } else {
            weights.skipped()
        };
        Self {
            input,
            horizon_ms,
            total_samples: weights.len(),
            regression,
            summaries: summaries.iter().cloned().collect(),
            skipped_updates,
            skipped_fraction: weights.skipped_fraction(),
            saved: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Console report: overview, latency effects, group heuristics, skip rate.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "\n=== Data overview ===");
        let _ = writeln!(out, "Total samples used: {}", thousands(self.total_samples));
        let _ = writeln!(out, "Horizon: {} ms", self.horizon_ms);
        let _ = writeln!(
            out,
            "Regression samples: {}",
            thousands(self.regression.sample_count)
        );
        let _ = writeln!(out, "Regression R^2: {:.3}", self.regression.r2);

        let _ = writeln!(out, "\n=== Top latency coefficients (per std effect, bps) ===");
        let _ = writeln!(out, "{:<24} {:>14} {:>14}", "feature", "coefficient", "effect_per_std");
        for c in self.regression.ranked_numeric_effects() {
            let effect = if c.effect_per_std.is_finite() {
                c.effect_per_std
            } else {
                0.0
            };
            let _ = writeln!(
                out,
                "{:<24} {:>14.4} {:>14.4}",
                c.feature, c.coefficient, effect
            );
        }

        let _ = writeln!(out, "\n=== Exchange heuristics ===");
        if self.summaries.is_empty() {
            let _ = writeln!(out, "No exchange met the minimum sample requirement.");
        } else {
            let _ = writeln!(
                out,
                "{:<12} {:<12} {:>9} {:>10} {:>10} {:>8} {:>8} {:>10} {:>10}",
                "exchange",
                "feed",
                "samples",
                "med_lat_ms",
                "err_bps",
                "corr",
                "ratio",
                "lambda",
                "skip_ms"
            );
            for s in &self.summaries {
                let _ = writeln!(
                    out,
                    "{:<12} {:<12} {:>9} {:>10} {:>10} {:>8} {:>8} {:>10} {:>10}",
                    s.exchange,
                    s.feed,
                    s.samples,
                    fixed(s.median_latency_ms, 3),
                    fixed(s.mean_abs_error_bps, 3),
                    fixed(s.corr_rel_latency_error, 3),
                    fixed(s.slow_fast_error_ratio, 3),
                    fixed(s.lambda_for_exp_weight, 5),
                    fixed(s.skip_threshold_rel_ms, 3),
                );
            }
        }

        if self.total_samples > 0 {
            let _ = writeln!(
                out,
                "\nUpdates flagged for skipping: {} ({:.2}% of analysed rows)",
                thousands(self.skipped_updates),
                self.skipped_updates as f64 / self.total_samples as f64 * 100.0
            );
        }

        if !self.saved.is_empty() {
            let _ = writeln!(out);
            for saved in &self.saved {
                let _ = writeln!(out, "Saved {} to {}", saved.label, saved.path.display());
            }
        }
        out
    }
}

fn fixed(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

/// `1234567` -> `1,234,567`
fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
