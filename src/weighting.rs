//! Apply per-group decay rates and skip thresholds back onto rows.
//!
//! ```text
//! recommended_weight  = exp(-lambda * rel_latency)
//! skip_due_to_latency = rel_latency > skip_threshold
//! ```
//!
//! Rows whose group was not summarized (too few samples) or whose relative
//! latency is undefined get no weight. A group without a threshold never
//! flags a row for skipping.

use serde::Serialize;

use crate::features::FeatureSet;
use crate::summary::{GroupKey, GroupSummaryTable};

/// Weighting decision for one feature row (same index as the input row).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightDecision {
    pub exchange: String,
    pub feed: String,
    pub ts_ns: i64,
    pub rel_latency_ms: Option<f64>,
    pub recommended_weight: Option<f64>,
    pub skip_due_to_latency: bool,
}

/// Weighting decisions for a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WeightedRows {
    pub decisions: Vec<WeightDecision>,
}

impl WeightedRows {
    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn skipped(&self) -> usize {
        self.decisions.iter().filter(|d| d.skip_due_to_latency).count()
    }

    /// Fraction of rows flagged for skipping (0 when there are no rows).
    pub fn skipped_fraction(&self) -> f64 {
        if self.decisions.is_empty() {
            0.0
        } else {
            self.skipped() as f64 / self.decisions.len() as f64
        }
    }
}

/// Second pass: read-only lookup of each row's group parameters.
pub fn attach_weights(features: &FeatureSet, summaries: &GroupSummaryTable) -> WeightedRows {
    let by_feed = summaries.by_feed();
    let decisions = features
        .rows
        .iter()
        .map(|row| {
            let rel = row.latency_engine_ms_rel;
            let summary = summaries.get(&GroupKey::for_row(row, by_feed));
            let lambda = summary.and_then(|s| s.lambda_for_exp_weight);
            let threshold = summary.and_then(|s| s.skip_threshold_rel_ms);

            let recommended_weight = match (rel, lambda) {
                (Some(rel), Some(lambda)) => Some((-lambda * rel).exp()),
                _ => None,
            };
            let skip_due_to_latency = matches!((rel, threshold), (Some(rel), Some(t)) if rel > t);

            WeightDecision {
                exchange: row.exchange.clone(),
                feed: row.feed.clone(),
                ts_ns: row.ts_ns,
                rel_latency_ms: rel,
                recommended_weight,
                skip_due_to_latency,
            }
        })
        .collect();

    WeightedRows { decisions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::LatencyFeatureRow;
    use crate::summary::{summarize_by_group, SummaryConfig};
    use crate::table::ColumnSet;
    use crate::test_support::feature_row;

    fn feature_set(rows: Vec<LatencyFeatureRow>) -> FeatureSet {
        FeatureSet {
            rows,
            columns: ColumnSet {
                feed: true,
                price: true,
                source_engine_ts: true,
                ..Default::default()
            },
            horizon_ms: 1000.0,
        }
    }

    /// Exchange A: error doubles from the fast to the slow quartile, p90 = 10.4.
    /// Exchange B: flat error (lambda 0, no threshold). C is below min samples.
    fn rows() -> Vec<LatencyFeatureRow> {
        let mut rows = Vec::new();
        for _ in 0..4 {
            rows.push(feature_row("A", "book", Some(0.0), Some(1.0)));
            rows.push(feature_row("A", "book", Some(10.0), Some(2.0)));
            rows.push(feature_row("B", "book", Some(0.0), Some(1.0)));
            rows.push(feature_row("B", "book", Some(10.0), Some(1.0)));
        }
        rows.push(feature_row("A", "book", Some(12.0), Some(2.0)));
        rows.push(feature_row("A", "book", None, Some(2.0)));
        rows.push(feature_row("C", "book", Some(50.0), Some(2.0)));
        rows
    }

    fn weighted() -> WeightedRows {
        let set = feature_set(rows());
        let summaries = summarize_by_group(
            &set,
            SummaryConfig {
                min_samples: 5,
                skip_ratio: 1.25,
            },
        );
        attach_weights(&set, &summaries)
    }

    #[test]
    fn test_one_decision_per_row() {
        assert_eq!(weighted().len(), rows().len());
    }

    #[test]
    fn test_weight_is_exponential_in_relative_latency() {
        let w = weighted();
        // slow quartile of A is {10 x4, 12}: mean 10.4
        let lambda = 2f64.ln() / 10.4;
        let a_fast = &w.decisions[0];
        let a_slow = &w.decisions[1];
        assert!((a_fast.recommended_weight.unwrap() - 1.0).abs() < 1e-12);
        assert!((a_slow.recommended_weight.unwrap() - (-lambda * 10.0).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_weight_strictly_decreasing_for_positive_lambda() {
        let w = weighted();
        let mut a: Vec<(f64, f64)> = w
            .decisions
            .iter()
            .filter(|d| d.exchange == "A")
            .filter_map(|d| Some((d.rel_latency_ms?, d.recommended_weight?)))
            .collect();
        a.sort_by(|x, y| x.0.total_cmp(&y.0));
        a.dedup_by(|x, y| x.0 == y.0);
        assert!(a.len() >= 3);
        for pair in a.windows(2) {
            assert!(pair[1].1 < pair[0].1, "{:?}", pair);
        }
    }

    #[test]
    fn test_undefined_inputs_get_no_weight() {
        let w = weighted();
        let n = w.len();
        // missing relative latency
        assert_eq!(w.decisions[n - 2].recommended_weight, None);
        assert!(!w.decisions[n - 2].skip_due_to_latency);
        // ungrouped exchange
        assert_eq!(w.decisions[n - 1].recommended_weight, None);
        assert!(!w.decisions[n - 1].skip_due_to_latency);
    }

    #[test]
    fn test_skip_only_above_defined_threshold() {
        let w = weighted();
        let skipped: Vec<(&str, f64)> = w
            .decisions
            .iter()
            .filter(|d| d.skip_due_to_latency)
            .map(|d| (d.exchange.as_str(), d.rel_latency_ms.unwrap()))
            .collect();
        assert_eq!(skipped, vec![("A", 12.0)]);
        assert_eq!(w.skipped(), 1);
    }

    #[test]
    fn test_group_without_threshold_never_skips() {
        let w = weighted();
        assert!(w
            .decisions
            .iter()
            .filter(|d| d.exchange == "B")
            .all(|d| !d.skip_due_to_latency));
        // B still gets a (flat) weight
        assert!(w
            .decisions
            .iter()
            .filter(|d| d.exchange == "B")
            .all(|d| d.recommended_weight == Some(1.0)));
    }

    #[test]
    fn test_skipped_fraction_of_empty_is_zero() {
        assert_eq!(WeightedRows::default().skipped_fraction(), 0.0);
    }
}
