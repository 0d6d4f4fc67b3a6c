//! Ordinary least squares of price error on latency features.
//!
//! The design matrix is `[1 | numeric features | one-hot categoricals]`. Each
//! categorical drops its lexicographically first level as the reference, which
//! keeps the matrix full rank when the intercept is present. The fit uses an
//! SVD-based least-squares solve with a relative singular-value cutoff, so
//! near-collinear columns produce the minimum-norm solution instead of an
//! exploding inverse.

use std::collections::BTreeSet;
use std::io::Write;

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::features::{Feature, LatencyFeatureRow};
use crate::output::float_cell;
use crate::stats;

/// Categorical regressor taken from a feature row's labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Categorical {
    Exchange,
    Feed,
}

impl Categorical {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exchange => "exchange",
            Self::Feed => "feed",
        }
    }

    pub fn value<'a>(&self, row: &'a LatencyFeatureRow) -> &'a str {
        match self {
            Self::Exchange => &row.exchange,
            Self::Feed => &row.feed,
        }
    }
}

/// Role of a coefficient in the design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Intercept,
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    /// `intercept`, the feature name, or `<column>_<level>`
    pub feature: String,
    pub kind: TermKind,
    pub coefficient: f64,
    /// `coefficient * std(feature)` for numeric terms with a usable std,
    /// otherwise the raw coefficient.
    pub effect_per_std: f64,
}

/// Fitted model. Immutable once computed.
#[derive(Debug, Clone, Serialize)]
pub struct RegressionResult {
    pub coefficients: Vec<Coefficient>,
    pub r2: f64,
    pub sample_count: usize,
}

impl RegressionResult {
    pub fn coefficient(&self, feature: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.feature == feature)
    }

    /// Numeric terms ordered by absolute per-std effect, largest first.
    pub fn ranked_numeric_effects(&self) -> Vec<&Coefficient> {
        let mut terms: Vec<&Coefficient> = self
            .coefficients
            .iter()
            .filter(|c| c.kind == TermKind::Numeric)
            .collect();
        let key = |c: &Coefficient| {
            if c.effect_per_std.is_finite() {
                c.effect_per_std.abs()
            } else {
                0.0
            }
        };
        terms.sort_by(|a, b| key(b).total_cmp(&key(a)));
        terms
    }

    /// `feature,coefficient,effect_per_std` table.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["feature", "coefficient", "effect_per_std"])?;
        for c in &self.coefficients {
            wtr.write_record([
                c.feature.clone(),
                float_cell(c.coefficient),
                float_cell(c.effect_per_std),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Fit `target ~ 1 + features + one_hot(categoricals)`.
///
/// Rows missing any numeric feature or the target are dropped first; if none
/// remain the run cannot produce a model and this is an error.
pub fn fit_regression(
    rows: &[LatencyFeatureRow],
    features: &[Feature],
    categoricals: &[Categorical],
    target: Feature,
) -> Result<RegressionResult> {
    // Complete cases only
    let mut used: Vec<&LatencyFeatureRow> = Vec::new();
    let mut numeric: Vec<Vec<f64>> = vec![Vec::new(); features.len()];
    let mut y: Vec<f64> = Vec::new();
    'rows: for row in rows {
        let Some(t) = target.value(row) else { continue };
        let mut values = Vec::with_capacity(features.len());
        for f in features {
            match f.value(row) {
                Some(v) => values.push(v),
                None => continue 'rows,
            }
        }
        for (col, v) in numeric.iter_mut().zip(values) {
            col.push(v);
        }
        y.push(t);
        used.push(row);
    }

    if used.is_empty() {
        let mut required: Vec<String> = features.iter().map(|f| f.name().to_string()).collect();
        required.push(target.name().to_string());
        return Err(AnalysisError::NoRegressionRows { required });
    }

    let dummies = dummy_columns(&used, categoricals);

    let n = used.len();
    let p = 1 + features.len() + dummies.len();
    let x = DMatrix::from_fn(n, p, |i, j| {
        if j == 0 {
            1.0
        } else if j <= features.len() {
            numeric[j - 1][i]
        } else {
            let d = &dummies[j - 1 - features.len()];
            if d.category.value(used[i]) == d.level {
                1.0
            } else {
                0.0
            }
        }
    });
    let y = DVector::from_vec(y);

    let beta = least_squares(x.clone(), &y)?;

    let y_hat = &x * &beta;
    let ss_res = (&y - &y_hat).norm_squared();
    let y_mean = y.mean();
    let ss_tot: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let r2 = if ss_tot != 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    };

    let mut coefficients = Vec::with_capacity(p);
    coefficients.push(Coefficient {
        feature: "intercept".to_string(),
        kind: TermKind::Intercept,
        coefficient: beta[0],
        effect_per_std: beta[0],
    });
    for (j, f) in features.iter().enumerate() {
        let coef = beta[1 + j];
        // Raw coefficient when no usable std exists (documented fallback).
        let effect = match stats::sample_std(&numeric[j]) {
            Some(s) if s != 0.0 => coef * s,
            _ => coef,
        };
        coefficients.push(Coefficient {
            feature: f.name().to_string(),
            kind: TermKind::Numeric,
            coefficient: coef,
            effect_per_std: effect,
        });
    }
    for (k, d) in dummies.iter().enumerate() {
        let coef = beta[1 + features.len() + k];
        coefficients.push(Coefficient {
            feature: format!("{}_{}", d.category.name(), d.level),
            kind: TermKind::Categorical,
            coefficient: coef,
            effect_per_std: coef,
        });
    }

    debug!(samples = n, terms = p, r2, "fitted latency regression");

    Ok(RegressionResult {
        coefficients,
        r2,
        sample_count: n,
    })
}

/// One-hot column for a non-reference level.
struct DummyColumn {
    category: Categorical,
    level: String,
}

fn dummy_columns(rows: &[&LatencyFeatureRow], categoricals: &[Categorical]) -> Vec<DummyColumn> {
    let mut columns = Vec::new();
    for &category in categoricals {
        let levels: BTreeSet<&str> = rows.iter().map(|r| category.value(r)).collect();
        columns.extend(levels.into_iter().skip(1).map(|level| DummyColumn {
            category,
            level: level.to_string(),
        }));
    }
    columns
}

/// Minimum-norm least squares via SVD.
///
/// Singular values below `eps * max(n, p) * s_max` are treated as zero.
fn least_squares(x: DMatrix<f64>, y: &DVector<f64>) -> Result<DVector<f64>> {
    let (n, p) = x.shape();
    let svd = x.svd(true, true);
    let cutoff = f64::EPSILON * n.max(p) as f64 * svd.singular_values.max();
    svd.solve(y, cutoff)
        .map_err(|reason| AnalysisError::SolveFailed {
            reason: reason.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::TARGET;
    use crate::test_support::feature_row;

    fn row(exchange: &str, engine_ms: f64, error_bps: f64) -> LatencyFeatureRow {
        let mut r = feature_row(exchange, "book", None, Some(error_bps));
        r.latency_engine_ms = Some(engine_ms);
        r
    }

    #[test]
    fn test_recovers_known_slope() {
        let rows: Vec<_> = (0..50)
            .map(|i| {
                let lat = i as f64 * 0.7 + 1.0;
                row("A", lat, 2.0 * lat)
            })
            .collect();
        let result = fit_regression(&rows, &[Feature::LatencyEngineMs], &[], TARGET).unwrap();

        assert_eq!(result.sample_count, 50);
        let slope = result.coefficient("latency_engine_ms").unwrap();
        assert!((slope.coefficient - 2.0).abs() < 1e-9, "{}", slope.coefficient);
        assert!(result.coefficient("intercept").unwrap().coefficient.abs() < 1e-8);
        assert!((result.r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_categorical_reference_level_is_dropped() {
        let mut rows = Vec::new();
        for i in 0..10 {
            let mut a = row("A", 1.0, 5.0);
            a.future_dt_ms = 10.0 + i as f64;
            let mut b = row("B", 1.0, 8.0);
            b.future_dt_ms = 10.0 + i as f64;
            rows.push(a);
            rows.push(b);
        }
        let result = fit_regression(
            &rows,
            &[Feature::FutureDtMs],
            &[Categorical::Exchange, Categorical::Feed],
            TARGET,
        )
        .unwrap();

        let names: Vec<&str> = result.coefficients.iter().map(|c| c.feature.as_str()).collect();
        // feed has a single level, so it contributes no column
        assert_eq!(names, vec!["intercept", "future_dt_ms", "exchange_B"]);
        assert!((result.coefficients[0].coefficient - 5.0).abs() < 1e-9);
        assert!(result.coefficients[1].coefficient.abs() < 1e-9);
        assert!((result.coefficients[2].coefficient - 3.0).abs() < 1e-9);
        assert_eq!(result.coefficients[2].kind, TermKind::Categorical);
    }

    #[test]
    fn test_collinear_columns_do_not_fail() {
        let rows: Vec<_> = (0..20)
            .map(|i| {
                let lat = i as f64;
                let mut r = row("A", lat, 2.0 * lat + 1.0);
                r.latency_system_ms = Some(lat);
                r
            })
            .collect();
        let result = fit_regression(
            &rows,
            &[Feature::LatencyEngineMs, Feature::LatencySystemMs],
            &[],
            TARGET,
        )
        .unwrap();

        let a = result.coefficient("latency_engine_ms").unwrap().coefficient;
        let b = result.coefficient("latency_system_ms").unwrap().coefficient;
        assert!((a + b - 2.0).abs() < 1e-8);
        assert!((a - b).abs() < 1e-8, "minimum-norm split expected");
        assert!((result.r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_variance_target_reports_zero_r2() {
        let rows: Vec<_> = (0..10).map(|i| row("A", i as f64, 3.0)).collect();
        let result = fit_regression(&rows, &[Feature::LatencyEngineMs], &[], TARGET).unwrap();
        assert_eq!(result.r2, 0.0);
    }

    #[test]
    fn test_effect_per_std() {
        let rows: Vec<_> = (0..4).map(|i| row("A", i as f64, 2.0 * i as f64)).collect();
        let result = fit_regression(&rows, &[Feature::LatencyEngineMs], &[], TARGET).unwrap();
        let c = result.coefficient("latency_engine_ms").unwrap();
        // std([0,1,2,3]) with n-1 = 1.2909944...
        assert!((c.effect_per_std - 2.0 * 1.2909944487358056).abs() < 1e-9);
    }

    #[test]
    fn test_effect_per_std_falls_back_to_coefficient() {
        let rows: Vec<_> = (0..5).map(|i| row("A", 4.0, i as f64)).collect();
        let result = fit_regression(&rows, &[Feature::LatencyEngineMs], &[], TARGET).unwrap();
        let c = result.coefficient("latency_engine_ms").unwrap();
        assert_eq!(c.effect_per_std, c.coefficient);
    }

    #[test]
    fn test_incomplete_rows_are_dropped() {
        let mut rows: Vec<_> = (0..5).map(|i| row("A", i as f64, 2.0 * i as f64)).collect();
        rows[0].abs_error_bps = None;
        rows[1].latency_engine_ms = None;
        let result = fit_regression(&rows, &[Feature::LatencyEngineMs], &[], TARGET).unwrap();
        assert_eq!(result.sample_count, 3);
    }

    #[test]
    fn test_no_complete_rows_is_fatal() {
        let rows = vec![feature_row("A", "book", None, None)];
        let err = fit_regression(&rows, &[Feature::LatencyEngineMs], &[], TARGET).unwrap_err();
        match err {
            AnalysisError::NoRegressionRows { required } => {
                assert_eq!(required, vec!["latency_engine_ms", "abs_error_bps"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ranked_effects_and_csv() {
        let rows: Vec<_> = (0..30)
            .map(|i| {
                let mut r = row("A", i as f64, 3.0 * i as f64);
                r.future_dt_ms = ((i * 7) % 11) as f64;
                r
            })
            .collect();
        let result = fit_regression(
            &rows,
            &[Feature::FutureDtMs, Feature::LatencyEngineMs],
            &[],
            TARGET,
        )
        .unwrap();

        let ranked = result.ranked_numeric_effects();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].feature, "latency_engine_ms");

        let mut buf = Vec::new();
        result.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("feature,coefficient,effect_per_std"));
        assert_eq!(text.lines().count(), 4);
    }
}
