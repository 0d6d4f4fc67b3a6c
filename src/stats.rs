//! Small descriptive-statistics helpers over `f64` samples.
//!
//! All functions return `None` where the statistic is undefined (empty input,
//! zero variance, ...) rather than NaN, so callers can propagate "undefined"
//! through `Option` combinators.

use statrs::statistics::{Data, Median, Statistics};

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    finite(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median (average of the two middle values for even counts).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    finite(Data::new(values.to_vec()).median())
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    finite(values.std_dev())
}

/// Quantile with linear interpolation between closest ranks.
///
/// `q` is a fraction in `[0, 1]`. Position `q * (n - 1)` in the sorted sample
/// is interpolated between its neighbours.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(quantile_sorted(&sorted, q))
}

/// Same as [`quantile`] on an already ascending, non-empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Pearson correlation of paired samples.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let sx = x.std_dev();
    let sy = y.std_dev();
    if !(sx > 0.0 && sy > 0.0) {
        return None;
    }
    finite(x.covariance(y) / (sx * sy))
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&v, 0.25).unwrap() - 1.75).abs() < EPS);
        assert!((quantile(&v, 0.75).unwrap() - 3.25).abs() < EPS);
        assert!((quantile(&v, 0.9).unwrap() - 3.7).abs() < EPS);
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 1.0), Some(4.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_quantile_ignores_input_order() {
        assert_eq!(quantile(&[4.0, 1.0, 3.0, 2.0], 0.5), Some(2.5));
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_sample_std_needs_two_points() {
        assert_eq!(sample_std(&[5.0]), None);
        let s = sample_std(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((s - 1.2909944487358056).abs() < 1e-12);
    }

    #[test]
    fn test_pearson() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&x, &y).unwrap() - 1.0).abs() < EPS);
        let y_neg = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&x, &y_neg).unwrap() + 1.0).abs() < EPS);
        assert_eq!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]), None);
    }
}
