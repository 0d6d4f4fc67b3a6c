//! Latency distributions over reconstructed quote lifecycles.
//!
//! Four series are tracked, each binned into equal-width buckets over its own
//! observed `[min, max]` range:
//!
//! ```text
//! quote_internal_us   -> μs
//! cancel_internal_us  -> μs
//! quote_external_us   -> ms (÷1000)
//! cancel_external_us  -> ms (÷1000)
//! ```
//!
//! A series with a single distinct value is widened by ±0.5 so it still has a
//! non-zero bin width. The last bin is closed on the right.

use std::fmt::Write as _;
use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::lifecycle::QuoteLifecycle;
use crate::output::float_cell;
use crate::stats;

/// Default number of bins per series.
pub const DEFAULT_BINS: usize = 200;

/// Lifecycle latency column tracked by a histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencySeries {
    QuoteInternal,
    CancelInternal,
    QuoteExternal,
    CancelExternal,
}

impl LatencySeries {
    pub const ALL: [LatencySeries; 4] = [
        Self::QuoteInternal,
        Self::CancelInternal,
        Self::QuoteExternal,
        Self::CancelExternal,
    ];

    /// Source column name.
    pub fn column(&self) -> &'static str {
        match self {
            Self::QuoteInternal => "quote_internal_us",
            Self::CancelInternal => "cancel_internal_us",
            Self::QuoteExternal => "quote_external_us",
            Self::CancelExternal => "cancel_external_us",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::QuoteInternal => "Quote Internal Latency",
            Self::CancelInternal => "Cancel Internal Latency",
            Self::QuoteExternal => "Quote Ack Latency",
            Self::CancelExternal => "Cancel Ack Latency",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::QuoteInternal | Self::CancelInternal => "μs",
            Self::QuoteExternal | Self::CancelExternal => "ms",
        }
    }

    /// Divisor applied to raw μs values before binning.
    pub fn scale(&self) -> f64 {
        match self {
            Self::QuoteInternal | Self::CancelInternal => 1.0,
            Self::QuoteExternal | Self::CancelExternal => 1000.0,
        }
    }

    /// Raw value for one lifecycle, in μs.
    pub fn raw_value(&self, lifecycle: &QuoteLifecycle) -> Option<f64> {
        match self {
            Self::QuoteInternal => lifecycle.quote_internal_us,
            Self::CancelInternal => lifecycle.cancel_internal_us,
            Self::QuoteExternal => lifecycle.quote_external_us,
            Self::CancelExternal => lifecycle.cancel_external_us,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

/// Descriptive summary of one non-empty series, in display units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p90: f64,
    pub p99: f64,
}

/// Equal-width histogram of one latency series.
///
/// `summary` is `None` (and `bins` empty) when the series has no values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyHistogram {
    pub series: LatencySeries,
    pub bins: Vec<HistogramBin>,
    pub summary: Option<HistogramSummary>,
}

impl LatencyHistogram {
    /// Bin values already expressed in display units.
    pub fn from_values(series: LatencySeries, values: &[f64], bin_count: usize) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() || bin_count == 0 {
            return Self {
                series,
                bins: Vec::new(),
                summary: None,
            };
        }
        sorted.sort_by(f64::total_cmp);

        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        let (lo, hi) = if min == max {
            (min - 0.5, max + 0.5)
        } else {
            (min, max)
        };
        let width = (hi - lo) / bin_count as f64;

        let mut counts = vec![0u64; bin_count];
        for &v in &sorted {
            let idx = (((v - lo) / width).floor() as usize).min(bin_count - 1);
            counts[idx] += 1;
        }

        let bins = counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| HistogramBin {
                lower: lo + width * i as f64,
                upper: if i + 1 == bin_count {
                    hi
                } else {
                    lo + width * (i + 1) as f64
                },
                count,
            })
            .collect();

        let summary = HistogramSummary {
            count: sorted.len(),
            min,
            max,
            mean: stats::mean(&sorted).unwrap_or(min),
            p90: stats::quantile_sorted(&sorted, 0.90),
            p99: stats::quantile_sorted(&sorted, 0.99),
        };

        Self {
            series,
            bins,
            summary: Some(summary),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
    }

    /// Most populated bin (first on ties).
    pub fn mode_bin(&self) -> Option<&HistogramBin> {
        self.bins
            .iter()
            .reduce(|best, b| if b.count > best.count { b } else { best })
    }
}

/// One histogram per [`LatencySeries`], scaled to display units.
pub fn build_latency_histograms(
    lifecycles: &[QuoteLifecycle],
    bin_count: usize,
) -> Vec<LatencyHistogram> {
    LatencySeries::ALL
        .iter()
        .map(|&series| {
            let values: Vec<f64> = lifecycles
                .iter()
                .filter_map(|l| series.raw_value(l))
                .map(|v| v / series.scale())
                .collect();
            LatencyHistogram::from_values(series, &values, bin_count)
        })
        .collect()
}

/// Plain-text summary block, one paragraph per series.
pub fn render_histograms(histograms: &[LatencyHistogram]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Quote and Cancel Latency Distributions");
    let _ = writeln!(out, "{}", "=".repeat(40));
    for h in histograms {
        let title = format!("{} ({})", h.series.title(), h.series.unit());
        match &h.summary {
            None => {
                let _ = writeln!(out, "{}: (no data)", title);
            }
            Some(s) => {
                let _ = writeln!(out, "{}", title);
                let _ = writeln!(
                    out,
                    "  n={} min={:.3} mean={:.3} max={:.3}",
                    s.count, s.min, s.mean, s.max
                );
                let _ = writeln!(out, "  p90: {:.3}  p99: {:.3}", s.p90, s.p99);
                if let Some(mode) = h.mode_bin() {
                    let _ = writeln!(
                        out,
                        "  mode bin: [{:.3}, {:.3}] count={} ({} bins)",
                        mode.lower,
                        mode.upper,
                        mode.count,
                        h.bins.len()
                    );
                }
            }
        }
    }
    out
}

/// Export every bin of every non-empty series.
pub fn export_histograms_csv<W: Write>(histograms: &[LatencyHistogram], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["series", "unit", "bin", "lower", "upper", "count"])?;
    for h in histograms {
        for (i, bin) in h.bins.iter().enumerate() {
            wtr.write_record([
                h.series.column().to_string(),
                h.series.unit().to_string(),
                i.to_string(),
                float_cell(bin.lower),
                float_cell(bin.upper),
                bin.count.to_string(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bins_cover_range_with_closed_last_bin() {
        let h = LatencyHistogram::from_values(LatencySeries::QuoteInternal, &[0.0, 5.0, 10.0], 2);
        assert_eq!(h.bins.len(), 2);
        assert_eq!(h.bins[0].lower, 0.0);
        assert_eq!(h.bins[0].upper, 5.0);
        assert_eq!(h.bins[1].upper, 10.0);
        // 5.0 opens the second bin, 10.0 is included in it
        assert_eq!(h.bins[0].count, 1);
        assert_eq!(h.bins[1].count, 2);
    }

    #[test]
    fn test_degenerate_range_is_widened() {
        let h = LatencyHistogram::from_values(LatencySeries::CancelInternal, &[7.0; 4], 4);
        assert_eq!(h.bins[0].lower, 6.5);
        assert_eq!(h.bins[3].upper, 7.5);
        assert_eq!(h.bins.iter().map(|b| b.count).sum::<u64>(), 4);
        let s = h.summary.unwrap();
        assert_eq!((s.min, s.max, s.p90, s.p99), (7.0, 7.0, 7.0, 7.0));
    }

    #[test]
    fn test_percentiles_interpolate() {
        let values: Vec<f64> = (0..=100).map(f64::from).collect();
        let h = LatencyHistogram::from_values(LatencySeries::QuoteInternal, &values, 10);
        let s = h.summary.unwrap();
        assert!((s.p90 - 90.0).abs() < 1e-9);
        assert!((s.p99 - 99.0).abs() < 1e-9);
        assert_eq!(s.mean, 50.0);
    }

    #[test]
    fn test_empty_series_has_no_data() {
        let h = LatencyHistogram::from_values(LatencySeries::QuoteExternal, &[], 200);
        assert!(h.is_empty());
        assert!(h.bins.is_empty());
    }

    #[test]
    fn test_external_series_scaled_to_ms() {
        let lifecycles = vec![
            QuoteLifecycle {
                quote_internal_us: Some(12.0),
                quote_external_us: Some(2500.0),
                ..Default::default()
            },
            QuoteLifecycle {
                quote_internal_us: Some(18.0),
                quote_external_us: Some(3500.0),
                ..Default::default()
            },
        ];
        let hs = build_latency_histograms(&lifecycles, 5);
        assert_eq!(hs.len(), 4);

        let internal = hs[0].summary.as_ref().unwrap();
        assert_eq!((internal.min, internal.max), (12.0, 18.0));
        let external = hs[2].summary.as_ref().unwrap();
        assert_eq!((external.min, external.max), (2.5, 3.5));
        assert!(hs[1].is_empty());
        assert!(hs[3].is_empty());

        let text = render_histograms(&hs);
        assert!(text.contains("Cancel Internal Latency (μs): (no data)"));
        assert!(text.contains("Quote Ack Latency (ms)\n"));
    }

    #[test]
    fn test_csv_skips_empty_series() {
        let h = vec![
            LatencyHistogram::from_values(LatencySeries::QuoteInternal, &[1.0, 2.0], 2),
            LatencyHistogram::from_values(LatencySeries::CancelInternal, &[], 2),
        ];
        let mut buf = Vec::new();
        export_histograms_csv(&h, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "series,unit,bin,lower,upper,count\n\
             quote_internal_us,μs,0,1,1.5,1\n\
             quote_internal_us,μs,1,1.5,2,1\n"
        );
    }
}
