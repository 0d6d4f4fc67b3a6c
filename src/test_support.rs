//! Builders shared by unit test suites.

use crate::features::LatencyFeatureRow;

/// Feature row with a given relative engine latency and absolute error.
///
/// The raw engine latency mirrors the relative one (median 0).
pub fn feature_row(
    exchange: &str,
    feed: &str,
    rel_latency_ms: Option<f64>,
    abs_error_bps: Option<f64>,
) -> LatencyFeatureRow {
    LatencyFeatureRow {
        exchange: exchange.to_string(),
        feed: feed.to_string(),
        ts_ns: 0,
        price: Some(100.0),
        next_ts_ns: 1_000_000,
        next_price: Some(100.0),
        future_dt_ms: 1.0,
        signed_return_bps: abs_error_bps,
        abs_error_bps,
        latency_engine_ms: rel_latency_ms,
        latency_system_ms: None,
        source_pipeline_ms: None,
        latency_sent_ms: None,
        latency_engine_ms_rel: rel_latency_ms,
        latency_system_ms_rel: None,
        latency_sent_ms_rel: None,
    }
}
