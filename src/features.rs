//! Forward-looking price error targets and latency features.
//!
//! # Targets
//!
//! Within each exchange (events ascending in time) every event is compared with
//! the next event of the same exchange:
//!
//! ```text
//! future_dt_ms      = (next.ts_ns - ts_ns) / 1e6
//! signed_return_bps = (next.price - price) / price * 1e4
//! abs_error_bps     = |signed_return_bps|
//! ```
//!
//! Only events with `0 < future_dt_ms <= horizon_ms` are retained. This drops
//! the last event of every exchange and any gap too wide to be an informative
//! near-term comparator.
//!
//! # Latencies
//!
//! ```text
//! latency_engine_ms  = ts - source_engine_ts
//! latency_system_ms  = ts - source_system_ts
//! source_pipeline_ms = source_system_ts - source_engine_ts
//! latency_sent_ms    = ts - sent_ts
//! ```
//!
//! Each receipt latency also has a `_rel` form: the value minus the median of
//! that latency over the retained rows of the same exchange. This removes fixed
//! per-venue transport and clock offsets, so relative latencies are comparable
//! across exchanges.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::stats;
use crate::table::{ColumnSet, Event, EventTable};

/// Nanoseconds per millisecond.
pub const NS_PER_MS: f64 = 1e6;
/// Basis points per unit return.
pub const BPS_PER_UNIT: f64 = 1e4;

// =============================================================================
// FEATURE ROW
// =============================================================================

/// One retained event with its target and latency features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyFeatureRow {
    pub exchange: String,
    pub feed: String,
    pub ts_ns: i64,
    pub price: Option<f64>,
    pub next_ts_ns: i64,
    pub next_price: Option<f64>,

    /// Always within `(0, horizon_ms]` for retained rows
    pub future_dt_ms: f64,
    pub signed_return_bps: Option<f64>,
    pub abs_error_bps: Option<f64>,

    pub latency_engine_ms: Option<f64>,
    pub latency_system_ms: Option<f64>,
    pub source_pipeline_ms: Option<f64>,
    pub latency_sent_ms: Option<f64>,

    pub latency_engine_ms_rel: Option<f64>,
    pub latency_system_ms_rel: Option<f64>,
    pub latency_sent_ms_rel: Option<f64>,
}

/// Named numeric column of a [`LatencyFeatureRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    LatencyEngineMs,
    LatencyEngineMsRel,
    LatencySystemMs,
    LatencySystemMsRel,
    SourcePipelineMs,
    LatencySentMs,
    LatencySentMsRel,
    FutureDtMs,
    SignedReturnBps,
    AbsErrorBps,
}

/// Numeric regressors used by the weighting analysis.
pub const DEFAULT_FEATURES: [Feature; 6] = [
    Feature::LatencyEngineMs,
    Feature::LatencyEngineMsRel,
    Feature::LatencySystemMs,
    Feature::LatencySystemMsRel,
    Feature::SourcePipelineMs,
    Feature::FutureDtMs,
];

/// Regression target.
pub const TARGET: Feature = Feature::AbsErrorBps;

impl Feature {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LatencyEngineMs => "latency_engine_ms",
            Self::LatencyEngineMsRel => "latency_engine_ms_rel",
            Self::LatencySystemMs => "latency_system_ms",
            Self::LatencySystemMsRel => "latency_system_ms_rel",
            Self::SourcePipelineMs => "source_pipeline_ms",
            Self::LatencySentMs => "latency_sent_ms",
            Self::LatencySentMsRel => "latency_sent_ms_rel",
            Self::FutureDtMs => "future_dt_ms",
            Self::SignedReturnBps => "signed_return_bps",
            Self::AbsErrorBps => "abs_error_bps",
        }
    }

    pub fn value(&self, row: &LatencyFeatureRow) -> Option<f64> {
        match self {
            Self::LatencyEngineMs => row.latency_engine_ms,
            Self::LatencyEngineMsRel => row.latency_engine_ms_rel,
            Self::LatencySystemMs => row.latency_system_ms,
            Self::LatencySystemMsRel => row.latency_system_ms_rel,
            Self::SourcePipelineMs => row.source_pipeline_ms,
            Self::LatencySentMs => row.latency_sent_ms,
            Self::LatencySentMsRel => row.latency_sent_ms_rel,
            Self::FutureDtMs => Some(row.future_dt_ms),
            Self::SignedReturnBps => row.signed_return_bps,
            Self::AbsErrorBps => row.abs_error_bps,
        }
    }

    /// Whether the input carried the columns this feature is derived from.
    pub fn is_available(&self, columns: &ColumnSet) -> bool {
        match self {
            Self::LatencyEngineMs | Self::LatencyEngineMsRel => columns.source_engine_ts,
            Self::LatencySystemMs | Self::LatencySystemMsRel => columns.source_system_ts,
            Self::SourcePipelineMs => columns.source_engine_ts && columns.source_system_ts,
            Self::LatencySentMs | Self::LatencySentMsRel => columns.sent_ts,
            Self::FutureDtMs => true,
            Self::SignedReturnBps | Self::AbsErrorBps => columns.price,
        }
    }
}

/// Feature rows for one run plus the input column layout.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub rows: Vec<LatencyFeatureRow>,
    pub columns: ColumnSet,
    pub horizon_ms: f64,
}

impl FeatureSet {
    /// Whether grouping should use `(exchange, feed)` or `exchange` alone.
    pub fn has_feed(&self) -> bool {
        self.columns.feed
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The subset of `wanted` whose source columns exist, order preserved.
    pub fn available_features(&self, wanted: &[Feature]) -> Vec<Feature> {
        wanted
            .iter()
            .copied()
            .filter(|f| f.is_available(&self.columns))
            .collect()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Derive targets and latency features from an event table.
pub fn build_features(table: &EventTable, horizon_ms: f64) -> FeatureSet {
    let mut rows = Vec::with_capacity(table.len());
    for group in table.exchange_groups() {
        for pair in group.windows(2) {
            if let Some(row) = target_row(&pair[0], &pair[1], horizon_ms) {
                rows.push(row);
            }
        }
    }

    let medians = exchange_medians(&rows);
    for row in &mut rows {
        if let Some(m) = medians.get(&row.exchange) {
            row.latency_engine_ms_rel = relative(row.latency_engine_ms, m.engine);
            row.latency_system_ms_rel = relative(row.latency_system_ms, m.system);
            row.latency_sent_ms_rel = relative(row.latency_sent_ms, m.sent);
        }
    }

    debug!(
        events = table.len(),
        retained = rows.len(),
        exchanges = medians.len(),
        horizon_ms,
        "built latency features"
    );

    FeatureSet {
        rows,
        columns: *table.columns(),
        horizon_ms,
    }
}

fn target_row(current: &Event, next: &Event, horizon_ms: f64) -> Option<LatencyFeatureRow> {
    let future_dt_ms = next.ts_ns.checked_sub(current.ts_ns)? as f64 / NS_PER_MS;
    if !(future_dt_ms > 0.0 && future_dt_ms <= horizon_ms) {
        return None;
    }

    let signed_return_bps = match (current.price, next.price) {
        (Some(p), Some(np)) if p != 0.0 => {
            Some((np - p) / p * BPS_PER_UNIT).filter(|r| r.is_finite())
        }
        _ => None,
    };

    Some(LatencyFeatureRow {
        exchange: current.exchange.clone(),
        feed: current.feed.clone(),
        ts_ns: current.ts_ns,
        price: current.price,
        next_ts_ns: next.ts_ns,
        next_price: next.price,
        future_dt_ms,
        signed_return_bps,
        abs_error_bps: signed_return_bps.map(f64::abs),
        latency_engine_ms: span_ms(current.source_engine_ts_ns, Some(current.ts_ns)),
        latency_system_ms: span_ms(current.source_system_ts_ns, Some(current.ts_ns)),
        source_pipeline_ms: span_ms(current.source_engine_ts_ns, current.source_system_ts_ns),
        latency_sent_ms: span_ms(current.sent_ts_ns, Some(current.ts_ns)),
        latency_engine_ms_rel: None,
        latency_system_ms_rel: None,
        latency_sent_ms_rel: None,
    })
}

/// `(to - from)` in milliseconds.
fn span_ms(from_ns: Option<i64>, to_ns: Option<i64>) -> Option<f64> {
    Some(to_ns?.checked_sub(from_ns?)? as f64 / NS_PER_MS)
}

fn relative(value: Option<f64>, median: Option<f64>) -> Option<f64> {
    Some(value? - median?)
}

/// Per-exchange medians of each receipt latency.
#[derive(Debug, Clone, Copy, Default)]
struct LatencyMedians {
    engine: Option<f64>,
    system: Option<f64>,
    sent: Option<f64>,
}

fn exchange_medians(rows: &[LatencyFeatureRow]) -> BTreeMap<String, LatencyMedians> {
    #[derive(Default)]
    struct Samples {
        engine: Vec<f64>,
        system: Vec<f64>,
        sent: Vec<f64>,
    }

    let mut samples: BTreeMap<&str, Samples> = BTreeMap::new();
    for row in rows {
        let s = samples.entry(row.exchange.as_str()).or_default();
        s.engine.extend(row.latency_engine_ms);
        s.system.extend(row.latency_system_ms);
        s.sent.extend(row.latency_sent_ms);
    }

    samples
        .into_iter()
        .map(|(exchange, s)| {
            (
                exchange.to_string(),
                LatencyMedians {
                    engine: stats::median(&s.engine),
                    system: stats::median(&s.system),
                    sent: stats::median(&s.sent),
                },
            )
        })
        .collect()
}
