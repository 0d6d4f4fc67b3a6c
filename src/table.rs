//! In-memory event table for one analysis run.
//!
//! The activity log is a flat CSV where every row is one engine event (market
//! update, quote, cancel, fill or acknowledgment report). Only `exchange` and
//! `ts_ns` are mandatory; every other column is optional and its presence is
//! recorded in [`ColumnSet`] so downstream components can degrade by omission.
//!
//! # Ordering
//!
//! After loading, events are stably sorted by `(exchange, ts_ns)`. Each
//! exchange therefore occupies one contiguous run of the table, ascending in
//! time. Cross-exchange order carries no meaning.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalysisError, Result};

/// Feed label used when the `feed` cell is empty.
pub const UNKNOWN_FEED: &str = "unknown";

/// Cell contents treated as missing, in addition to the empty string.
const NA_TOKENS: &[&str] = &["nan", "NaN", "NA", "N/A", "null", "NULL", "None"];

// =============================================================================
// EVENT
// =============================================================================

/// Kind of engine event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Market,
    Quote,
    Cancel,
    Fill,
    Report,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Quote => "quote",
            Self::Cancel => "cancel",
            Self::Fill => "fill",
            Self::Report => "report",
        }
    }

    /// Parse a logged event type. Unrecognized labels yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Some(Self::Market),
            "quote" => Some(Self::Quote),
            "cancel" => Some(Self::Cancel),
            "fill" => Some(Self::Fill),
            "report" => Some(Self::Report),
            _ => None,
        }
    }
}

/// One row of the activity log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub exchange: String,
    pub feed: String,
    pub event_type: Option<EventType>,
    /// Local receipt time (monotonic ns)
    pub ts_ns: i64,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub side: Option<String>,
    pub client_order_id: Option<String>,

    // Source timestamps
    pub source_engine_ts_ns: Option<i64>,
    pub source_system_ts_ns: Option<i64>,
    pub sent_ts_ns: Option<i64>,

    // Reference quote the event was priced against
    pub reference_ts_ns: Option<i64>,
    pub reference_price: Option<f64>,
    pub reference_source: Option<String>,

    // Directly logged order latencies (μs)
    pub quote_internal_us: Option<f64>,
    pub cancel_internal_us: Option<f64>,
    pub quote_external_us: Option<f64>,
    pub cancel_external_us: Option<f64>,
}

/// Which optional columns were present in the input header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSet {
    pub feed: bool,
    pub event_type: bool,
    pub price: bool,
    pub size: bool,
    pub side: bool,
    pub client_order_id: bool,
    pub source_engine_ts: bool,
    pub source_system_ts: bool,
    pub sent_ts: bool,
    pub reference_ts: bool,
    pub reference_price: bool,
    pub reference_source: bool,
    pub quote_internal_us: bool,
    pub cancel_internal_us: bool,
    pub quote_external_us: bool,
    pub cancel_external_us: bool,
}

// =============================================================================
// TABLE
// =============================================================================

/// Normalized, exchange-grouped event table.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    events: Vec<Event>,
    columns: ColumnSet,
}

impl EventTable {
    /// Build a table from events, enforcing the `(exchange, ts_ns)` ordering.
    pub fn new(mut events: Vec<Event>, columns: ColumnSet) -> Self {
        events.sort_by(|a, b| a.exchange.cmp(&b.exchange).then(a.ts_ns.cmp(&b.ts_ns)));
        Self { events, columns }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Contiguous per-exchange slices, in exchange order.
    pub fn exchange_groups(&self) -> ExchangeGroups<'_> {
        ExchangeGroups {
            rest: &self.events,
        }
    }

    /// Events of one kind, in table order.
    pub fn of_type(&self, kind: EventType) -> impl Iterator<Item = &Event> {
        self.events
            .iter()
            .filter(move |e| e.event_type == Some(kind))
    }

    /// New table restricted to one exchange.
    pub fn filter_exchange(&self, exchange: &str) -> EventTable {
        Self {
            events: self
                .events
                .iter()
                .filter(|e| e.exchange == exchange)
                .cloned()
                .collect(),
            columns: self.columns,
        }
    }
}

/// Iterator over the per-exchange runs of an [`EventTable`].
pub struct ExchangeGroups<'a> {
    rest: &'a [Event],
}

impl<'a> Iterator for ExchangeGroups<'a> {
    type Item = &'a [Event];

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.first()?;
        let end = self
            .rest
            .iter()
            .position(|e| e.exchange != first.exchange)
            .unwrap_or(self.rest.len());
        let (group, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(group)
    }
}

// =============================================================================
// LOADING
// =============================================================================

/// How labels and row counts are treated while reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Stop after this many records (before any row is dropped)
    pub limit: Option<usize>,
    /// Lowercase and trim exchange/feed/event_type/side/reference_source
    pub normalize_labels: bool,
}

impl LoadOptions {
    /// Labels verbatim, as used for the weighting analysis.
    pub fn analysis(limit: Option<usize>) -> Self {
        Self {
            limit,
            normalize_labels: false,
        }
    }

    /// Lowercased labels, as used for lifecycle reconstruction.
    pub fn lifecycle(limit: Option<usize>) -> Self {
        Self {
            limit,
            normalize_labels: true,
        }
    }
}

/// Load an activity log from disk.
pub fn load_event_table(path: &Path, options: LoadOptions) -> Result<EventTable> {
    if !path.exists() {
        return Err(AnalysisError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    read_event_table(file, options)
}

/// Read an activity log from any reader.
pub fn read_event_table<R: Read>(reader: R, options: LoadOptions) -> Result<EventTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let layout = HeaderLayout::from_headers(&headers)?;
    let columns = layout.column_set();

    let mut events = Vec::new();
    let mut read = 0usize;
    let mut dropped = 0usize;
    for record in rdr.records() {
        if options.limit.is_some_and(|limit| read >= limit) {
            break;
        }
        let record = record?;
        read += 1;
        match layout.parse_record(&record, options.normalize_labels) {
            Some(event) => events.push(event),
            None => dropped += 1,
        }
    }

    debug!(
        records = read,
        kept = events.len(),
        dropped,
        "loaded activity log"
    );
    Ok(EventTable::new(events, columns))
}

/// Column positions resolved from the header row.
struct HeaderLayout {
    exchange: usize,
    ts_ns: usize,
    optional: HashMap<&'static str, usize>,
}

const OPTIONAL_COLUMNS: &[&str] = &[
    "feed",
    "event_type",
    "price",
    "size",
    "side",
    "client_order_id",
    "source_engine_ts_ns",
    "source_system_ts_ns",
    "sent_ts_ns",
    "reference_ts_ns",
    "reference_price",
    "reference_source",
    "quote_internal_us",
    "cancel_internal_us",
    "quote_external_us",
    "cancel_external_us",
];

impl HeaderLayout {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);

        let exchange = find("exchange");
        let ts_ns = find("ts_ns");
        let (exchange, ts_ns) = match (exchange, ts_ns) {
            (Some(e), Some(t)) => (e, t),
            (e, t) => {
                let mut columns = Vec::new();
                if e.is_none() {
                    columns.push("exchange");
                }
                if t.is_none() {
                    columns.push("ts_ns");
                }
                return Err(AnalysisError::MissingColumns { columns });
            }
        };

        let optional = OPTIONAL_COLUMNS
            .iter()
            .filter_map(|&name| find(name).map(|idx| (name, idx)))
            .collect();

        Ok(Self {
            exchange,
            ts_ns,
            optional,
        })
    }

    fn column_set(&self) -> ColumnSet {
        let has = |name: &str| self.optional.contains_key(name);
        ColumnSet {
            feed: has("feed"),
            event_type: has("event_type"),
            price: has("price"),
            size: has("size"),
            side: has("side"),
            client_order_id: has("client_order_id"),
            source_engine_ts: has("source_engine_ts_ns"),
            source_system_ts: has("source_system_ts_ns"),
            sent_ts: has("sent_ts_ns"),
            reference_ts: has("reference_ts_ns"),
            reference_price: has("reference_price"),
            reference_source: has("reference_source"),
            quote_internal_us: has("quote_internal_us"),
            cancel_internal_us: has("cancel_internal_us"),
            quote_external_us: has("quote_external_us"),
            cancel_external_us: has("cancel_external_us"),
        }
    }

    /// `None` when the row lacks an exchange or a parseable timestamp.
    fn parse_record(&self, record: &csv::StringRecord, normalize: bool) -> Option<Event> {
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).and_then(non_missing);
        let opt = |name: &str| cell(self.optional.get(name).copied());
        let label = |raw: &str| {
            if normalize {
                raw.trim().to_lowercase()
            } else {
                raw.to_string()
            }
        };

        let exchange = label(cell(Some(self.exchange))?);
        let ts_ns = parse_ts(cell(Some(self.ts_ns))?)?;

        Some(Event {
            exchange,
            feed: opt("feed").map(label).unwrap_or_else(|| UNKNOWN_FEED.to_string()),
            event_type: opt("event_type").and_then(EventType::parse),
            ts_ns,
            price: opt("price").and_then(parse_f64),
            size: opt("size").and_then(parse_f64),
            side: opt("side").map(label),
            client_order_id: opt("client_order_id").map(|s| s.trim().to_string()),
            source_engine_ts_ns: opt("source_engine_ts_ns").and_then(parse_ts),
            source_system_ts_ns: opt("source_system_ts_ns").and_then(parse_ts),
            sent_ts_ns: opt("sent_ts_ns").and_then(parse_ts),
            reference_ts_ns: opt("reference_ts_ns").and_then(parse_ts),
            reference_price: opt("reference_price").and_then(parse_f64),
            reference_source: opt("reference_source").map(label),
            quote_internal_us: opt("quote_internal_us").and_then(parse_f64),
            cancel_internal_us: opt("cancel_internal_us").and_then(parse_f64),
            quote_external_us: opt("quote_external_us").and_then(parse_f64),
            cancel_external_us: opt("cancel_external_us").and_then(parse_f64),
        })
    }
}

fn non_missing(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || NA_TOKENS.contains(&trimmed) {
        None
    } else {
        Some(raw)
    }
}

fn parse_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Nanosecond timestamps are usually integers but some writers emit floats.
fn parse_ts(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| parse_f64(raw).map(|v| v.round() as i64))
}
