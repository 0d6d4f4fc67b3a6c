//! Quote lifecycle reconstruction.
//!
//! Joins the quote, cancel, fill and acknowledgment-report events that share a
//! `client_order_id` into one row per quote:
//!
//! ```text
//!   quote ──┬── cancel          (last cancel per order)
//!           ├── fills           (last ts, last price, summed qty)
//!           ├── cancel_ack      (latest report per order)
//!           └── quote_ack       (latest report per order)
//! ```
//!
//! A latency that is logged directly on an event and also carried by an
//! acknowledgment report is resolved with [`first_non_missing`]: the direct
//! value wins and the report only fills gaps.

use std::collections::HashMap;
use std::io::Write;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::output::{opt_float_cell, ts_cell};
use crate::table::{Event, EventTable, EventType};

/// Report feed label for cancel acknowledgments.
pub const CANCEL_ACK_FEED: &str = "cancel_ack";
/// Report feed label for quote acknowledgments.
pub const QUOTE_ACK_FEED: &str = "quote_ack";

const UNKNOWN_SIDE: &str = "unknown";

/// First defined value in precedence order.
pub fn first_non_missing<T: Copy>(candidates: &[Option<T>]) -> Option<T> {
    candidates.iter().find_map(|c| *c)
}

/// One quote and everything later learned about its order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuoteLifecycle {
    pub exchange: String,
    pub feed: String,
    pub client_order_id: Option<String>,
    pub side: String,

    pub quote_ts_ns: i64,
    pub quote_price: Option<f64>,
    pub quote_size: Option<f64>,
    pub quote_reference_ts_ns: Option<i64>,
    pub quote_reference_price: Option<f64>,
    pub quote_reference_source: Option<String>,
    pub quote_internal_us: Option<f64>,
    pub quote_external_us: Option<f64>,
    pub quote_ack_ts_ns: Option<i64>,

    pub cancel_ts_ns: Option<i64>,
    pub cancel_price: Option<f64>,
    pub cancel_reference_ts_ns: Option<i64>,
    pub cancel_reference_price: Option<f64>,
    pub cancel_reference_source: Option<String>,
    pub cancel_internal_us: Option<f64>,
    pub cancel_external_us: Option<f64>,
    pub cancel_ack_ts_ns: Option<i64>,

    pub fill_ts_ns: Option<i64>,
    pub fill_price: Option<f64>,
    pub fill_qty: Option<f64>,
}

// =============================================================================
// JOIN INPUTS
// =============================================================================

/// Fills for one order folded in time order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct FillAggregate {
    last_ts_ns: i64,
    last_price: Option<f64>,
    total_qty: Option<f64>,
}

impl FillAggregate {
    fn absorb(&mut self, fill: &Event) {
        self.last_ts_ns = fill.ts_ns;
        if fill.price.is_some() {
            self.last_price = fill.price;
        }
        if let Some(size) = fill.size {
            self.total_qty = Some(self.total_qty.unwrap_or(0.0) + size);
        }
    }
}

/// Keyed join inputs, built once per reconstruction.
#[derive(Default)]
struct OrderIndex<'a> {
    cancels: HashMap<&'a str, &'a Event>,
    fills: HashMap<&'a str, FillAggregate>,
    cancel_acks: HashMap<&'a str, &'a Event>,
    quote_acks: HashMap<&'a str, &'a Event>,
}

impl<'a> OrderIndex<'a> {
    /// `events` must be in ascending time order; later events overwrite.
    fn build(events: &[&'a Event]) -> Self {
        let mut index = Self::default();
        for &event in events {
            let Some(order_id) = event.client_order_id.as_deref() else {
                continue;
            };
            match event.event_type {
                Some(EventType::Cancel) => {
                    index.cancels.insert(order_id, event);
                }
                Some(EventType::Fill) => {
                    index.fills.entry(order_id).or_default().absorb(event);
                }
                Some(EventType::Report) if event.feed == CANCEL_ACK_FEED => {
                    index.cancel_acks.insert(order_id, event);
                }
                Some(EventType::Report) if event.feed == QUOTE_ACK_FEED => {
                    index.quote_acks.insert(order_id, event);
                }
                _ => {}
            }
        }
        index
    }
}

// =============================================================================
// RECONSTRUCTION
// =============================================================================

/// One row per quote event, ordered by quote timestamp.
///
/// Quotes without an order id are kept with empty join columns.
pub fn build_quote_lifecycles(table: &EventTable) -> Vec<QuoteLifecycle> {
    let mut by_time: Vec<&Event> = table.events().iter().collect();
    by_time.sort_by_key(|e| e.ts_ns);
    let index = OrderIndex::build(&by_time);

    let lifecycles: Vec<QuoteLifecycle> = by_time
        .iter()
        .filter(|e| e.event_type == Some(EventType::Quote))
        .map(|quote| reconstruct(quote, &index))
        .collect();

    debug!(
        quotes = lifecycles.len(),
        cancels = index.cancels.len(),
        filled_orders = index.fills.len(),
        cancel_acks = index.cancel_acks.len(),
        quote_acks = index.quote_acks.len(),
        "reconstructed quote lifecycles"
    );
    lifecycles
}

fn reconstruct(quote: &Event, index: &OrderIndex<'_>) -> QuoteLifecycle {
    let order_id = quote.client_order_id.as_deref();
    let cancel = lookup(&index.cancels, order_id);
    let cancel_ack = lookup(&index.cancel_acks, order_id);
    let quote_ack = lookup(&index.quote_acks, order_id);
    let fill = order_id.and_then(|id| index.fills.get(id).copied());

    QuoteLifecycle {
        exchange: quote.exchange.clone(),
        feed: quote.feed.clone(),
        client_order_id: quote.client_order_id.clone(),
        side: quote
            .side
            .clone()
            .unwrap_or_else(|| UNKNOWN_SIDE.to_string()),

        quote_ts_ns: quote.ts_ns,
        quote_price: quote.price,
        quote_size: quote.size,
        quote_reference_ts_ns: quote.reference_ts_ns,
        quote_reference_price: quote.reference_price,
        quote_reference_source: quote.reference_source.clone(),
        quote_internal_us: quote.quote_internal_us,
        quote_external_us: first_non_missing(&[
            quote.quote_external_us,
            quote_ack.and_then(|r| r.quote_external_us),
        ]),
        quote_ack_ts_ns: quote_ack.map(|r| r.ts_ns),

        cancel_ts_ns: cancel.map(|c| c.ts_ns),
        cancel_price: cancel.and_then(|c| c.price),
        cancel_reference_ts_ns: cancel.and_then(|c| c.reference_ts_ns),
        cancel_reference_price: cancel.and_then(|c| c.reference_price),
        cancel_reference_source: cancel.and_then(|c| c.reference_source.clone()),
        cancel_internal_us: first_non_missing(&[
            cancel.and_then(|c| c.cancel_internal_us),
            quote.cancel_internal_us,
        ]),
        cancel_external_us: first_non_missing(&[
            cancel.and_then(|c| c.cancel_external_us),
            quote.cancel_external_us,
            cancel_ack.and_then(|r| r.cancel_external_us),
        ]),
        cancel_ack_ts_ns: cancel_ack.map(|r| r.ts_ns),

        fill_ts_ns: fill.map(|f| f.last_ts_ns),
        fill_price: fill.and_then(|f| f.last_price),
        fill_qty: fill.and_then(|f| f.total_qty),
    }
}

fn lookup<'a>(map: &HashMap<&'a str, &'a Event>, order_id: Option<&str>) -> Option<&'a Event> {
    order_id.and_then(|id| map.get(id).copied())
}

// =============================================================================
// EXPORT
// =============================================================================

const LIFECYCLE_HEADER: [&str; 24] = [
    "exchange",
    "feed",
    "client_order_id",
    "side",
    "quote_dt",
    "quote_price",
    "quote_size",
    "quote_ref_dt",
    "quote_reference_price",
    "quote_reference_source",
    "quote_internal_us",
    "quote_external_us",
    "quote_ack_dt",
    "cancel_dt",
    "cancel_price",
    "cancel_ref_dt",
    "cancel_reference_price",
    "cancel_reference_source",
    "cancel_internal_us",
    "cancel_external_us",
    "cancel_ack_dt",
    "fill_dt",
    "fill_price",
    "fill_qty",
];

/// Export lifecycles as CSV with RFC 3339 timestamps.
pub fn export_lifecycles_csv<W: Write>(lifecycles: &[QuoteLifecycle], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(LIFECYCLE_HEADER)?;
    for l in lifecycles {
        wtr.write_record([
            l.exchange.clone(),
            l.feed.clone(),
            l.client_order_id.clone().unwrap_or_default(),
            l.side.clone(),
            ts_cell(Some(l.quote_ts_ns)),
            opt_float_cell(l.quote_price),
            opt_float_cell(l.quote_size),
            ts_cell(l.quote_reference_ts_ns),
            opt_float_cell(l.quote_reference_price),
            l.quote_reference_source.clone().unwrap_or_default(),
            opt_float_cell(l.quote_internal_us),
            opt_float_cell(l.quote_external_us),
            ts_cell(l.quote_ack_ts_ns),
            ts_cell(l.cancel_ts_ns),
            opt_float_cell(l.cancel_price),
            ts_cell(l.cancel_reference_ts_ns),
            opt_float_cell(l.cancel_reference_price),
            l.cancel_reference_source.clone().unwrap_or_default(),
            opt_float_cell(l.cancel_internal_us),
            opt_float_cell(l.cancel_external_us),
            ts_cell(l.cancel_ack_ts_ns),
            ts_cell(l.fill_ts_ns),
            opt_float_cell(l.fill_price),
            opt_float_cell(l.fill_qty),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
