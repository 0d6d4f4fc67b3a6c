//! Output helpers shared by the summary, coefficient and lifecycle writers.
//!
//! Undefined values are written as empty cells and floats use Rust's shortest
//! round-trip formatting, so re-running on identical input yields identical
//! bytes.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;

const NS_PER_SEC: i64 = 1_000_000_000;

/// Shortest round-trip rendering; non-finite values become empty cells.
pub fn float_cell(value: f64) -> String {
    if value.is_finite() {
        format!("{}", value)
    } else {
        String::new()
    }
}

pub fn opt_float_cell(value: Option<f64>) -> String {
    value.map(float_cell).unwrap_or_default()
}

pub fn opt_int_cell(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Nanosecond epoch timestamp as RFC 3339 (UTC, nanosecond precision).
pub fn ts_cell(ts_ns: Option<i64>) -> String {
    ts_ns
        .and_then(|ts| {
            let secs = ts.div_euclid(NS_PER_SEC);
            let nanos = ts.rem_euclid(NS_PER_SEC) as u32;
            DateTime::<Utc>::from_timestamp(secs, nanos)
        })
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .unwrap_or_default()
}

/// Create (or truncate) an output file, creating parent directories as needed.
pub fn create_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_cells() {
        assert_eq!(float_cell(1.5), "1.5");
        assert_eq!(float_cell(2.0), "2");
        assert_eq!(float_cell(f64::NAN), "");
        assert_eq!(opt_float_cell(None), "");
        assert_eq!(opt_int_cell(Some(-3)), "-3");
    }

    #[test]
    fn test_ts_cell_rfc3339() {
        assert_eq!(
            ts_cell(Some(1_700_000_000_123_456_789)),
            "2023-11-14T22:13:20.123456789Z"
        );
        assert_eq!(ts_cell(Some(0)), "1970-01-01T00:00:00.000000000Z");
        assert_eq!(ts_cell(None), "");
    }
}
