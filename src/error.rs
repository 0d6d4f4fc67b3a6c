//! Fatal analysis errors.
//!
//! Anything that can be expressed as "this value is undefined" is carried as
//! `Option::None` through the pipeline instead. Only preconditions that make
//! the whole run meaningless end up here.

use std::path::PathBuf;

/// Errors that abort an analysis run.
#[derive(Debug)]
pub enum AnalysisError {
    /// Input log does not exist.
    InputNotFound { path: PathBuf },
    /// One or more required columns are absent from the header.
    MissingColumns { columns: Vec<&'static str> },
    /// Malformed CSV (bad quoting, unreadable record, ...).
    Csv(csv::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    /// Configuration rejected by `validate()`.
    InvalidConfig { field: &'static str, reason: String },
    /// No row has a successor within the horizon.
    NoRowsAfterHorizon { horizon_ms: f64 },
    /// Every row was missing at least one regression input.
    NoRegressionRows { required: Vec<String> },
    /// Least-squares solve rejected the design matrix.
    SolveFailed { reason: String },
    /// No quote events survived loading and filtering.
    NoLifecycleData,
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputNotFound { path } => {
                write!(f, "input file not found: {}", path.display())
            }
            Self::MissingColumns { columns } => {
                write!(f, "expected columns not present: {}", columns.join(", "))
            }
            Self::Csv(err) => write!(f, "csv error: {}", err),
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Json(err) => write!(f, "json error: {}", err),
            Self::InvalidConfig { field, reason } => {
                write!(f, "invalid config value for {}: {}", field, reason)
            }
            Self::NoRowsAfterHorizon { horizon_ms } => {
                write!(
                    f,
                    "no rows have a next update within the {} ms horizon",
                    horizon_ms
                )
            }
            Self::NoRegressionRows { required } => {
                write!(
                    f,
                    "no data remaining after dropping rows missing any of: {}",
                    required.join(", ")
                )
            }
            Self::SolveFailed { reason } => write!(f, "least-squares solve failed: {}", reason),
            Self::NoLifecycleData => write!(f, "no quote lifecycle data found"),
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Csv(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<csv::Error> for AnalysisError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_names_columns() {
        let err = AnalysisError::MissingColumns {
            columns: vec!["exchange", "ts_ns"],
        };
        assert_eq!(
            err.to_string(),
            "expected columns not present: exchange, ts_ns"
        );
    }

    #[test]
    fn test_io_error_has_source() {
        let err: AnalysisError =
            std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
