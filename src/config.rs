//! Run configuration.
//!
//! Both configs can be loaded from a TOML file and then overridden field by
//! field from the command line. Every field has a default so a partial file
//! (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AnalysisError, Result};
use crate::histogram::DEFAULT_BINS;

/// Default input written by the activity logger.
pub const DEFAULT_INPUT: &str = "logs/gate_activity.csv";

/// Configuration for the latency-effect / weighting analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// CSV log to analyse
    pub input: PathBuf,
    /// Optional cap on records read (for faster iteration)
    pub limit: Option<usize>,
    /// Max distance (ms) to the next update used as ground truth
    pub horizon_ms: f64,
    /// Minimum samples per exchange/feed group required for heuristics
    pub min_samples: usize,
    /// Slow/fast error ratio at or above which a skip threshold is recommended
    pub skip_ratio: f64,
    /// Per-group summary CSV
    pub output_summary: Option<PathBuf>,
    /// Regression coefficient CSV
    pub output_regression: Option<PathBuf>,
    /// Full run report as JSON
    pub output_report: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            limit: None,
            horizon_ms: 1000.0,
            min_samples: 2000,
            skip_ratio: 1.25,
            output_summary: None,
            output_regression: None,
            output_report: None,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.horizon_ms.is_finite() || self.horizon_ms <= 0.0 {
            return Err(AnalysisError::InvalidConfig {
                field: "horizon_ms",
                reason: format!("must be a positive number, got {}", self.horizon_ms),
            });
        }
        if !self.skip_ratio.is_finite() || self.skip_ratio <= 0.0 {
            return Err(AnalysisError::InvalidConfig {
                field: "skip_ratio",
                reason: format!("must be a positive number, got {}", self.skip_ratio),
            });
        }
        if self.limit == Some(0) {
            return Err(AnalysisError::InvalidConfig {
                field: "limit",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for quote lifecycle reconstruction and latency histograms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub input: PathBuf,
    pub limit: Option<usize>,
    /// Keep only this exchange (compared lowercased)
    pub exchange: Option<String>,
    /// Number of equal-width histogram bins
    pub bins: usize,
    /// Histogram bin counts as CSV
    pub output_histograms: Option<PathBuf>,
    /// Reconstructed lifecycle table as CSV
    pub output_lifecycles: Option<PathBuf>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            limit: None,
            exchange: None,
            bins: DEFAULT_BINS,
            output_histograms: None,
            output_lifecycles: None,
        }
    }
}

impl LifecycleConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bins == 0 {
            return Err(AnalysisError::InvalidConfig {
                field: "bins",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.limit == Some(0) {
            return Err(AnalysisError::InvalidConfig {
                field: "limit",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }

    /// Normalized exchange filter, matching how the loader normalizes labels.
    pub fn exchange_filter(&self) -> Option<String> {
        self.exchange
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }
}

fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| AnalysisError::InvalidConfig {
        field: "config file",
        reason: format!("{}: {}", path.display(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.horizon_ms, 1000.0);
        assert_eq!(config.min_samples, 2000);
        assert_eq!(config.skip_ratio, 1.25);
        assert!(config.validate().is_ok());
        assert_eq!(LifecycleConfig::default().bins, 200);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AnalysisConfig = toml::from_str("horizon_ms = 250.0\nmin_samples = 10\n").unwrap();
        assert_eq!(config.horizon_ms, 250.0);
        assert_eq!(config.min_samples, 10);
        assert_eq!(config.skip_ratio, 1.25);
        assert_eq!(config.input, PathBuf::from(DEFAULT_INPUT));
    }

    #[test]
    fn test_rejects_non_positive_horizon() {
        let config = AnalysisConfig {
            horizon_ms: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidConfig { field: "horizon_ms", .. })
        ));

        let config = AnalysisConfig {
            horizon_ms: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_bins() {
        let config = LifecycleConfig {
            bins: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exchange_filter_is_normalized() {
        let config = LifecycleConfig {
            exchange: Some("  Gate ".to_string()),
            ..Default::default()
        };
        assert_eq!(config.exchange_filter().as_deref(), Some("gate"));
    }
}
