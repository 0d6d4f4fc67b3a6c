//! Latency Weighting Library
//!
//! Offline analysis of engine activity logs: how much update latency degrades
//! short-horizon price accuracy, and what per exchange/feed decay weight and
//! skip threshold follow from that. Also reconstructs per-order quote
//! lifecycles for latency distribution analysis.
//!
//! Binaries:
//! - `latency_weighting`: regression + weighting policy
//! - `lifecycle_histograms`: quote lifecycle latency distributions

pub mod config;
pub mod error;
pub mod features;
pub mod histogram;
pub mod lifecycle;
pub mod output;
pub mod pipeline;
pub mod regression;
pub mod report;
pub mod stats;
pub mod summary;
pub mod table;
pub mod weighting;

pub use config::{AnalysisConfig, LifecycleConfig};
pub use error::{AnalysisError, Result};
pub use pipeline::{run_analysis, run_lifecycle, AnalysisRun, LifecycleRun};

#[cfg(test)]
mod test_support;
