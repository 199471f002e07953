//! Session result summary
//!
//! Reduces the raw results ring to an average and standard deviation over the
//! positive entries, and grades the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum standard deviation relative to the average for a trustworthy run
const MAX_DEVIATION_RATIO: f64 = 0.15;

/// Average above which the device is graded poor (ms)
const POOR_THRESHOLD_MS: f64 = 40.0;

/// Average above which the device is graded medium (ms)
const MEDIUM_THRESHOLD_MS: f64 = 20.0;

/// Latency grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Great,
    Medium,
    Poor,
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Rating::Great => "great",
            Rating::Medium => "medium",
            Rating::Poor => "poor",
        };
        f.write_str(label)
    }
}

/// Average and spread of one session's latencies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Mean latency (ms)
    pub avg_ms: f64,
    /// Population standard deviation (ms)
    pub std_dev_ms: f64,
    /// Number of positive results averaged
    pub valid_samples: usize,
}

impl LatencySummary {
    /// Summarize results, ignoring zero (unused) and negative slots
    ///
    /// Returns `None` when no positive result exists.
    ///
    /// # Example
    /// ```
    /// use latencytest_core::stats::summary::LatencySummary;
    ///
    /// let summary = LatencySummary::from_results(&[10, 12, 14, 0, 0]).unwrap();
    /// assert_eq!(summary.valid_samples, 3);
    /// assert!((summary.avg_ms - 12.0).abs() < 1e-9);
    /// ```
    pub fn from_results(results: &[i64]) -> Option<Self> {
        let valid: Vec<f64> = results
            .iter()
            .filter(|&&r| r > 0)
            .map(|&r| r as f64)
            .collect();

        if valid.is_empty() {
            return None;
        }

        let n = valid.len() as f64;
        let avg_ms = valid.iter().sum::<f64>() / n;
        let variance = valid.iter().map(|r| (r - avg_ms).powi(2)).sum::<f64>() / n;

        Some(Self {
            avg_ms,
            std_dev_ms: variance.sqrt(),
            valid_samples: valid.len(),
        })
    }

    /// Spread is small enough relative to the average to trust the run
    pub fn is_consistent(&self) -> bool {
        self.avg_ms > 0.0 && self.std_dev_ms / self.avg_ms < MAX_DEVIATION_RATIO
    }

    /// Grade the average latency
    pub fn rating(&self) -> Rating {
        if self.avg_ms > POOR_THRESHOLD_MS {
            Rating::Poor
        } else if self.avg_ms > MEDIUM_THRESHOLD_MS {
            Rating::Medium
        } else {
            Rating::Great
        }
    }
}

/// Everything known about one finished session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyReport {
    /// When the report was produced
    pub measured_at: DateTime<Utc>,
    /// Device description from the host, if known
    pub device: Option<String>,
    /// Raw results ring (unused slots are 0)
    pub results: Vec<i64>,
    /// Onsets detected, including those past ring capacity
    pub onset_count: usize,
    /// More onsets occurred than the ring holds
    pub truncated: bool,
    /// Aggregate, absent when nothing was detected
    pub summary: Option<LatencySummary>,
    /// Whether the spread is small enough to trust
    pub consistent: bool,
    /// Grade of the average latency
    pub rating: Option<Rating>,
}

impl LatencyReport {
    /// Build a report from a results snapshot
    pub fn new(device: Option<String>, results: Vec<i64>, onset_count: usize) -> Self {
        let summary = LatencySummary::from_results(&results);
        Self {
            measured_at: Utc::now(),
            device,
            truncated: onset_count > results.len(),
            onset_count,
            consistent: summary.map(|s| s.is_consistent()).unwrap_or(false),
            rating: summary.map(|s| s.rating()),
            summary,
            results,
        }
    }
}
