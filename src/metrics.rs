use crate::clock::ticks_to_micros;
use crate::error::Result;
use crate::worker::LatencyKind;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Summary statistics of a latency distribution, in ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub kind: LatencyKind,
    pub samples: u64,
    pub min_ticks: u64,
    pub max_ticks: u64,
    pub mean_ticks: f64,
    pub std_dev_ticks: f64,
    pub percentiles: Vec<PercentileValue>,
}

/// Percentile value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_ticks: u64,
}

impl LatencySummary {
    pub fn mean_micros(&self) -> f64 {
        self.mean_ticks / crate::clock::TICKS_PER_MICRO as f64
    }

    pub fn percentile(&self, percentile: f64) -> Option<u64> {
        self.percentiles
            .iter()
            .find(|p| (p.percentile - percentile).abs() < f64::EPSILON)
            .map(|p| p.value_ticks)
    }
}

/// HDR histogram of latency ticks for one sample kind.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
    kind: LatencyKind,
}

impl LatencyHistogram {
    /// Create an auto-resizing histogram with 3 significant figures.
    pub fn new(kind: LatencyKind) -> Result<Self> {
        let histogram = Histogram::<u64>::new(3)?;
        Ok(Self { histogram, kind })
    }

    pub fn kind(&self) -> LatencyKind {
        self.kind
    }

    pub fn record(&mut self, ticks: u64) -> Result<()> {
        self.histogram.record(ticks)?;
        Ok(())
    }

    /// Fold another histogram of the same kind into this one.
    pub fn merge(&mut self, other: &LatencyHistogram) -> Result<()> {
        self.histogram.add(&other.histogram)?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    pub fn summary(&self, percentiles: &[f64]) -> LatencySummary {
        if self.histogram.is_empty() {
            return LatencySummary {
                kind: self.kind,
                samples: 0,
                min_ticks: 0,
                max_ticks: 0,
                mean_ticks: 0.0,
                std_dev_ticks: 0.0,
                percentiles: Vec::new(),
            };
        }

        let percentiles = percentiles
            .iter()
            .map(|&p| PercentileValue {
                percentile: p,
                value_ticks: self.histogram.value_at_percentile(p),
            })
            .collect();

        LatencySummary {
            kind: self.kind,
            samples: self.histogram.len(),
            min_ticks: self.histogram.min(),
            max_ticks: self.histogram.max(),
            mean_ticks: self.histogram.mean(),
            std_dev_ticks: self.histogram.stdev(),
            percentiles,
        }
    }

    pub fn reset(&mut self) {
        self.histogram.reset();
    }
}

/// Utility functions for latency display
pub mod utils {
    use super::*;

    /// Format a tick count for human-readable output
    pub fn format_latency(ticks: u64) -> String {
        let micros = ticks_to_micros(ticks);
        if micros < 1.0 {
            format!("{}ns", ticks)
        } else if micros < 1_000.0 {
            format!("{:.2}μs", micros)
        } else if micros < 1_000_000.0 {
            format!("{:.2}ms", micros / 1_000.0)
        } else {
            format!("{:.2}s", micros / 1_000_000.0)
        }
    }

    /// One-line rendering of a summary for logs and the console report
    pub fn format_summary(summary: &LatencySummary) -> String {
        if summary.samples == 0 {
            return format!("{}: no samples", summary.kind);
        }
        let mut line = format!(
            "{}: {} samples, mean {}, min {}, max {}",
            summary.kind,
            summary.samples,
            format_latency(summary.mean_ticks as u64),
            format_latency(summary.min_ticks),
            format_latency(summary.max_ticks),
        );
        for p in &summary.percentiles {
            line.push_str(&format!(", p{} {}", p.percentile, format_latency(p.value_ticks)));
        }
        line
    }
}
