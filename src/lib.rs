//! # Consumer Perf Library
//!
//! The latency sample hand-off core of a consumer throughput/latency harness,
//! plus the harness around it.
//!
//! Each simulated consumer connection runs on its own worker thread and
//! records a latency sample for every update, post, and generic message it
//! handles. A single collector thread periodically drains those samples,
//! aggregates them into HDR histograms, writes per-connection logs, and hands
//! the sample objects back for reuse.
//!
//! ## Architecture Overview
//!
//! - `sample`: the `TimeSample` record
//! - `queue`: the pooled per-worker `SampleQueue` (submit / drain / recycle)
//! - `shutdown`: the two-flag request/acknowledge handshake
//! - `worker`: `WorkerContext`, everything one consumer shares with the collector
//! - `collector`: drain cycles, per-connection logs, worker retirement
//! - `harness`: worker threads, workloads, and run orchestration
//! - `metrics`: latency histograms and summaries
//! - `results`: the JSON run summary
//!
//! ## Usage Example
//!
//! ```rust
//! use consumer_perf::{LatencyKind, WorkerContext, worker::ItemAssignment};
//!
//! let ctx = WorkerContext::new(0, ItemAssignment::default());
//!
//! // Worker thread
//! ctx.submit(LatencyKind::Update, 100, 150, None).unwrap();
//!
//! // Collector thread
//! let queue = ctx.queue(LatencyKind::Update);
//! let mut total = 0;
//! queue.drain_with(|sample| total += sample.ticks());
//! assert_eq!(total, 50);
//! assert_eq!(queue.free_len(), 1);
//! ```
//!
//! ## Threading
//!
//! Workers and the collector are plain OS threads. The collector never blocks
//! on a worker: shutdown is requested and acknowledged through flags that
//! each side polls.

pub mod cli;

/// Monotonic tick source used for every timestamp in a sample.
pub mod clock;

/// Drain cycles, per-connection logging, and shutdown observation.
pub mod collector;

pub mod counters;

pub mod error;

/// Worker threads, workloads, and run orchestration.
pub mod harness;

pub mod log_writer;

pub mod logging;

/// Latency histograms and summaries
///
/// Wraps HDR histograms of tick deltas, one per latency kind, with
/// percentile summaries that serialize into the run summary.
pub mod metrics;

pub mod queue;

/// JSON run summary with system information for reproducibility.
pub mod results;

pub mod sample;

pub mod shutdown;

pub mod utils;

pub mod worker;

pub use collector::{Collector, CycleReport, WorkerReport};
pub use error::{Error, Result};
pub use harness::{Harness, HarnessConfig, SyntheticWorkload, Workload};
pub use queue::{PooledSample, QueueStats, SampleQueue};
pub use results::RunSummary;
pub use sample::TimeSample;
pub use shutdown::{ShutdownHandshake, ShutdownState};
pub use worker::{LatencyKind, WorkerContext, WorkerId};

/// The current version, recorded in every run summary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default number of consumer threads
    pub const WORKERS: usize = 4;

    /// Default number of items, split across the consumers
    pub const ITEM_COUNT: usize = 1000;

    /// Default run time before shutdown is requested
    pub const RUN_TIME: Duration = Duration::from_secs(10);

    /// Default interval between collection cycles
    pub const COLLECT_INTERVAL: Duration = Duration::from_secs(1);

    /// Default time allowed for consumers to acknowledge shutdown
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    /// Default updates per second per consumer
    pub const UPDATE_RATE: u64 = 1000;

    /// Default directory for per-connection logs
    pub const OUTPUT_DIR: &str = "consumer_logs";

    /// Default run summary file
    pub const SUMMARY_FILE: &str = "consumer_summary.json";
}
