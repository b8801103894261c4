//! # Utility Functions and Helper Module
//!
//! Helpers shared by the harness and the binary:
//!
//! - **Formatting**: human-readable durations and rates
//! - **Validation**: configuration checks with clear error messages
//! - **Threads**: spawning consumer threads, optionally pinned to a core
//! - **System Information**: CPU detection and run identifiers
//!
//! ## Usage Examples
//!
//! ```rust
//! use consumer_perf::utils::*;
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_message_rate(2_500.0), "2.50K msg/s");
//!
//! validate_workers(4)?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Generate a unique identifier for a run
///
/// The identifier is recorded in the run summary so that log directories
/// and summaries from repeated runs can be told apart.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a message rate with K/M suffixes
pub fn format_message_rate(messages_per_second: f64) -> String {
    if messages_per_second < 1_000.0 {
        format!("{:.0} msg/s", messages_per_second)
    } else if messages_per_second < 1_000_000.0 {
        format!("{:.2}K msg/s", messages_per_second / 1_000.0)
    } else {
        format!("{:.2}M msg/s", messages_per_second / 1_000_000.0)
    }
}

/// Validate the number of consumer threads
///
/// At least one consumer is needed; more than 1024 threads is treated as a
/// configuration mistake.
pub fn validate_workers(workers: usize) -> Result<()> {
    if workers == 0 {
        anyhow::bail!("Worker count cannot be zero");
    }
    if workers > 1024 {
        anyhow::bail!("Worker count {} is too high (maximum 1024)", workers);
    }
    Ok(())
}

/// Validate the item count against the worker count
///
/// Every consumer must be responsible for at least one item.
pub fn validate_item_count(item_count: usize, workers: usize) -> Result<()> {
    if item_count < workers {
        anyhow::bail!(
            "Item count {} is smaller than the worker count {}",
            item_count,
            workers
        );
    }
    Ok(())
}

/// Validate the collection interval
///
/// Must be non-zero and no longer than the run itself.
pub fn validate_interval(interval: Duration, run_time: Duration) -> Result<()> {
    if interval.is_zero() {
        anyhow::bail!("Collection interval cannot be zero");
    }
    if interval > run_time {
        anyhow::bail!(
            "Collection interval {} is longer than the run time {}",
            format_duration(interval),
            format_duration(run_time)
        );
    }
    Ok(())
}

/// Validate requested percentiles lie in (0, 100]
pub fn validate_percentiles(percentiles: &[f64]) -> Result<()> {
    for &p in percentiles {
        if !(p > 0.0 && p <= 100.0) {
            anyhow::bail!("Percentile {} is outside (0, 100]", p);
        }
    }
    Ok(())
}

/// Get the number of CPU cores available
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

/// Spawn a named OS thread, pinned to `cpu` when one is given
///
/// Pinning failures are logged and the thread keeps running unpinned.
pub fn spawn_with_affinity<F, T>(name: String, cpu: Option<usize>, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let thread_name = name.clone();
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            if let Some(cpu) = cpu {
                pin_current_thread(&thread_name, cpu);
            }
            f()
        })
        .with_context(|| "failed to spawn thread".to_string())
}

fn pin_current_thread(thread_name: &str, cpu: usize) {
    let core = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == cpu));
    match core {
        Some(core) if core_affinity::set_for_current(core) => {
            debug!("Pinned {} to CPU {}", thread_name, cpu);
        }
        Some(_) => warn!("Failed to pin {} to CPU {}", thread_name, cpu),
        None => warn!("CPU {} not available for {}", cpu, thread_name),
    }
}
