use crate::collector::WorkerReport;
use crate::counters::CounterSnapshot;
use crate::harness::HarnessConfig;
use crate::metrics::{utils::format_summary, LatencySummary};
use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// System information for reproducibility
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub harness_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: crate::utils::get_cpu_cores(),
            harness_version: crate::VERSION.to_string(),
        }
    }
}

/// Everything a run produced, written as JSON at the end.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub elapsed: Duration,
    pub config: HarnessConfig,
    pub system_info: SystemInfo,
    pub totals: CounterSnapshot,
    pub latency: Vec<LatencySummary>,
    pub workers: Vec<WorkerReport>,
}

impl RunSummary {
    pub fn new(
        run_id: String,
        config: HarnessConfig,
        elapsed: Duration,
        latency: Vec<LatencySummary>,
        workers: Vec<WorkerReport>,
    ) -> Self {
        let totals = total_counters(workers.iter().map(|w| &w.counters));
        Self {
            run_id,
            timestamp: chrono::Utc::now(),
            elapsed,
            config,
            system_info: SystemInfo::default(),
            totals,
            latency,
            workers,
        }
    }

    /// Updates received per second across every consumer.
    pub fn update_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.totals.updates_received as f64 / secs
        } else {
            0.0
        }
    }

    /// Workers that never acknowledged shutdown.
    pub fn unacknowledged_workers(&self) -> Vec<usize> {
        self.workers
            .iter()
            .filter(|w| !w.acknowledged)
            .map(|w| w.worker)
            .collect()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
        info!("Summary written to: {}", path.display());
        Ok(())
    }

    /// Console report printed by the binary.
    pub fn print(&self) {
        println!("{}", "Consumer latency summary".bold());
        println!("  Run id:        {}", self.run_id);
        println!("  Consumers:     {}", self.workers.len());
        println!("  Elapsed:       {}", crate::utils::format_duration(self.elapsed));
        println!("  Requests sent: {}", self.totals.requests_sent);
        println!("  Refreshes:     {}", self.totals.refreshes_received);
        println!(
            "  Updates:       {} ({})",
            self.totals.updates_received,
            crate::utils::format_message_rate(self.update_rate())
        );
        println!("  Posts sent:    {}", self.totals.posts_sent);
        println!("  Generic msgs:  {}", self.totals.gen_msgs_sent);
        for summary in &self.latency {
            println!("  {}", format_summary(summary));
        }
        let missing = self.unacknowledged_workers();
        if !missing.is_empty() {
            println!(
                "  {}",
                format!("Consumers without shutdown acknowledgment: {:?}", missing).yellow()
            );
        }
    }
}

fn total_counters<'a>(snapshots: impl Iterator<Item = &'a CounterSnapshot>) -> CounterSnapshot {
    snapshots.fold(CounterSnapshot::default(), |mut acc, s| {
        acc.requests_sent += s.requests_sent;
        acc.refreshes_received += s.refreshes_received;
        acc.refresh_completes += s.refresh_completes;
        acc.updates_received += s.updates_received;
        acc.status_received += s.status_received;
        acc.posts_sent += s.posts_sent;
        acc.gen_msgs_sent += s.gen_msgs_sent;
        acc.gen_msgs_received += s.gen_msgs_received;
        acc.latency_gen_msgs_sent += s.latency_gen_msgs_sent;
        acc.image_retrieval_start = earliest(acc.image_retrieval_start, s.image_retrieval_start);
        acc.image_retrieval_end = latest(acc.image_retrieval_end, s.image_retrieval_end);
        acc.steady_state_start = earliest(acc.steady_state_start, s.steady_state_start);
        acc
    })
}

fn earliest(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
