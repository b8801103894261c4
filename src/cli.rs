use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Consumer latency harness - drives simulated consumer connections and
/// collects their per-message latency
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Number of consumer threads, one connection each
    #[clap(short = 'c', long, default_value_t = crate::defaults::WORKERS, help_heading = "Core Options")]
    pub workers: usize,

    /// Total number of items, split across the consumers
    #[clap(short = 'n', long, default_value_t = crate::defaults::ITEM_COUNT, help_heading = "Core Options")]
    pub item_count: usize,

    /// How long to run before requesting shutdown (e.g. "10s", "500ms", "2m")
    #[clap(short = 't', long, value_parser = parse_duration, default_value = "10s", help_heading = "Core Options")]
    pub run_time: Duration,

    /// Interval between collection cycles
    #[clap(short = 'i', long, value_parser = parse_duration, default_value = "1s")]
    pub collect_interval: Duration,

    /// How long to wait for consumers to acknowledge shutdown
    #[clap(long, value_parser = parse_duration, default_value = "5s")]
    pub shutdown_grace: Duration,

    /// Updates per second each consumer simulates
    #[clap(short = 'r', long, default_value_t = crate::defaults::UPDATE_RATE)]
    pub update_rate: u64,

    /// Send a post every N updates (0 disables posts)
    #[clap(long, default_value_t = 10)]
    pub post_every: u64,

    /// Send a generic message every N updates (0 disables generic messages)
    #[clap(long, default_value_t = 20)]
    pub gen_msg_every: u64,

    /// Directory for per-connection stats and latency logs
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// JSON file for the run summary
    #[clap(long, default_value = crate::defaults::SUMMARY_FILE)]
    pub summary_file: PathBuf,

    /// Do not write per-sample latency log lines
    #[clap(long, default_value_t = false)]
    pub no_latency_log: bool,

    /// Percentiles to report
    #[clap(long, default_values_t = vec![50.0, 90.0, 99.0, 99.9])]
    pub percentiles: Vec<f64>,

    /// First CPU to pin consumer threads to; consumers take consecutive cores
    #[clap(long)]
    pub first_cpu: Option<usize>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            workers: crate::defaults::WORKERS,
            item_count: crate::defaults::ITEM_COUNT,
            run_time: crate::defaults::RUN_TIME,
            collect_interval: crate::defaults::COLLECT_INTERVAL,
            shutdown_grace: crate::defaults::SHUTDOWN_GRACE,
            update_rate: crate::defaults::UPDATE_RATE,
            post_every: 10,
            gen_msg_every: 20,
            output_dir: PathBuf::from(crate::defaults::OUTPUT_DIR),
            summary_file: PathBuf::from(crate::defaults::SUMMARY_FILE),
            no_latency_log: false,
            percentiles: vec![50.0, 90.0, 99.0, 99.9],
            first_cpu: None,
            verbose: false,
        }
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h", "250ms")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1_000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(secs).map_err(|e| format!("Duration out of range: {}: {}", s, e))
}
