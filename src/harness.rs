//! # Harness
//!
//! Drives a run end to end: builds one [`WorkerContext`] per consumer, gives
//! each its own OS thread running a [`Workload`], and runs the
//! [`Collector`] on the calling thread until the run time is over and every
//! consumer has acknowledged shutdown.
//!
//! Per-connection output goes to `stats_<n>.csv` and `latency_<n>.csv` in the
//! configured output directory.

use crate::cli::Args;
use crate::clock::now_ticks;
use crate::collector::{Collector, LATENCY_LOG_HEADER, STATS_LOG_HEADER};
use crate::counters::Counter;
use crate::results::RunSummary;
use crate::utils;
use crate::worker::{ItemAssignment, LatencyKind, WorkerContext};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Validated run configuration.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessConfig {
    pub workers: usize,
    pub item_count: usize,
    pub run_time: Duration,
    pub collect_interval: Duration,
    pub shutdown_grace: Duration,
    /// Updates per second per consumer; 0 runs unpaced.
    pub update_rate: u64,
    pub post_every: u64,
    pub gen_msg_every: u64,
    pub output_dir: PathBuf,
    pub write_latency_log: bool,
    pub percentiles: Vec<f64>,
    pub first_cpu: Option<usize>,
}

impl Default for HarnessConfig {
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
            write_latency_log: true,
            percentiles: vec![50.0, 90.0, 99.0, 99.9],
            first_cpu: None,
        }
    }
}

impl HarnessConfig {
    /// Build and validate a configuration from parsed CLI arguments.
    ///
    /// ## Validation
    /// - at least one worker, and no more than 1024
    /// - at least one item per worker
    /// - a non-zero collection interval no longer than the run time
    /// - percentiles in (0, 100]
    pub fn from_args(args: &Args) -> Result<Self> {
        utils::validate_workers(args.workers)?;
        utils::validate_item_count(args.item_count, args.workers)?;
        utils::validate_interval(args.collect_interval, args.run_time)?;
        utils::validate_percentiles(&args.percentiles)?;

        if let Some(first) = args.first_cpu {
            let cores = utils::get_cpu_cores();
            if first + args.workers > cores {
                warn!(
                    "Pinning {} workers from CPU {} exceeds the {} available cores; extra workers run unpinned",
                    args.workers, first, cores
                );
            }
        }

        Ok(Self {
            workers: args.workers,
            item_count: args.item_count,
            run_time: args.run_time,
            collect_interval: args.collect_interval,
            shutdown_grace: args.shutdown_grace,
            update_rate: args.update_rate,
            post_every: args.post_every,
            gen_msg_every: args.gen_msg_every,
            output_dir: args.output_dir.clone(),
            write_latency_log: !args.no_latency_log,
            percentiles: args.percentiles.clone(),
            first_cpu: args.first_cpu,
        })
    }

    fn cpu_for(&self, worker: usize) -> Option<usize> {
        let cpu = self.first_cpu? + worker;
        (cpu < utils::get_cpu_cores()).then_some(cpu)
    }
}

/// One unit of consumer work.
///
/// `step` is called repeatedly on the worker thread until shutdown is
/// requested, so it must return promptly.
pub trait Workload: Send {
    fn step(&mut self, ctx: &WorkerContext) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Requesting,
    Refreshing { received: usize },
    Steady,
}

/// Simulated consumer connection.
///
/// Requests every item of its partition, receives one refresh per item,
/// then settles into a steady stream of updates. Every `post_every` updates
/// it posts, and every `gen_msg_every` updates it round-trips a generic
/// message. Each exchange is timestamped with [`now_ticks`] and submitted as
/// a latency sample.
pub struct SyntheticWorkload {
    phase: Phase,
    pace: Option<Duration>,
    post_every: u64,
    gen_msg_every: u64,
    updates: u64,
    rng: StdRng,
}

/// Upper bound of the simulated per-message service time.
const MAX_SERVICE_NANOS: u64 = 5_000;

impl SyntheticWorkload {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            phase: Phase::Requesting,
            pace: (config.update_rate > 0)
                .then(|| Duration::from_nanos(1_000_000_000 / config.update_rate)),
            post_every: config.post_every,
            gen_msg_every: config.gen_msg_every,
            updates: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Same workload with a fixed random seed.
    pub fn seeded(config: &HarnessConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(config)
        }
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Busy-wait for a random service time and return the (start, end) ticks.
    fn exchange(&mut self) -> (u64, u64) {
        let service = self.rng.gen_range(0..=MAX_SERVICE_NANOS);
        let start = now_ticks();
        let target = start.saturating_add(service);
        let mut end = start;
        while end < target {
            std::hint::spin_loop();
            end = now_ticks();
        }
        (start, end)
    }

    fn request_items(&mut self, ctx: &WorkerContext) {
        let items = ctx.items();
        ctx.counters().mark_image_retrieval_start(now_ticks());
        ctx.counters().add(Counter::RequestSent, items.count as u64);
        debug!("Worker {} requested items {:?}", ctx.id(), items.range());
        self.phase = Phase::Refreshing { received: 0 };
    }

    fn receive_refresh(&mut self, ctx: &WorkerContext, received: usize) {
        let total = ctx.items().count;
        if received < total {
            ctx.counters().increment(Counter::RefreshReceived);
            self.phase = Phase::Refreshing {
                received: received + 1,
            };
            return;
        }

        let now = now_ticks();
        ctx.counters().increment(Counter::RefreshComplete);
        ctx.counters().increment(Counter::StatusReceived);
        ctx.counters().mark_image_retrieval_end(now);
        ctx.counters().mark_steady_state_start(now);
        debug!("Worker {} received all {} refreshes", ctx.id(), total);
        self.phase = Phase::Steady;
    }

    fn receive_update(&mut self, ctx: &WorkerContext) -> Result<()> {
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }

        let (start, end) = self.exchange();
        ctx.counters().increment(Counter::UpdateReceived);
        ctx.submit(LatencyKind::Update, start, end, None)?;
        self.updates += 1;

        if self.post_every > 0 && self.updates % self.post_every == 0 {
            let (start, end) = self.exchange();
            ctx.counters().increment(Counter::PostSent);
            ctx.submit(LatencyKind::Post, start, end, None)?;
        }

        if self.gen_msg_every > 0 && self.updates % self.gen_msg_every == 0 {
            let (start, end) = self.exchange();
            ctx.counters().increment(Counter::GenMsgSent);
            ctx.counters().increment(Counter::LatencyGenMsgSent);
            ctx.counters().increment(Counter::GenMsgReceived);
            // Generic messages carry their own round-trip time.
            ctx.submit(
                LatencyKind::GenericMsg,
                start,
                end,
                Some(end.saturating_sub(start)),
            )?;
        }
        Ok(())
    }
}

impl Workload for SyntheticWorkload {
    fn step(&mut self, ctx: &WorkerContext) -> Result<()> {
        match self.phase {
            Phase::Requesting => self.request_items(ctx),
            Phase::Refreshing { received } => self.receive_refresh(ctx, received),
            Phase::Steady => self.receive_update(ctx)?,
        }
        Ok(())
    }
}

/// Worker thread body: step until shutdown is requested, then acknowledge.
///
/// The acknowledgment is also given when the workload fails, so the
/// collector can retire the worker either way.
pub fn run_worker<W: Workload>(ctx: Arc<WorkerContext>, mut workload: W) -> Result<()> {
    ctx.bind_current_thread();
    debug!("Worker {} started", ctx.id());

    while !ctx.poll_shutdown_requested() {
        if let Err(e) = workload.step(&ctx) {
            ctx.acknowledge_shutdown();
            return Err(e.context(format!("worker {} failed", ctx.id())));
        }
    }

    ctx.acknowledge_shutdown();
    Ok(())
}

/// Run orchestration.
pub struct Harness {
    config: HarnessConfig,
    run_id: String,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            run_id: utils::generate_run_id(),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run with a [`SyntheticWorkload`] per consumer.
    pub fn run(&self) -> Result<RunSummary> {
        let config = self.config.clone();
        self.run_with(move |_| SyntheticWorkload::new(&config))
    }

    /// Run with a workload built per consumer by `make_workload`.
    pub fn run_with<W, F>(&self, mut make_workload: F) -> Result<RunSummary>
    where
        W: Workload + 'static,
        F: FnMut(&WorkerContext) -> W,
    {
        let config = &self.config;
        info!(
            "Starting run {} with {} workers over {} items",
            self.run_id, config.workers, config.item_count
        );

        std::fs::create_dir_all(&config.output_dir).with_context(|| {
            format!(
                "failed to create output directory {}",
                config.output_dir.display()
            )
        })?;

        let mut collector = Collector::new(config.percentiles.clone())?
            .with_latency_log(config.write_latency_log);
        let mut contexts = Vec::with_capacity(config.workers);
        for (id, items) in ItemAssignment::partition(config.item_count, config.workers)
            .into_iter()
            .enumerate()
        {
            let ctx = Arc::new(WorkerContext::new(id, items));
            self.open_logs(&ctx)?;
            collector.register(Arc::clone(&ctx))?;
            contexts.push(ctx);
        }

        let started = Instant::now();
        let mut handles = Vec::with_capacity(contexts.len());
        for ctx in &contexts {
            let workload = make_workload(ctx);
            let thread_ctx = Arc::clone(ctx);
            let spawned = utils::spawn_with_affinity(
                format!("consumer-{}", ctx.id()),
                config.cpu_for(ctx.id()),
                move || run_worker(thread_ctx, workload),
            );
            match spawned {
                Ok(handle) => handles.push((Arc::clone(ctx), handle)),
                Err(e) => {
                    collector.abort();
                    return Err(e.context(format!("failed to start worker {}", ctx.id())));
                }
            }
        }

        if let Err(e) = collector.run(
            config.run_time,
            config.collect_interval,
            config.shutdown_grace,
        ) {
            collector.abort();
            return Err(e);
        }
        let elapsed = started.elapsed();

        for (ctx, handle) in handles {
            if !ctx.is_shutdown_acknowledged() {
                warn!("Worker {} still running, detaching its thread", ctx.id());
                continue;
            }
            match handle.join() {
                Ok(Ok(())) => debug!("Worker {} joined", ctx.id()),
                Ok(Err(e)) => error!("{:#}", e),
                Err(_) => error!("Worker {} panicked", ctx.id()),
            }
        }

        let overall = collector.overall_summaries();
        let reports = collector.finish();
        info!("Run {} finished in {:?}", self.run_id, elapsed);

        Ok(RunSummary::new(
            self.run_id.clone(),
            config.clone(),
            elapsed,
            overall,
            reports,
        ))
    }

    fn open_logs(&self, ctx: &WorkerContext) -> Result<()> {
        let dir = &self.config.output_dir;
        ctx.attach_stats_log(create_log(&stats_log_path(dir, ctx.id()))?);
        ctx.stats_log()
            .write_line(format_args!("{}", STATS_LOG_HEADER))?;

        if self.config.write_latency_log {
            ctx.attach_latency_log(create_log(&latency_log_path(dir, ctx.id()))?);
            ctx.latency_log()
                .write_line(format_args!("{}", LATENCY_LOG_HEADER))?;
        }
        Ok(())
    }
}

pub fn stats_log_path(dir: &Path, worker: usize) -> PathBuf {
    dir.join(format!("stats_{}.csv", worker))
}

pub fn latency_log_path(dir: &Path, worker: usize) -> PathBuf {
    dir.join(format!("latency_{}.csv", worker))
}

fn create_log(path: &Path) -> Result<Box<dyn std::io::Write + Send>> {
    let file = File::create(path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}
