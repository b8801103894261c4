//! # Collector
//!
//! The single reporting thread. Every interval it walks the registered
//! workers and, for each one:
//!
//! 1. drains the three sample queues, records every sample into the worker's
//!    histograms, appends one latency log line per sample, and recycles the
//!    sample into the queue's free pool;
//! 2. snapshots the counters and appends one stats line with the counts
//!    accumulated since the previous cycle;
//! 3. if the worker has acknowledged shutdown, performs a last drain, cleans
//!    the context up, and retires it.
//!
//! The collector never waits on a worker. Shutdown is requested by setting
//! flags and observed by polling them on later cycles.

use crate::clock::{now_ticks, ticks_to_micros};
use crate::counters::CounterSnapshot;
use crate::error::Result;
use crate::metrics::{LatencyHistogram, LatencySummary};
use crate::queue::QueueStats;
use crate::worker::{LatencyKind, WorkerContext, WorkerId};
use anyhow::Context as _;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Header of the per-connection stats log.
pub const STATS_LOG_HEADER: &str =
    "timestamp_ticks,requests,refreshes,updates,status,posts,genmsgs_sent,genmsgs_recv,upd_samples,post_samples,genmsg_samples";

/// Header of the per-connection latency log.
pub const LATENCY_LOG_HEADER: &str = "kind,start_ticks,end_ticks,latency_ticks";

/// Per-kind histograms for one sample source.
#[derive(Debug, Clone)]
struct KindHistograms {
    update: LatencyHistogram,
    post: LatencyHistogram,
    generic: LatencyHistogram,
}

impl KindHistograms {
    fn new() -> Result<Self> {
        Ok(Self {
            update: LatencyHistogram::new(LatencyKind::Update)?,
            post: LatencyHistogram::new(LatencyKind::Post)?,
            generic: LatencyHistogram::new(LatencyKind::GenericMsg)?,
        })
    }

    fn get_mut(&mut self, kind: LatencyKind) -> &mut LatencyHistogram {
        match kind {
            LatencyKind::Update => &mut self.update,
            LatencyKind::Post => &mut self.post,
            LatencyKind::GenericMsg => &mut self.generic,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &LatencyHistogram> {
        [&self.update, &self.post, &self.generic].into_iter()
    }

    fn merge(&mut self, other: &KindHistograms) -> Result<()> {
        self.update.merge(&other.update)?;
        self.post.merge(&other.post)?;
        self.generic.merge(&other.generic)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.update.reset();
        self.post.reset();
        self.generic.reset();
    }
}

/// Collector-side bookkeeping for one worker.
struct Tracked {
    ctx: Arc<WorkerContext>,
    totals: KindHistograms,
    last_counters: CounterSnapshot,
    retired: bool,
}

/// What one collection cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Samples drained per kind, in [`LatencyKind::ALL`] order.
    pub samples: [u64; 3],
    /// Workers retired during this cycle.
    pub retired: Vec<WorkerId>,
    /// Workers still active after the cycle.
    pub active: usize,
}

impl CycleReport {
    pub fn total_samples(&self) -> u64 {
        self.samples.iter().sum()
    }
}

/// Final per-worker view produced by [`Collector::finish`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker: WorkerId,
    pub counters: CounterSnapshot,
    pub latency: Vec<LatencySummary>,
    pub queues: Vec<QueueStats>,
    pub late_submissions: u64,
    pub acknowledged: bool,
}

/// Drains, aggregates, and logs the samples of every registered worker.
pub struct Collector {
    workers: Vec<Tracked>,
    interval: KindHistograms,
    overall: KindHistograms,
    percentiles: Vec<f64>,
    write_latency_log: bool,
    cycles: u64,
}

impl Collector {
    pub fn new(percentiles: Vec<f64>) -> Result<Self> {
        Ok(Self {
            workers: Vec::new(),
            interval: KindHistograms::new()?,
            overall: KindHistograms::new()?,
            percentiles,
            write_latency_log: true,
            cycles: 0,
        })
    }

    /// Disable per-sample latency log lines; stats lines are still written.
    pub fn with_latency_log(mut self, enabled: bool) -> Self {
        self.write_latency_log = enabled;
        self
    }

    pub fn register(&mut self, ctx: Arc<WorkerContext>) -> Result<()> {
        debug!("Collector tracking worker {}", ctx.id());
        self.workers.push(Tracked {
            last_counters: ctx.read_counters(),
            ctx,
            totals: KindHistograms::new()?,
            retired: false,
        });
        Ok(())
    }

    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|w| !w.retired).count()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Ask every active worker to stop.
    pub fn request_shutdown_all(&self) {
        for tracked in self.workers.iter().filter(|w| !w.retired) {
            tracked.ctx.request_shutdown();
        }
    }

    pub fn all_acknowledged(&self) -> bool {
        self.workers
            .iter()
            .all(|w| w.retired || w.ctx.is_shutdown_acknowledged())
    }

    /// Run one drain/aggregate/log pass over every active worker.
    pub fn collect_cycle(&mut self) -> Result<CycleReport> {
        self.cycles += 1;
        self.interval.reset();

        let mut report = CycleReport::default();
        let write_latency_log = self.write_latency_log;

        for tracked in self.workers.iter_mut().filter(|w| !w.retired) {
            // Read before draining: if the worker acknowledged, everything it
            // submitted is already visible to this drain.
            let acknowledged = tracked.ctx.is_shutdown_acknowledged();

            let mut drained = [0u64; 3];
            for (slot, kind) in LatencyKind::ALL.into_iter().enumerate() {
                drained[slot] = drain_kind(
                    tracked,
                    &mut self.interval,
                    kind,
                    write_latency_log,
                )?;
            }
            for (total, count) in report.samples.iter_mut().zip(drained) {
                *total += count;
            }

            write_stats_line(tracked, drained);

            if acknowledged {
                info!("Worker {} acknowledged shutdown, retiring", tracked.ctx.id());
                tracked.ctx.cleanup();
                tracked.retired = true;
                report.retired.push(tracked.ctx.id());
            }
        }

        self.overall.merge(&self.interval)?;
        report.active = self.active_workers();
        Ok(report)
    }

    /// Summaries of the samples drained in the most recent cycle.
    pub fn interval_summaries(&self) -> Vec<LatencySummary> {
        self.interval
            .iter()
            .map(|h| h.summary(&self.percentiles))
            .collect()
    }

    /// Summaries of every sample drained so far, across all workers.
    pub fn overall_summaries(&self) -> Vec<LatencySummary> {
        self.overall
            .iter()
            .map(|h| h.summary(&self.percentiles))
            .collect()
    }

    /// Cycle every `interval` for `run_time`, then request shutdown and keep
    /// cycling until every worker acknowledged or `grace` has passed.
    pub fn run(
        &mut self,
        run_time: Duration,
        interval: Duration,
        grace: Duration,
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        info!(
            "Collector running for {:?} with a {:?} interval",
            run_time, interval
        );

        while started.elapsed() < run_time {
            std::thread::sleep(interval.min(run_time.saturating_sub(started.elapsed())));
            let report = self
                .collect_cycle()
                .with_context(|| format!("collection cycle {} failed", self.cycles))?;
            self.log_cycle(&report);
        }

        info!("Run time elapsed, requesting shutdown of {} workers", self.active_workers());
        self.request_shutdown_all();

        let deadline = Instant::now() + grace;
        while self.active_workers() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    "{} workers did not acknowledge shutdown within {:?}",
                    self.active_workers(),
                    grace
                );
                break;
            }
            std::thread::sleep(interval.min(Duration::from_millis(50)));
            let report = self.collect_cycle().context("shutdown collection cycle failed")?;
            self.log_cycle(&report);
        }
        Ok(())
    }

    fn log_cycle(&self, report: &CycleReport) {
        debug!(
            "Cycle {}: {} samples ({} upd, {} post, {} genmsg), {} workers active",
            self.cycles,
            report.total_samples(),
            report.samples[0],
            report.samples[1],
            report.samples[2],
            report.active
        );
        for histogram in self.interval.iter().filter(|h| !h.is_empty()) {
            let summary = histogram.summary(&self.percentiles);
            info!(
                "{} latency: {} samples, avg {:.1}us, max {:.1}us",
                histogram.kind(),
                summary.samples,
                summary.mean_micros(),
                ticks_to_micros(summary.max_ticks)
            );
        }
    }

    /// Stop every worker without waiting for it and clean up every context.
    ///
    /// Used when a run is abandoned; workers notice the request on their next
    /// poll and exit on their own.
    pub fn abort(self) -> Vec<WorkerReport> {
        warn!(
            "Abandoning collection with {} workers still active",
            self.active_workers()
        );
        self.request_shutdown_all();
        self.finish()
    }

    /// Clean up every context, retired or not, and produce the final reports.
    pub fn finish(mut self) -> Vec<WorkerReport> {
        self.workers
            .drain(..)
            .map(|tracked| {
                let acknowledged = tracked.ctx.is_shutdown_acknowledged();
                if !tracked.retired {
                    tracked.ctx.cleanup();
                }
                WorkerReport {
                    worker: tracked.ctx.id(),
                    counters: tracked.ctx.read_counters(),
                    latency: tracked
                        .totals
                        .iter()
                        .map(|h| h.summary(&self.percentiles))
                        .collect(),
                    queues: LatencyKind::ALL
                        .into_iter()
                        .map(|kind| tracked.ctx.queue(kind).stats())
                        .collect(),
                    late_submissions: tracked.ctx.late_submissions(),
                    acknowledged,
                }
            })
            .collect()
    }
}

fn drain_kind(
    tracked: &mut Tracked,
    interval: &mut KindHistograms,
    kind: LatencyKind,
    write_latency_log: bool,
) -> Result<u64> {
    let ctx = &tracked.ctx;
    let queue = ctx.queue(kind);
    let totals = tracked.totals.get_mut(kind);
    let interval = interval.get_mut(kind);

    let mut count = 0;
    for sample in queue.drain() {
        let ticks = sample.ticks();
        let recorded = totals.record(ticks).and_then(|_| interval.record(ticks));
        if write_latency_log {
            if let Err(e) = ctx.latency_log().write_line(format_args!(
                "{},{},{},{}",
                kind.tag(),
                sample.start_time(),
                sample.end_time(),
                ticks
            )) {
                warn!("Worker {}: latency log write failed: {}", ctx.id(), e);
            }
        }
        queue.recycle(sample);
        recorded?;
        count += 1;
    }
    Ok(count)
}

fn write_stats_line(tracked: &mut Tracked, drained: [u64; 3]) {
    let current = tracked.ctx.read_counters();
    let delta = current.delta(&tracked.last_counters);
    tracked.last_counters = current;

    let result = tracked.ctx.stats_log().write_line(format_args!(
        "{},{},{},{},{},{},{},{},{},{},{}",
        now_ticks(),
        delta.requests_sent,
        delta.refreshes_received,
        delta.updates_received,
        delta.status_received,
        delta.posts_sent,
        delta.gen_msgs_sent,
        delta.gen_msgs_received,
        drained[0],
        drained[1],
        drained[2],
    ));
    if let Err(e) = result {
        warn!("Worker {}: stats log write failed: {}", tracked.ctx.id(), e);
    }

    // A cycle's lines are on disk before the next cycle starts.
    for log in [tracked.ctx.stats_log(), tracked.ctx.latency_log()] {
        if let Err(e) = log.flush() {
            warn!("Worker {}: log flush failed: {}", tracked.ctx.id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::Counter;
    use crate::worker::ItemAssignment;
    use parking_lot::Mutex;
    use std::io::{self, Write};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn worker(id: WorkerId) -> (Arc<WorkerContext>, SharedBuffer, SharedBuffer) {
        let ctx = Arc::new(WorkerContext::new(id, ItemAssignment::default()));
        let stats = SharedBuffer::default();
        let latency = SharedBuffer::default();
        ctx.attach_stats_log(Box::new(stats.clone()));
        ctx.attach_latency_log(Box::new(latency.clone()));
        (ctx, stats, latency)
    }

    #[test]
    fn test_cycle_drains_logs_and_recycles() {
        let (ctx, stats, latency) = worker(0);
        let mut collector = Collector::new(vec![50.0, 99.0]).unwrap();
        collector.register(Arc::clone(&ctx)).unwrap();

        ctx.submit(LatencyKind::Update, 100, 150, None).unwrap();
        ctx.submit(LatencyKind::Update, 200, 260, None).unwrap();
        ctx.submit(LatencyKind::GenericMsg, 0, 0, Some(42)).unwrap();
        ctx.counters().add(Counter::UpdateReceived, 2);

        let report = collector.collect_cycle().unwrap();
        assert_eq!(report.samples, [2, 0, 1]);
        assert_eq!(report.active, 1);
        assert!(report.retired.is_empty());

        assert_eq!(
            latency.lines(),
            vec!["upd,100,150,50", "upd,200,260,60", "genmsg,0,0,42"]
        );
        let stats_lines = stats.lines();
        assert_eq!(stats_lines.len(), 1);
        assert!(stats_lines[0].ends_with(",0,0,2,0,0,0,0,2,0,1"));

        assert_eq!(ctx.queue(LatencyKind::Update).free_len(), 2);
        assert_eq!(ctx.queue(LatencyKind::GenericMsg).free_len(), 1);

        let summaries = collector.interval_summaries();
        assert_eq!(summaries[0].samples, 2);
        assert_eq!(summaries[2].samples, 1);
    }

    #[test]
    fn test_cycle_flushes_buffered_logs() {
        let ctx = Arc::new(WorkerContext::new(0, ItemAssignment::default()));
        let stats = SharedBuffer::default();
        let latency = SharedBuffer::default();
        ctx.attach_stats_log(Box::new(io::BufWriter::with_capacity(1 << 16, stats.clone())));
        ctx.attach_latency_log(Box::new(io::BufWriter::with_capacity(1 << 16, latency.clone())));

        let mut collector = Collector::new(vec![50.0]).unwrap();
        collector.register(Arc::clone(&ctx)).unwrap();
        ctx.submit(LatencyKind::Post, 10, 30, None).unwrap();
        collector.collect_cycle().unwrap();

        // Still open, yet both lines are visible through the buffers.
        assert!(ctx.stats_log().is_open());
        assert_eq!(stats.lines().len(), 1);
        assert_eq!(latency.lines(), vec!["post,10,30,20"]);
    }

    #[test]
    fn test_stats_line_reports_interval_delta() {
        let (ctx, stats, _latency) = worker(0);
        let mut collector = Collector::new(vec![]).unwrap();
        collector.register(Arc::clone(&ctx)).unwrap();

        ctx.counters().add(Counter::UpdateReceived, 5);
        collector.collect_cycle().unwrap();
        ctx.counters().add(Counter::UpdateReceived, 3);
        collector.collect_cycle().unwrap();

        let updates: Vec<String> = stats
            .lines()
            .iter()
            .map(|l| l.split(',').nth(3).unwrap().to_string())
            .collect();
        assert_eq!(updates, vec!["5", "3"]);
    }

    #[test]
    fn test_acknowledged_worker_is_retired_after_final_drain() {
        let (ctx, _stats, latency) = worker(7);
        let mut collector = Collector::new(vec![50.0]).unwrap();
        collector.register(Arc::clone(&ctx)).unwrap();

        collector.request_shutdown_all();
        assert!(ctx.poll_shutdown_requested());
        ctx.submit(LatencyKind::Post, 10, 30, None).unwrap();
        ctx.acknowledge_shutdown();
        assert!(collector.all_acknowledged());

        let report = collector.collect_cycle().unwrap();
        assert_eq!(report.samples, [0, 1, 0]);
        assert_eq!(report.retired, vec![7]);
        assert_eq!(report.active, 0);
        assert_eq!(latency.lines(), vec!["post,10,30,20"]);
        assert!(!ctx.latency_log().is_open());
        assert!(ctx.queue(LatencyKind::Post).is_closed());

        let report = collector.collect_cycle().unwrap();
        assert_eq!(report.total_samples(), 0);
        assert!(report.retired.is_empty());
    }

    #[test]
    fn test_overall_summaries_accumulate() {
        let (ctx, _stats, _latency) = worker(0);
        let mut collector = Collector::new(vec![50.0]).unwrap().with_latency_log(false);
        collector.register(Arc::clone(&ctx)).unwrap();

        for round in 0..3u64 {
            ctx.submit(LatencyKind::Update, 0, 1_000 * (round + 1), None)
                .unwrap();
            collector.collect_cycle().unwrap();
        }

        assert_eq!(collector.interval_summaries()[0].samples, 1);
        assert_eq!(collector.overall_summaries()[0].samples, 3);
        assert_eq!(collector.cycles(), 3);
    }

    #[test]
    fn test_abort_stops_running_workers() {
        let (ctx, _stats, _latency) = worker(2);
        let mut collector = Collector::new(vec![50.0]).unwrap();
        collector.register(Arc::clone(&ctx)).unwrap();

        let worker_ctx = Arc::clone(&ctx);
        let handle = std::thread::spawn(move || {
            while !worker_ctx.poll_shutdown_requested() {
                std::thread::sleep(Duration::from_millis(1));
            }
            worker_ctx.acknowledge_shutdown();
        });

        let reports = collector.abort();
        handle.join().unwrap();

        assert_eq!(reports.len(), 1);
        assert!(ctx.is_shutdown_acknowledged());
        assert!(!ctx.stats_log().is_open());
        assert!(ctx.queue(LatencyKind::Update).is_closed());
    }

    #[test]
    fn test_finish_cleans_up_unacknowledged_workers() {
        let (ctx, _stats, _latency) = worker(1);
        let mut collector = Collector::new(vec![50.0]).unwrap();
        collector.register(Arc::clone(&ctx)).unwrap();
        ctx.submit(LatencyKind::Update, 1, 2, None).unwrap();
        collector.collect_cycle().unwrap();

        let reports = collector.finish();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].acknowledged);
        assert_eq!(reports[0].latency[0].samples, 1);
        assert_eq!(reports[0].queues[0].submitted, 1);
        assert!(!ctx.stats_log().is_open());
        assert!(ctx.queue(LatencyKind::Update).is_closed());
    }
}
