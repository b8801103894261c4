use anyhow::Result;
use consumer_perf::{
    clock::now_ticks, harness::run_worker, worker::ItemAssignment, Collector, Error, LatencyKind,
    ShutdownState, WorkerContext, Workload,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Submits one update per step.
struct Ticker;

impl Workload for Ticker {
    fn step(&mut self, ctx: &WorkerContext) -> Result<()> {
        let start = now_ticks();
        std::thread::sleep(Duration::from_micros(20));
        ctx.submit(LatencyKind::Update, start, now_ticks(), None)?;
        Ok(())
    }
}

/// Collector requests shutdown, keeps cycling, observes the acknowledgment,
/// and retires the worker after a final drain that sees every sample.
#[test]
fn collector_retires_worker_after_acknowledgment() -> Result<()> {
    let ctx = Arc::new(WorkerContext::new(0, ItemAssignment::default()));
    let mut collector = Collector::new(vec![50.0, 99.0])?.with_latency_log(false);
    collector.register(Arc::clone(&ctx))?;

    let worker = {
        let ctx = Arc::clone(&ctx);
        std::thread::spawn(move || run_worker(ctx, Ticker))
    };

    let mut drained = 0;
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(5));
        drained += collector.collect_cycle()?.samples[0];
    }

    collector.request_shutdown_all();
    assert_ne!(ctx.shutdown_state(), ShutdownState::Running);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut retired = Vec::new();
    while collector.active_workers() > 0 {
        assert!(Instant::now() < deadline, "worker never acknowledged");
        let report = collector.collect_cycle()?;
        drained += report.samples[0];
        retired.extend(report.retired);
        std::thread::sleep(Duration::from_millis(1));
    }
    worker.join().expect("worker panicked")?;

    assert_eq!(retired, vec![0]);
    assert_eq!(ctx.shutdown_state(), ShutdownState::ShutdownAcknowledged);

    let stats = ctx.queue(LatencyKind::Update).stats();
    assert!(stats.submitted > 0);
    assert_eq!(stats.submitted, drained);
    assert_eq!(stats.pending, 0);
    assert_eq!(ctx.late_submissions(), 0);

    let reports = collector.finish();
    assert!(reports[0].acknowledged);
    assert_eq!(reports[0].latency[0].samples, drained);
    Ok(())
}

/// Neither flag ever goes back.
#[test]
fn shutdown_flags_are_monotonic() {
    let ctx = WorkerContext::new(2, ItemAssignment::default());
    assert_eq!(ctx.shutdown_state(), ShutdownState::Running);

    ctx.request_shutdown();
    ctx.request_shutdown();
    assert_eq!(ctx.shutdown_state(), ShutdownState::ShutdownRequested);

    ctx.acknowledge_shutdown();
    ctx.request_shutdown();
    assert!(ctx.poll_shutdown_requested());
    assert_eq!(ctx.shutdown_state(), ShutdownState::ShutdownAcknowledged);
}

#[test]
fn submissions_after_acknowledgment_or_cleanup_are_refused() {
    let stopped = WorkerContext::new(4, ItemAssignment::default());
    stopped.request_shutdown();
    stopped.acknowledge_shutdown();
    assert!(matches!(
        stopped.submit(LatencyKind::Post, 1, 2, None),
        Err(Error::WorkerStopped(4))
    ));
    assert_eq!(stopped.late_submissions(), 1);
    assert_eq!(stopped.queue(LatencyKind::Post).stats().submitted, 0);

    let cleaned = WorkerContext::new(5, ItemAssignment::default());
    cleaned.cleanup();
    assert!(matches!(
        cleaned.submit(LatencyKind::Update, 1, 2, None),
        Err(Error::QueueClosed)
    ));
    assert_eq!(cleaned.queue(LatencyKind::Update).stats().rejected, 1);
}

/// Cleanup of a context whose worker never ran, repeated, is harmless.
#[test]
fn cleanup_is_idempotent() -> Result<()> {
    let ctx = WorkerContext::new(6, ItemAssignment::default());
    ctx.submit(LatencyKind::GenericMsg, 0, 0, Some(9))?;

    ctx.cleanup();
    ctx.cleanup();

    for kind in LatencyKind::ALL {
        let queue = ctx.queue(kind);
        assert!(queue.is_closed());
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.free_len(), 0);
    }
    assert!(!ctx.stats_log().is_open());
    assert!(!ctx.latency_log().is_open());
    Ok(())
}
