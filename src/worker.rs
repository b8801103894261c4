//! # Worker Context
//!
//! Everything one consumer connection shares with the collector: its three
//! sample queues, the counters block, the per-connection log writers, the
//! item-list partition it is responsible for, and the shutdown handshake.
//!
//! A context is created before its worker thread starts and is shared as an
//! `Arc<WorkerContext>` between that worker and the collector:
//!
//! | Field            | Written by            | Read by   |
//! |------------------|-----------------------|-----------|
//! | sample queues    | worker (submit)       | collector |
//! | counters         | worker                | collector |
//! | log writers      | worker / collector    | -         |
//! | shutdown request | collector             | worker    |
//! | shutdown ack     | worker                | collector |
//!
//! The log writers are closed by the collector only after it has observed
//! the acknowledgment.

use crate::counters::{CounterSnapshot, WorkerCounters};
use crate::error::{Error, Result};
use crate::log_writer::LogWriter;
use crate::queue::SampleQueue;
use crate::shutdown::{ShutdownHandshake, ShutdownState};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::thread::ThreadId;
use tracing::debug;

/// Index of a worker within a run.
pub type WorkerId = usize;

/// The round-trip flavours measured per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LatencyKind {
    /// Ordinary update messages.
    Update,
    /// Posted messages reflected back to the consumer.
    Post,
    /// Generic messages.
    GenericMsg,
}

impl LatencyKind {
    pub const ALL: [LatencyKind; 3] = [
        LatencyKind::Update,
        LatencyKind::Post,
        LatencyKind::GenericMsg,
    ];

    /// Short tag used in latency log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            LatencyKind::Update => "upd",
            LatencyKind::Post => "post",
            LatencyKind::GenericMsg => "genmsg",
        }
    }
}

impl std::fmt::Display for LatencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LatencyKind::Update => write!(f, "Update"),
            LatencyKind::Post => write!(f, "Post"),
            LatencyKind::GenericMsg => write!(f, "Generic Message"),
        }
    }
}

/// The slice of the shared item list a worker requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAssignment {
    /// Index at which the items unique to this worker start.
    pub unique_index: usize,
    /// Number of items to request.
    pub count: usize,
}

impl ItemAssignment {
    /// Split `total_items` as evenly as possible across `workers`; the first
    /// `total_items % workers` workers take one extra item.
    pub fn partition(total_items: usize, workers: usize) -> Vec<ItemAssignment> {
        if workers == 0 {
            return Vec::new();
        }
        let base = total_items / workers;
        let extra = total_items % workers;

        let mut next = 0;
        (0..workers)
            .map(|i| {
                let count = base + usize::from(i < extra);
                let assignment = ItemAssignment {
                    unique_index: next,
                    count,
                };
                next += count;
                assignment
            })
            .collect()
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.unique_index..self.unique_index + self.count
    }
}

/// Per-worker state bundle shared with the collector.
#[derive(Debug)]
pub struct WorkerContext {
    id: WorkerId,
    thread_id: OnceLock<ThreadId>,
    items: ItemAssignment,

    latency_records: SampleQueue,
    post_latency_records: SampleQueue,
    gen_msg_latency_records: SampleQueue,

    counters: WorkerCounters,
    stats_log: LogWriter,
    latency_log: LogWriter,
    shutdown: ShutdownHandshake,

    late_submissions: AtomicU64,
}

impl WorkerContext {
    pub fn new(id: WorkerId, items: ItemAssignment) -> Self {
        Self {
            id,
            thread_id: OnceLock::new(),
            items,
            latency_records: SampleQueue::new(),
            post_latency_records: SampleQueue::new(),
            gen_msg_latency_records: SampleQueue::new(),
            counters: WorkerCounters::new(),
            stats_log: LogWriter::new("stats"),
            latency_log: LogWriter::new("latency"),
            shutdown: ShutdownHandshake::new(),
            late_submissions: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Record the calling thread as this context's owner. First call wins.
    pub fn bind_current_thread(&self) {
        let _ = self.thread_id.set(std::thread::current().id());
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id.get().copied()
    }

    pub fn items(&self) -> ItemAssignment {
        self.items
    }

    pub fn queue(&self, kind: LatencyKind) -> &SampleQueue {
        match kind {
            LatencyKind::Update => &self.latency_records,
            LatencyKind::Post => &self.post_latency_records,
            LatencyKind::GenericMsg => &self.gen_msg_latency_records,
        }
    }

    pub fn counters(&self) -> &WorkerCounters {
        &self.counters
    }

    pub fn stats_log(&self) -> &LogWriter {
        &self.stats_log
    }

    pub fn latency_log(&self) -> &LogWriter {
        &self.latency_log
    }

    pub fn attach_stats_log(&self, writer: Box<dyn Write + Send>) {
        self.stats_log.attach(writer);
    }

    pub fn attach_latency_log(&self, writer: Box<dyn Write + Send>) {
        self.latency_log.attach(writer);
    }

    /// Record a latency sample of the given kind. Worker side.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerStopped`] if this worker already acknowledged
    ///   shutdown; the sample is dropped and counted as a late submission.
    /// - [`Error::QueueClosed`] if the context was cleaned up.
    pub fn submit(
        &self,
        kind: LatencyKind,
        start_time: u64,
        end_time: u64,
        ticks: Option<u64>,
    ) -> Result<()> {
        if self.shutdown.is_acknowledged() {
            self.late_submissions.fetch_add(1, Ordering::Relaxed);
            return Err(Error::WorkerStopped(self.id));
        }
        self.queue(kind).submit(start_time, end_time, ticks)
    }

    /// Submissions refused because they arrived after the acknowledgment.
    pub fn late_submissions(&self) -> u64 {
        self.late_submissions.load(Ordering::Relaxed)
    }

    pub fn read_counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request();
    }

    pub fn poll_shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    pub fn acknowledge_shutdown(&self) {
        debug!("Worker {} acknowledging shutdown", self.id);
        self.shutdown.acknowledge();
    }

    pub fn is_shutdown_acknowledged(&self) -> bool {
        self.shutdown.is_acknowledged()
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.shutdown.state()
    }

    /// Release the queues and close both log writers.
    ///
    /// Idempotent, and safe on a context whose worker never started.
    pub fn cleanup(&self) {
        for kind in LatencyKind::ALL {
            self.queue(kind).cleanup();
        }
        self.stats_log.close();
        self.latency_log.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> WorkerContext {
        WorkerContext::new(3, ItemAssignment { unique_index: 10, count: 5 })
    }

    #[test]
    fn test_queues_are_independent() {
        let ctx = context();
        ctx.submit(LatencyKind::Update, 1, 2, None).unwrap();
        ctx.submit(LatencyKind::Update, 3, 4, None).unwrap();
        ctx.submit(LatencyKind::Post, 5, 6, None).unwrap();

        assert_eq!(ctx.queue(LatencyKind::Update).pending_len(), 2);
        assert_eq!(ctx.queue(LatencyKind::Post).pending_len(), 1);
        assert_eq!(ctx.queue(LatencyKind::GenericMsg).pending_len(), 0);
    }

    #[test]
    fn test_partition_covers_all_items() {
        let parts = ItemAssignment::partition(10, 3);
        assert_eq!(
            parts,
            vec![
                ItemAssignment { unique_index: 0, count: 4 },
                ItemAssignment { unique_index: 4, count: 3 },
                ItemAssignment { unique_index: 7, count: 3 },
            ]
        );
        assert_eq!(parts[2].range(), 7..10);
        assert!(ItemAssignment::partition(10, 0).is_empty());
        assert_eq!(
            ItemAssignment::partition(2, 4).iter().map(|p| p.count).sum::<usize>(),
            2
        );
    }

    #[test]
    fn test_submit_after_acknowledge_is_rejected() {
        let ctx = context();
        ctx.request_shutdown();
        ctx.submit(LatencyKind::Update, 1, 2, None).unwrap();
        ctx.acknowledge_shutdown();

        let result = ctx.submit(LatencyKind::Update, 3, 4, None);
        assert!(matches!(result, Err(Error::WorkerStopped(3))));
        assert_eq!(ctx.late_submissions(), 1);
        assert_eq!(ctx.queue(LatencyKind::Update).pending_len(), 1);
    }

    #[test]
    fn test_cleanup_twice_on_unstarted_context() {
        let ctx = context();
        assert!(ctx.thread_id().is_none());
        ctx.cleanup();
        ctx.cleanup();
        for kind in LatencyKind::ALL {
            assert_eq!(ctx.queue(kind).pending_len(), 0);
            assert_eq!(ctx.queue(kind).free_len(), 0);
        }
        assert!(!ctx.stats_log().is_open());
    }

    #[test]
    fn test_submit_after_cleanup_is_rejected() {
        let ctx = context();
        ctx.cleanup();
        assert!(matches!(
            ctx.submit(LatencyKind::Post, 1, 2, None),
            Err(Error::QueueClosed)
        ));
    }

    #[test]
    fn test_bind_current_thread_first_call_wins() {
        let ctx = std::sync::Arc::new(context());
        ctx.bind_current_thread();
        let here = std::thread::current().id();

        let other = std::sync::Arc::clone(&ctx);
        std::thread::spawn(move || other.bind_current_thread())
            .join()
            .unwrap();
        assert_eq!(ctx.thread_id(), Some(here));
    }
}
