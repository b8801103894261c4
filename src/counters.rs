//! Per-connection message counters.
//!
//! Each counter is written by the owning worker and read by the collector.
//! Reads are relaxed: the collector may see a value a few increments behind,
//! which the next interval makes up for.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel for a tick that has not been recorded yet.
const UNSET: u64 = 0;

#[derive(Debug, Default)]
pub struct WorkerCounters {
    requests_sent: AtomicU64,
    refreshes_received: AtomicU64,
    refresh_completes: AtomicU64,
    updates_received: AtomicU64,
    status_received: AtomicU64,
    posts_sent: AtomicU64,
    gen_msgs_sent: AtomicU64,
    gen_msgs_received: AtomicU64,
    latency_gen_msgs_sent: AtomicU64,

    image_retrieval_start: AtomicU64,
    image_retrieval_end: AtomicU64,
    steady_state_start: AtomicU64,
}

/// Which counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    RequestSent,
    RefreshReceived,
    RefreshComplete,
    UpdateReceived,
    StatusReceived,
    PostSent,
    GenMsgSent,
    GenMsgReceived,
    LatencyGenMsgSent,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::RequestSent => &self.requests_sent,
            Counter::RefreshReceived => &self.refreshes_received,
            Counter::RefreshComplete => &self.refresh_completes,
            Counter::UpdateReceived => &self.updates_received,
            Counter::StatusReceived => &self.status_received,
            Counter::PostSent => &self.posts_sent,
            Counter::GenMsgSent => &self.gen_msgs_sent,
            Counter::GenMsgReceived => &self.gen_msgs_received,
            Counter::LatencyGenMsgSent => &self.latency_gen_msgs_sent,
        }
    }

    pub fn increment(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, amount: u64) {
        let slot = self.slot(counter);
        // Single writer: a plain load/store is enough.
        slot.store(slot.load(Ordering::Relaxed) + amount, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    /// Record the tick of the first item request. Later calls are ignored.
    pub fn mark_image_retrieval_start(&self, tick: u64) {
        Self::set_once(&self.image_retrieval_start, tick);
    }

    /// Record the tick at which every requested image had been received.
    pub fn mark_image_retrieval_end(&self, tick: u64) {
        Self::set_once(&self.image_retrieval_end, tick);
    }

    /// Record the tick at which the connection entered steady state.
    pub fn mark_steady_state_start(&self, tick: u64) {
        Self::set_once(&self.steady_state_start, tick);
    }

    fn set_once(slot: &AtomicU64, tick: u64) {
        let _ = slot.compare_exchange(UNSET, tick.max(1), Ordering::Relaxed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let tick = |slot: &AtomicU64| match slot.load(Ordering::Relaxed) {
            UNSET => None,
            value => Some(value),
        };

        CounterSnapshot {
            requests_sent: self.get(Counter::RequestSent),
            refreshes_received: self.get(Counter::RefreshReceived),
            refresh_completes: self.get(Counter::RefreshComplete),
            updates_received: self.get(Counter::UpdateReceived),
            status_received: self.get(Counter::StatusReceived),
            posts_sent: self.get(Counter::PostSent),
            gen_msgs_sent: self.get(Counter::GenMsgSent),
            gen_msgs_received: self.get(Counter::GenMsgReceived),
            latency_gen_msgs_sent: self.get(Counter::LatencyGenMsgSent),
            image_retrieval_start: tick(&self.image_retrieval_start),
            image_retrieval_end: tick(&self.image_retrieval_end),
            steady_state_start: tick(&self.steady_state_start),
        }
    }
}

/// Plain copy of [`WorkerCounters`] taken by the collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub requests_sent: u64,
    pub refreshes_received: u64,
    pub refresh_completes: u64,
    pub updates_received: u64,
    pub status_received: u64,
    pub posts_sent: u64,
    pub gen_msgs_sent: u64,
    pub gen_msgs_received: u64,
    pub latency_gen_msgs_sent: u64,
    pub image_retrieval_start: Option<u64>,
    pub image_retrieval_end: Option<u64>,
    pub steady_state_start: Option<u64>,
}

impl CounterSnapshot {
    /// Counts accumulated since `previous`. Tick markers are carried over
    /// from `self`.
    pub fn delta(&self, previous: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            requests_sent: self.requests_sent.saturating_sub(previous.requests_sent),
            refreshes_received: self
                .refreshes_received
                .saturating_sub(previous.refreshes_received),
            refresh_completes: self
                .refresh_completes
                .saturating_sub(previous.refresh_completes),
            updates_received: self
                .updates_received
                .saturating_sub(previous.updates_received),
            status_received: self.status_received.saturating_sub(previous.status_received),
            posts_sent: self.posts_sent.saturating_sub(previous.posts_sent),
            gen_msgs_sent: self.gen_msgs_sent.saturating_sub(previous.gen_msgs_sent),
            gen_msgs_received: self
                .gen_msgs_received
                .saturating_sub(previous.gen_msgs_received),
            latency_gen_msgs_sent: self
                .latency_gen_msgs_sent
                .saturating_sub(previous.latency_gen_msgs_sent),
            image_retrieval_start: self.image_retrieval_start,
            image_retrieval_end: self.image_retrieval_end,
            steady_state_start: self.steady_state_start,
        }
    }

    /// Ticks spent retrieving images, once both markers are set.
    pub fn image_retrieval_ticks(&self) -> Option<u64> {
        match (self.image_retrieval_start, self.image_retrieval_end) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}
