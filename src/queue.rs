//! # Pooled Sample Queue
//!
//! A [`SampleQueue`] is the hand-off point between one worker thread and the
//! collector thread. It is made of two lock-free containers:
//!
//! - the **pending list**, samples submitted by the worker and not yet drained;
//! - the **free pool**, boxed samples the collector has handed back for reuse.
//!
//! ```text
//!   worker ──submit──► pending ──drain──► collector
//!      ▲                                      │
//!      └──────────── free pool ◄──recycle─────┘
//! ```
//!
//! Under a steady submission rate the free pool holds enough boxes to cover a
//! whole drain interval and the allocation counter stops moving.
//!
//! ## Usage Contract
//!
//! One thread submits, one thread drains, and a drain never overlaps another
//! drain of the same queue. Both containers are `SegQueue`s, so a submission
//! racing a drain is safe; the contract is what keeps the bookkeeping counters
//! exact, since each of them has a single writer.
//!
//! ## Accounting
//!
//! The worker publishes `submitted` with a release store after the push, and
//! the collector derives the pending count from that one load. Read on the
//! collector thread, [`SampleQueue::stats`] therefore always satisfies
//!
//! ```text
//! submitted == drained + discarded + pending
//! ```
//!
//! even while the worker keeps submitting. The physical pending list can be
//! ahead of `pending` by the one submission in flight, never behind it.

use crate::error::{Error, Result};
use crate::sample::TimeSample;
use crossbeam::queue::SegQueue;
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};

/// Increment a counter that only one thread ever writes.
///
/// Avoids a locked read-modify-write on the submission path.
#[inline]
fn bump(counter: &AtomicU64) {
    counter.store(counter.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
}

/// A drained sample on its way back to the free pool.
///
/// The handle is move-only: handing it to [`SampleQueue::recycle`] consumes
/// it, so a sample cannot be returned twice.
#[derive(Debug)]
pub struct PooledSample(Box<TimeSample>);

impl Deref for PooledSample {
    type Target = TimeSample;

    fn deref(&self) -> &TimeSample {
        &self.0
    }
}

/// Point-in-time view of a queue's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Boxes created because the free pool was empty.
    pub allocated: u64,
    pub submitted: u64,
    pub drained: u64,
    /// Submitted samples released by cleanup without being drained.
    pub discarded: u64,
    pub recycled: u64,
    /// Submissions refused because the queue was closed.
    pub rejected: u64,
    /// Published submissions not yet drained or discarded.
    pub pending: usize,
    pub free: usize,
}

impl QueueStats {
    /// Samples drained but not yet recycled.
    pub fn outstanding(&self) -> u64 {
        self.drained.saturating_sub(self.recycled)
    }
}

/// Pooled, append-only holding area for the samples of one worker.
#[derive(Debug, Default)]
pub struct SampleQueue {
    free: SegQueue<Box<TimeSample>>,
    pending: SegQueue<Box<TimeSample>>,
    closed: AtomicBool,
    draining: AtomicBool,

    // Worker-written.
    allocated: AtomicU64,
    submitted: AtomicU64,
    rejected: AtomicU64,

    // Collector-written.
    drained: AtomicU64,
    recycled: AtomicU64,

    // Written by cleanup, and by a submission that lost the race with it.
    discarded: AtomicU64,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue whose free pool already holds `count` samples.
    pub fn with_preallocated(count: usize) -> Self {
        let queue = Self::new();
        for _ in 0..count {
            queue.free.push(Box::default());
        }
        queue.allocated.store(count as u64, Ordering::Relaxed);
        queue
    }

    /// Record one sample. Worker side.
    ///
    /// Reuses a box from the free pool when one is available and falls back
    /// to a fresh allocation otherwise. When `ticks` is `None` the latency is
    /// derived from `end_time - start_time` when the sample is read.
    ///
    /// # Errors
    ///
    /// [`Error::QueueClosed`] once [`SampleQueue::cleanup`] has run.
    pub fn submit(&self, start_time: u64, end_time: u64, ticks: Option<u64>) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            bump(&self.rejected);
            return Err(Error::QueueClosed);
        }

        let sample = match self.free.pop() {
            Some(mut sample) => {
                sample.fill(start_time, end_time, ticks);
                sample
            }
            None => {
                bump(&self.allocated);
                Box::new(TimeSample::new(start_time, end_time, ticks))
            }
        };

        self.pending.push(sample);
        // Publishes the push: a drain never takes more than it has seen here.
        self.submitted
            .store(self.submitted.load(Ordering::Relaxed) + 1, Ordering::Release);

        // Pairs with the fence in `cleanup`: either cleanup sees this sample,
        // or this check sees the queue closed and releases it.
        fence(Ordering::SeqCst);
        if self.closed.load(Ordering::Relaxed) {
            self.release_pending();
        }
        Ok(())
    }

    /// Take every sample pending at this moment. Collector side.
    ///
    /// Samples the worker submits while the drain is in progress stay in the
    /// pending list for the next cycle. Samples the iterator does not yield
    /// before it is dropped also stay pending.
    pub fn drain(&self) -> Drain<'_> {
        let already_draining = self.draining.swap(true, Ordering::Acquire);
        debug_assert!(
            !already_draining,
            "SampleQueue drained by two readers at once"
        );

        Drain {
            queue: self,
            remaining: self.published_pending(),
        }
    }

    /// Published submissions minus everything already taken out.
    fn published_pending(&self) -> usize {
        let submitted = self.submitted.load(Ordering::Acquire);
        let taken = self.drained.load(Ordering::Relaxed) + self.discarded.load(Ordering::Relaxed);
        submitted.saturating_sub(taken) as usize
    }

    fn release_pending(&self) {
        let mut released = 0;
        while self.pending.pop().is_some() {
            released += 1;
        }
        if released > 0 {
            self.discarded.fetch_add(released, Ordering::Relaxed);
        }
    }

    /// Hand a drained sample back to the free pool. Collector side.
    ///
    /// Samples recycled into a closed queue are released instead.
    pub fn recycle(&self, sample: PooledSample) {
        bump(&self.recycled);
        if !self.closed.load(Ordering::Relaxed) {
            self.free.push(sample.0);
        }
    }

    /// Drain the queue, show each sample to `visit`, and recycle it.
    ///
    /// Returns the number of samples visited.
    pub fn drain_with<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(&TimeSample),
    {
        let mut count = 0;
        for sample in self.drain() {
            visit(&*sample);
            self.recycle(sample);
            count += 1;
        }
        count
    }

    /// Close the queue and release every sample it holds.
    ///
    /// Idempotent. Later submissions are rejected; a submission already past
    /// its closed check releases its own sample, so nothing stays pending.
    pub fn cleanup(&self) {
        self.closed.store(true, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        self.release_pending();
        while self.free.pop().is_some() {}
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Snapshot of the counters. Exact when read on the collector thread.
    pub fn stats(&self) -> QueueStats {
        let submitted = self.submitted.load(Ordering::Acquire);
        let drained = self.drained.load(Ordering::Relaxed);
        let discarded = self.discarded.load(Ordering::Relaxed);
        QueueStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            submitted,
            drained,
            discarded,
            recycled: self.recycled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            pending: submitted.saturating_sub(drained + discarded) as usize,
            free: self.free.len(),
        }
    }
}

/// Iterator over the samples taken by one [`SampleQueue::drain`] call.
#[derive(Debug)]
pub struct Drain<'a> {
    queue: &'a SampleQueue,
    remaining: usize,
}

impl Iterator for Drain<'_> {
    type Item = PooledSample;

    fn next(&mut self) -> Option<PooledSample> {
        if self.remaining == 0 {
            return None;
        }
        match self.queue.pending.pop() {
            Some(sample) => {
                self.remaining -= 1;
                bump(&self.queue.drained);
                Some(PooledSample(sample))
            }
            None => {
                // Only reachable if the queue was cleaned up mid-drain.
                self.remaining = 0;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        self.queue.draining.store(false, Ordering::Release);
    }
}
