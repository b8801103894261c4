use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Where a worker is in the shutdown handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutdownState {
    Running,
    ShutdownRequested,
    ShutdownAcknowledged,
}

impl std::fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownState::Running => write!(f, "running"),
            ShutdownState::ShutdownRequested => write!(f, "shutdown requested"),
            ShutdownState::ShutdownAcknowledged => write!(f, "shutdown acknowledged"),
        }
    }
}

/// Two-flag cooperative shutdown.
///
/// The collector raises `requested`; the worker polls it between operations,
/// stops producing samples, and raises `acknowledged`. Neither side ever
/// waits on the other. Both flags only move from `false` to `true`.
#[derive(Debug, Default)]
pub struct ShutdownHandshake {
    requested: AtomicBool,
    acknowledged: AtomicBool,
}

impl ShutdownHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop. Collector side.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    /// Worker side; may lag the request by one polling interval.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    /// Declare that no further samples will be produced. Worker side.
    ///
    /// A worker that stops on its own also marks the request, so the state
    /// never skips `ShutdownRequested`. The release store publishes every
    /// submission made before it to the collector that observes the flag.
    pub fn acknowledge(&self) {
        self.requested.store(true, Ordering::Relaxed);
        self.acknowledged.store(true, Ordering::Release);
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ShutdownState {
        if self.is_acknowledged() {
            ShutdownState::ShutdownAcknowledged
        } else if self.is_requested() {
            ShutdownState::ShutdownRequested
        } else {
            ShutdownState::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_state_transitions() {
        let handshake = ShutdownHandshake::new();
        assert_eq!(handshake.state(), ShutdownState::Running);

        handshake.request();
        assert_eq!(handshake.state(), ShutdownState::ShutdownRequested);
        assert!(!handshake.is_acknowledged());

        handshake.acknowledge();
        assert_eq!(handshake.state(), ShutdownState::ShutdownAcknowledged);
    }

    #[test]
    fn test_flags_never_revert() {
        let handshake = ShutdownHandshake::new();
        handshake.request();
        handshake.acknowledge();
        handshake.request();
        for _ in 0..100 {
            assert!(handshake.is_requested());
            assert!(handshake.is_acknowledged());
        }
    }

    #[test]
    fn test_acknowledge_without_request_marks_requested() {
        let handshake = ShutdownHandshake::new();
        handshake.acknowledge();
        assert!(handshake.is_requested());
        assert!(handshake.is_acknowledged());
        assert_eq!(handshake.state(), ShutdownState::ShutdownAcknowledged);
    }

    #[test]
    fn test_polling_worker_acknowledges() {
        let handshake = Arc::new(ShutdownHandshake::new());
        let worker_side = Arc::clone(&handshake);

        let worker = thread::spawn(move || {
            let mut iterations = 0u64;
            while !worker_side.is_requested() {
                iterations += 1;
                thread::sleep(Duration::from_millis(1));
            }
            worker_side.acknowledge();
            iterations
        });

        thread::sleep(Duration::from_millis(20));
        handshake.request();

        // Collector polls without blocking on the worker.
        let mut polls = 0;
        while !handshake.is_acknowledged() {
            polls += 1;
            assert!(polls < 5_000, "worker never acknowledged");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(worker.join().unwrap() > 0);
        assert_eq!(handshake.state(), ShutdownState::ShutdownAcknowledged);
    }

    #[test]
    fn test_display() {
        assert_eq!(ShutdownState::Running.to_string(), "running");
        assert_eq!(
            ShutdownState::ShutdownAcknowledged.to_string(),
            "shutdown acknowledged"
        );
    }
}
