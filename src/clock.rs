//! Monotonic tick source.
//!
//! Ticks are nanoseconds from an arbitrary, process-stable origin. Only
//! differences between two ticks are meaningful.

/// Ticks in one microsecond.
pub const TICKS_PER_MICRO: u64 = 1_000;

/// Read the monotonic clock.
#[cfg(unix)]
pub fn now_ticks() -> u64 {
    use nix::time::{clock_gettime, ClockId};

    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => (ts.tv_sec() as u64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(ts.tv_nsec() as u64),
        // CLOCK_MONOTONIC is mandatory on every supported unix.
        Err(_) => fallback::now_ticks(),
    }
}

/// Read the monotonic clock.
#[cfg(not(unix))]
pub fn now_ticks() -> u64 {
    fallback::now_ticks()
}

mod fallback {
    use std::sync::OnceLock;
    use std::time::Instant;

    static ORIGIN: OnceLock<Instant> = OnceLock::new();

    pub(super) fn now_ticks() -> u64 {
        ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

/// Convert a tick delta to microseconds.
pub fn ticks_to_micros(ticks: u64) -> f64 {
    ticks as f64 / TICKS_PER_MICRO as f64
}
