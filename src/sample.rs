use serde::{Deserialize, Serialize};

/// A single latency observation.
///
/// Instances live in a [`SampleQueue`](crate::queue::SampleQueue) and are
/// recycled through its free pool, so a sample is only ever overwritten by
/// [`TimeSample::fill`] while it sits outside the pending list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSample {
    start_time: u64,
    end_time: u64,
    ticks_override: Option<u64>,
}

impl TimeSample {
    pub fn new(start_time: u64, end_time: u64, ticks: Option<u64>) -> Self {
        Self {
            start_time,
            end_time,
            ticks_override: ticks,
        }
    }

    /// Overwrite every field of a recycled sample.
    pub(crate) fn fill(&mut self, start_time: u64, end_time: u64, ticks: Option<u64>) {
        self.start_time = start_time;
        self.end_time = end_time;
        self.ticks_override = ticks;
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    /// Latency in ticks: the supplied delta if one was given, otherwise
    /// `end_time - start_time`, clamped at zero.
    pub fn ticks(&self) -> u64 {
        self.ticks_override
            .unwrap_or_else(|| self.end_time.saturating_sub(self.start_time))
    }

    /// Whether the delta was supplied directly instead of derived.
    pub fn has_ticks_override(&self) -> bool {
        self.ticks_override.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_ticks() {
        let sample = TimeSample::new(100, 150, None);
        assert_eq!(sample.ticks(), 50);
        assert!(!sample.has_ticks_override());
    }

    #[test]
    fn test_ticks_override_wins() {
        let sample = TimeSample::new(100, 150, Some(42));
        assert_eq!(sample.ticks(), 42);
        assert!(sample.has_ticks_override());
    }

    #[test]
    fn test_backwards_clock_clamps_to_zero() {
        let sample = TimeSample::new(200, 150, None);
        assert_eq!(sample.ticks(), 0);
    }

    #[test]
    fn test_fill_replaces_all_fields() {
        let mut sample = TimeSample::new(1, 2, Some(7));
        sample.fill(10, 30, None);
        assert_eq!(sample, TimeSample::new(10, 30, None));
    }
}
