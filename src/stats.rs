//! Runtime statistics for nodes.
//!
//! Nodes register named stat handles with their [`BaseNode`]; the owning
//! workflow periodically snapshots them and emits [`Event::NodeStats`]
//! events. Two kinds of handles cover the runtime's needs: event counters
//! reported as per-second rates, and busy-time ratios reported as
//! percentages.
//!
//! [`BaseNode`]: crate::node::BaseNode
//! [`Event::NodeStats`]: crate::event::Event

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Static description of a stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatMetadata {
    /// Stable identifier (e.g. `incoming_rate`).
    pub name: &'static str,
    /// Human label (e.g. `Incoming rate`).
    pub label: &'static str,
    /// What the stat measures.
    pub description: &'static str,
    /// Display unit (e.g. `pps`, `%`).
    pub unit: &'static str,
}

/// One sampled stat value.
#[derive(Debug, Clone)]
pub struct StatSnapshot {
    /// The stat's static description.
    pub metadata: StatMetadata,
    /// The sampled value.
    pub value: f64,
}

/// A handle that can be sampled into a stat value.
///
/// Sampling is destructive: each call reports activity since the previous
/// call and resets the observation window.
pub trait StatValue: Send + Sync {
    /// Sample and reset the observation window.
    fn value(&self) -> f64;
}

/// Counts discrete events and reports them as a per-second rate.
#[derive(Debug)]
pub struct CounterRateStat {
    count: AtomicU64,
    window_start: Mutex<Instant>,
}

impl CounterRateStat {
    /// Create a new counter with an empty window.
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            window_start: Mutex::new(Instant::now()),
        }
    }

    /// Record `n` events.
    pub fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    /// Total events recorded since creation of the current window.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for CounterRateStat {
    fn default() -> Self {
        Self::new()
    }
}

impl StatValue for CounterRateStat {
    fn value(&self) -> f64 {
        let mut start = self.window_start.lock().unwrap();
        let elapsed = start.elapsed().as_secs_f64();
        *start = Instant::now();
        let count = self.count.swap(0, Ordering::Relaxed);
        if elapsed <= 0.0 {
            return 0.0;
        }
        count as f64 / elapsed
    }
}

/// Measures the share of wall-clock time spent inside timed sections,
/// reported as a percentage.
#[derive(Debug)]
pub struct DurationRatioStat {
    busy_nanos: AtomicU64,
    window_start: Mutex<Instant>,
}

impl DurationRatioStat {
    /// Create a new ratio stat with an empty window.
    pub fn new() -> Self {
        Self {
            busy_nanos: AtomicU64::new(0),
            window_start: Mutex::new(Instant::now()),
        }
    }

    /// Start a timed section; the elapsed time is recorded when the
    /// returned guard drops.
    pub fn timer(&self) -> RatioTimer<'_> {
        RatioTimer {
            stat: self,
            start: Instant::now(),
        }
    }

    fn record(&self, nanos: u64) {
        self.busy_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl Default for DurationRatioStat {
    fn default() -> Self {
        Self::new()
    }
}

impl StatValue for DurationRatioStat {
    fn value(&self) -> f64 {
        let mut start = self.window_start.lock().unwrap();
        let elapsed = start.elapsed().as_nanos() as f64;
        *start = Instant::now();
        let busy = self.busy_nanos.swap(0, Ordering::Relaxed) as f64;
        if elapsed <= 0.0 {
            return 0.0;
        }
        (busy / elapsed * 100.0).min(100.0)
    }
}

/// Guard measuring one timed section of a [`DurationRatioStat`].
pub struct RatioTimer<'a> {
    stat: &'a DurationRatioStat,
    start: Instant,
}

impl Drop for RatioTimer<'_> {
    fn drop(&mut self) {
        self.stat.record(self.start.elapsed().as_nanos() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_counter_rate_counts() {
        let stat = CounterRateStat::new();
        stat.add(3);
        stat.add(2);
        assert_eq!(stat.count(), 5);
    }

    #[test]
    fn test_counter_rate_resets_on_sample() {
        let stat = CounterRateStat::new();
        stat.add(10);
        std::thread::sleep(Duration::from_millis(10));
        let rate = stat.value();
        assert!(rate > 0.0);
        assert_eq!(stat.count(), 0);
    }

    #[test]
    fn test_duration_ratio_bounds() {
        let stat = DurationRatioStat::new();
        {
            let _t = stat.timer();
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(5));
        let ratio = stat.value();
        assert!(ratio > 0.0);
        assert!(ratio <= 100.0);
    }

    #[test]
    fn test_duration_ratio_idle_is_zero() {
        let stat = DurationRatioStat::new();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(stat.value(), 0.0);
    }
}
