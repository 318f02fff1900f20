//! In-process metrics registry. Counters, gauges and histograms are
//! registered dynamically on first use rather than pre-declared, since
//! callers (plugin scorers, per-unit bucket accounting) mint metric names
//! at runtime.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Thread-safe metrics registry shared across actors via `Arc`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, AtomicU64>,
    gauges: DashMap<String, AtomicU64>,
    histograms: DashMap<String, Arc<Histogram>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter, creating it at zero on first use.
    pub fn increment_counter(&self, name: &str, value: u64) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Sets a gauge, creating it on first use.
    pub fn set_gauge(&self, name: &str, value: u64) {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Records a duration sample, creating the histogram on first use.
    pub fn record_histogram(&self, name: &str, value: Duration) {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::new()))
            .record(value);
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn get_gauge(&self, name: &str) -> u64 {
        self.gauges
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn histogram(&self, name: &str) -> Option<Arc<Histogram>> {
        self.histograms.get(name).map(|h| h.clone())
    }

    /// Starts a timer that records into `name` when dropped.
    pub fn start_timer(self: &Arc<Self>, name: impl Into<String>) -> Timer {
        Timer::new(name.into(), self.clone())
    }
}

/// Latency histogram over microsecond samples, capped to a rolling window
/// for percentile estimation.
#[derive(Debug)]
pub struct Histogram {
    samples: parking_lot::Mutex<Vec<u64>>,
    count: AtomicU64,
    sum: AtomicU64,
}

const MAX_SAMPLES: usize = 1000;

impl Histogram {
    pub fn new() -> Self {
        Self {
            samples: parking_lot::Mutex::new(Vec::new()),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    pub fn record(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(micros, Ordering::Relaxed);

        let mut samples = self.samples.lock();
        samples.push(micros);
        if samples.len() > MAX_SAMPLES {
            samples.remove(0);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn average(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    pub fn percentile(&self, p: f64) -> u64 {
        let mut samples = self.samples.lock();
        if samples.is_empty() {
            return 0;
        }
        samples.sort_unstable();
        let index = ((samples.len() - 1) as f64 * p / 100.0) as usize;
        samples[index]
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop-based duration recorder, e.g. `let _t = registry.start_timer("reserve.latency");`.
pub struct Timer {
    start: Instant,
    name: String,
    registry: Arc<MetricsRegistry>,
}

impl Timer {
    fn new(name: String, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            start: Instant::now(),
            name,
            registry,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.registry.record_histogram(&self.name, duration);
    }
}

/// Metric name constants shared across crates, matching the scheduling
/// vocabulary of §4.3-§4.7.
pub mod common {
    pub const DECISIONS_TOTAL: &str = "schedule.decisions.total";
    pub const DECISIONS_FAILED: &str = "schedule.decisions.failed";
    pub const QUEUE_DEPTH: &str = "schedule.queue.depth";
    pub const RESERVE_LATENCY: &str = "underlayer.reserve.latency";
    pub const BIND_LATENCY: &str = "underlayer.bind.latency";
    pub const HEARTBEAT_MISSED: &str = "underlayer.heartbeat.missed";
    pub const GROUP_ROLLBACKS: &str = "group.rollbacks.total";
    pub const RESOURCE_VIEW_CHANGES_APPLIED: &str = "resource_view.changes.applied";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_gauges_register_on_first_use() {
        let registry = MetricsRegistry::new();
        registry.increment_counter("test", 5);
        registry.set_gauge("memory", 1024);

        assert_eq!(registry.get_counter("test"), 5);
        assert_eq!(registry.get_gauge("memory"), 1024);
    }

    #[test]
    fn unrecorded_metrics_read_as_zero() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.get_counter("never-touched"), 0);
    }

    #[test]
    fn histogram_tracks_count_and_average() {
        let hist = Histogram::new();
        hist.record(Duration::from_millis(100));
        hist.record(Duration::from_millis(200));
        hist.record(Duration::from_millis(300));

        assert_eq!(hist.count(), 3);
        assert_eq!(hist.average(), 200_000.0);
    }
}
