//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention. All
//! counter updates are lock-free; reporting is the only operation that needs
//! synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Lock-free metrics collector for the detection pipeline
pub struct Metrics {
    /// Total samples ever processed (monotonic)
    samples_total: AtomicU64,
    /// Samples since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Samples dropped because the event channel was full (monotonic)
    samples_dropped: AtomicU64,
    /// Samples discarded by the ingest staleness guard (monotonic)
    samples_stale: AtomicU64,
    /// Sum of sample-processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max sample-processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Settle timers armed (monotonic)
    settle_armed_total: AtomicU64,
    /// Settle timers cancelled before firing (monotonic)
    settle_cancelled_total: AtomicU64,
    /// Confirmed parks (monotonic)
    parks_total: AtomicU64,
    /// Confirmed departures (monotonic)
    departures_total: AtomicU64,
    /// Spots successfully published (monotonic)
    publishes_total: AtomicU64,
    /// Failed publish attempts (monotonic)
    publish_failures_total: AtomicU64,
    /// Proximity notifications emitted (monotonic)
    notifications_total: AtomicU64,
    /// Live-spot poll failures (monotonic)
    spot_poll_errors_total: AtomicU64,
    /// Current detection state gauge (DetectionState::gauge_value)
    detection_state: AtomicU64,
    /// Current size of the live free-spot set
    live_spots: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            samples_stale: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            settle_armed_total: AtomicU64::new(0),
            settle_cancelled_total: AtomicU64::new(0),
            parks_total: AtomicU64::new(0),
            departures_total: AtomicU64::new(0),
            publishes_total: AtomicU64::new(0),
            publish_failures_total: AtomicU64::new(0),
            notifications_total: AtomicU64::new(0),
            spot_poll_errors_total: AtomicU64::new(0),
            detection_state: AtomicU64::new(0),
            live_spots: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a processed sample with its handling latency (lock-free)
    #[inline]
    pub fn record_sample_processed(&self, latency_us: u64) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_stale(&self) {
        self.samples_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_settle_armed(&self) {
        self.settle_armed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_settle_cancelled(&self) {
        self.settle_cancelled_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_park_detected(&self) {
        self.parks_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_departure(&self) {
        self.departures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_ok(&self) {
        self.publishes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_failure(&self) {
        self.publish_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notifications(&self, count: u64) {
        self.notifications_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_spot_poll_error(&self) {
        self.spot_poll_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_detection_state(&self, state: u64) {
        self.detection_state.store(state, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_live_spots(&self, count: u64) {
        self.live_spots.store(count, Ordering::Relaxed);
    }

    // Monotonic getters used by the Prometheus endpoint and tests

    #[inline]
    pub fn samples_total(&self) -> u64 {
        self.samples_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn samples_stale(&self) -> u64 {
        self.samples_stale.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn settle_armed_total(&self) -> u64 {
        self.settle_armed_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn settle_cancelled_total(&self) -> u64 {
        self.settle_cancelled_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn parks_total(&self) -> u64 {
        self.parks_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn departures_total(&self) -> u64 {
        self.departures_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn publishes_total(&self) -> u64 {
        self.publishes_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn publish_failures_total(&self) -> u64 {
        self.publish_failures_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_total(&self) -> u64 {
        self.notifications_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn spot_poll_errors_total(&self) -> u64 {
        self.spot_poll_errors_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn detection_state(&self) -> u64 {
        self.detection_state.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn live_spots(&self) -> u64 {
        self.live_spots.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset the periodic window
    ///
    /// This is the only method that resets counters; it uses atomic swap to
    /// get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let samples_count = self.samples_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_us.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let samples_per_sec = if elapsed.as_secs_f64() > 0.0 {
            samples_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if samples_count > 0 { latency_sum / samples_count } else { 0 };

        MetricsSummary {
            samples_total: self.samples_total(),
            samples_per_sec,
            avg_latency_us: avg_latency,
            max_latency_us: latency_max,
            samples_dropped: self.samples_dropped(),
            samples_stale: self.samples_stale(),
            parks_total: self.parks_total(),
            departures_total: self.departures_total(),
            publishes_total: self.publishes_total(),
            publish_failures_total: self.publish_failures_total(),
            notifications_total: self.notifications_total(),
            spot_poll_errors_total: self.spot_poll_errors_total(),
            detection_state: self.detection_state(),
            live_spots: self.live_spots(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub samples_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub samples_dropped: u64,
    pub samples_stale: u64,
    pub parks_total: u64,
    pub departures_total: u64,
    pub publishes_total: u64,
    pub publish_failures_total: u64,
    pub notifications_total: u64,
    pub spot_poll_errors_total: u64,
    pub detection_state: u64,
    pub live_spots: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            samples_per_sec = format!("{:.1}", self.samples_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            parks = %self.parks_total,
            publishes = %self.publishes_total,
            publish_failures = %self.publish_failures_total,
            notifications = %self.notifications_total,
            live_spots = %self.live_spots,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.samples_total(), 0);
        assert_eq!(metrics.publishes_total(), 0);
        assert_eq!(metrics.detection_state(), 0);
    }

    #[test]
    fn test_record_sample() {
        let metrics = Metrics::new();

        metrics.record_sample_processed(100);
        assert_eq!(metrics.samples_total(), 1);

        metrics.record_sample_processed(200);
        assert_eq!(metrics.samples_total(), 2);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_report_resets_window() {
        let metrics = Metrics::new();

        metrics.record_sample_processed(100);
        metrics.record_sample_processed(300);
        metrics.record_park_detected();
        metrics.record_publish_ok();

        let summary = metrics.report();
        assert_eq!(summary.samples_total, 2);
        assert_eq!(summary.avg_latency_us, 200);
        assert_eq!(summary.max_latency_us, 300);
        assert_eq!(summary.parks_total, 1);
        assert_eq!(summary.publishes_total, 1);

        // Window counters reset, monotonic ones retained
        assert_eq!(metrics.samples_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.samples_total(), 2);
    }

    #[test]
    fn test_max_latency_tracking() {
        let metrics = Metrics::new();

        metrics.record_sample_processed(100);
        metrics.record_sample_processed(500);
        metrics.record_sample_processed(200);

        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 500);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_sample_processed(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.samples_total(), 10_000);
    }

    #[test]
    fn test_state_gauge() {
        let metrics = Metrics::new();
        metrics.set_detection_state(4);
        assert_eq!(metrics.detection_state(), 4);
        assert_eq!(metrics.report().detection_state, 4);
    }
}
