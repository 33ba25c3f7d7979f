//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::TransitionKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total fixes accepted by the detector (monotonic)
    fixes_total: AtomicU64,
    /// Fixes since last report (reset on report)
    fixes_since_report: AtomicU64,
    /// Sum of fix evaluation latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max fix evaluation latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Fix evaluation latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Fixes rejected as not newer than the last accepted fix (monotonic)
    fixes_stale: AtomicU64,
    /// Fixes rejected as invalid or too inaccurate (monotonic)
    fixes_rejected: AtomicU64,
    /// Fixes dropped by position sources because the engine queue was full
    fixes_dropped: AtomicU64,
    /// Scheduler ticks processed (monotonic)
    ticks_total: AtomicU64,
    /// Forwarded transitions per kind (monotonic)
    enter_total: AtomicU64,
    exit_total: AtomicU64,
    dwell_total: AtomicU64,
    /// Candidates suppressed by dedup (monotonic)
    suppressed_total: AtomicU64,
    /// Notifications dropped because the notify channel was full (monotonic)
    notify_dropped: AtomicU64,
    /// Notifications handed to all sinks (monotonic)
    notify_delivered: AtomicU64,
    /// Individual sink delivery failures (monotonic)
    sink_failures: AtomicU64,
    /// Sink delivery latency histogram buckets (reset on report)
    delivery_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of delivery latencies (reset on report)
    delivery_latency_sum_us: AtomicU64,
    /// Max delivery latency (reset on report)
    delivery_latency_max_us: AtomicU64,
    /// Currently registered regions (gauge)
    regions_active: AtomicU64,
    /// Regions removed by expiry (monotonic)
    regions_expired: AtomicU64,
    /// Current engine command queue depth (updated by sampler)
    command_queue_depth: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fixes_total: AtomicU64::new(0),
            fixes_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            fixes_stale: AtomicU64::new(0),
            fixes_rejected: AtomicU64::new(0),
            fixes_dropped: AtomicU64::new(0),
            ticks_total: AtomicU64::new(0),
            enter_total: AtomicU64::new(0),
            exit_total: AtomicU64::new(0),
            dwell_total: AtomicU64::new(0),
            suppressed_total: AtomicU64::new(0),
            notify_dropped: AtomicU64::new(0),
            notify_delivered: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            delivery_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            delivery_latency_sum_us: AtomicU64::new(0),
            delivery_latency_max_us: AtomicU64::new(0),
            regions_active: AtomicU64::new(0),
            regions_expired: AtomicU64::new(0),
            command_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an accepted fix with its evaluation latency (lock-free)
    #[inline]
    pub fn record_fix_processed(&self, latency_us: u64) {
        self.fixes_total.fetch_add(1, Ordering::Relaxed);
        self.fixes_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        // Update histogram bucket
        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        // Update max
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_fix_stale(&self) {
        self.fixes_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_rejected(&self) {
        self.fixes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fix dropped at ingest because the engine queue was full
    #[inline]
    pub fn record_fix_dropped(&self) {
        self.fixes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tick(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transition forwarded to the notify channel
    #[inline]
    pub fn record_transition(&self, kind: TransitionKind) {
        let counter = match kind {
            TransitionKind::Enter => &self.enter_total,
            TransitionKind::Exit => &self.exit_total,
            TransitionKind::Dwell => &self.dwell_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_suppressed(&self) {
        self.suppressed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notify_dropped(&self) {
        self.notify_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a notification that went through every sink (lock-free)
    #[inline]
    pub fn record_delivery(&self, latency_us: u64) {
        self.notify_delivered.fetch_add(1, Ordering::Relaxed);
        self.delivery_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(latency_us);
        self.delivery_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.delivery_latency_max_us, latency_us);
    }

    #[inline]
    pub fn set_regions_active(&self, count: usize) {
        self.regions_active.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_region_expired(&self) {
        self.regions_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Set current command queue depth (called by sampler)
    #[inline]
    pub fn set_command_queue_depth(&self, depth: u64) {
        self.command_queue_depth.store(depth, Ordering::Relaxed);
    }

    #[inline]
    pub fn fixes_total(&self) -> u64 {
        self.fixes_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_stale(&self) -> u64 {
        self.fixes_stale.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_rejected(&self) -> u64 {
        self.fixes_rejected.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_dropped(&self) -> u64 {
        self.fixes_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn transitions_total(&self, kind: TransitionKind) -> u64 {
        match kind {
            TransitionKind::Enter => self.enter_total.load(Ordering::Relaxed),
            TransitionKind::Exit => self.exit_total.load(Ordering::Relaxed),
            TransitionKind::Dwell => self.dwell_total.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notify_dropped(&self) -> u64 {
        self.notify_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn regions_active(&self) -> u64 {
        self.regions_active.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let fixes_count = self.fixes_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let delivery_buckets = swap_buckets(&self.delivery_latency_buckets);
        let delivery_sum = self.delivery_latency_sum_us.swap(0, Ordering::Relaxed);
        let delivery_max = self.delivery_latency_max_us.swap(0, Ordering::Relaxed);
        let delivery_count: u64 = delivery_buckets.iter().sum();

        // Calculate elapsed time and reset
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let fixes_per_sec = if elapsed.as_secs_f64() > 0.0 {
            fixes_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if fixes_count > 0 { latency_sum / fixes_count } else { 0 };
        let delivery_avg = if delivery_count > 0 { delivery_sum / delivery_count } else { 0 };

        MetricsSummary {
            fixes_total: self.fixes_total.load(Ordering::Relaxed),
            fixes_per_sec,
            avg_fix_latency_us: avg_latency,
            max_fix_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            fixes_stale: self.fixes_stale.load(Ordering::Relaxed),
            fixes_rejected: self.fixes_rejected.load(Ordering::Relaxed),
            fixes_dropped: self.fixes_dropped.load(Ordering::Relaxed),
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            enter_total: self.enter_total.load(Ordering::Relaxed),
            exit_total: self.exit_total.load(Ordering::Relaxed),
            dwell_total: self.dwell_total.load(Ordering::Relaxed),
            suppressed_total: self.suppressed_total.load(Ordering::Relaxed),
            notify_dropped: self.notify_dropped.load(Ordering::Relaxed),
            notify_delivered: self.notify_delivered.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            delivery_lat_buckets: delivery_buckets,
            delivery_lat_avg_us: delivery_avg,
            delivery_lat_max_us: delivery_max,
            delivery_lat_p99_us: percentile_from_buckets(&delivery_buckets, 0.99),
            regions_active: self.regions_active.load(Ordering::Relaxed),
            regions_expired: self.regions_expired.load(Ordering::Relaxed),
            command_queue_depth: self.command_queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub fixes_total: u64,
    pub fixes_per_sec: f64,
    pub avg_fix_latency_us: u64,
    pub max_fix_latency_us: u64,
    /// Fix evaluation latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub fixes_stale: u64,
    pub fixes_rejected: u64,
    pub fixes_dropped: u64,
    pub ticks_total: u64,
    pub enter_total: u64,
    pub exit_total: u64,
    pub dwell_total: u64,
    pub suppressed_total: u64,
    pub notify_dropped: u64,
    pub notify_delivered: u64,
    pub sink_failures: u64,
    /// Sink delivery latency histogram buckets (same bounds)
    pub delivery_lat_buckets: [u64; NUM_BUCKETS],
    pub delivery_lat_avg_us: u64,
    pub delivery_lat_max_us: u64,
    pub delivery_lat_p99_us: u64,
    pub regions_active: u64,
    pub regions_expired: u64,
    pub command_queue_depth: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            fixes_total = %self.fixes_total,
            fixes_per_sec = format!("{:.1}", self.fixes_per_sec),
            avg_latency_us = %self.avg_fix_latency_us,
            max_latency_us = %self.max_fix_latency_us,
            p99_us = %self.lat_p99_us,
            stale = %self.fixes_stale,
            rejected = %self.fixes_rejected,
            dropped = %self.fixes_dropped,
            enter = %self.enter_total,
            exit = %self.exit_total,
            dwell = %self.dwell_total,
            suppressed = %self.suppressed_total,
            notify_dropped = %self.notify_dropped,
            sink_failures = %self.sink_failures,
            regions = %self.regions_active,
            "metrics"
        );
    }
}
