//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so poll cycles never contend on a mutex for bookkeeping.
//! Periodic values (latency histogram, sums, max) are swapped to zero on
//! `report()`; totals are monotonic.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must not drive engine logic.

use crate::domain::fleet::StatusCounts;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Fetch latency bucket boundaries (milliseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
const BUCKET_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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

/// Read all buckets, optionally swapping them to zero
#[inline]
fn read_buckets(buckets: &[AtomicU64; NUM_BUCKETS], reset: bool) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = read_value(bucket, reset);
    }
    result
}

#[inline]
fn read_value(value: &AtomicU64, reset: bool) -> u64 {
    if reset {
        value.swap(0, Ordering::Relaxed)
    } else {
        value.load(Ordering::Relaxed)
    }
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile).ceil() as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Connection state values for the Prometheus gauge
pub const CONNECTION_IDLE: u64 = 0;
pub const CONNECTION_CONNECTING: u64 = 1;
pub const CONNECTION_CONNECTED: u64 = 2;
pub const CONNECTION_UPDATING: u64 = 3;
pub const CONNECTION_ERROR: u64 = 4;

/// Lock-free metrics collector
pub struct Metrics {
    /// Poll cycles applied to the fleet (monotonic)
    cycles_total: AtomicU64,
    /// Poll cycles that failed with an adapter error (monotonic)
    cycles_failed: AtomicU64,
    /// Poll cycles whose result was discarded after stop/reconfigure (monotonic)
    cycles_discarded: AtomicU64,
    /// Ticks skipped because a cycle was still in flight (monotonic)
    cycles_skipped: AtomicU64,
    /// Raw rows returned by adapters (monotonic)
    rows_fetched: AtomicU64,
    /// Rows dropped by the normalizer (monotonic)
    rows_dropped: AtomicU64,
    /// Fetch latency histogram buckets (reset on report)
    fetch_latency_buckets: [AtomicU64; NUM_BUCKETS],
    fetch_latency_sum_ms: AtomicU64,
    fetch_latency_max_ms: AtomicU64,
    fetches_since_report: AtomicU64,
    /// Current fleet gauges
    fleet_size: AtomicU64,
    status_vor: AtomicU64,
    status_on_route: AtomicU64,
    status_yard: AtomicU64,
    status_running_defect: AtomicU64,
    connection_state: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            cycles_discarded: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            rows_fetched: AtomicU64::new(0),
            rows_dropped: AtomicU64::new(0),
            fetch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            fetch_latency_sum_ms: AtomicU64::new(0),
            fetch_latency_max_ms: AtomicU64::new(0),
            fetches_since_report: AtomicU64::new(0),
            fleet_size: AtomicU64::new(0),
            status_vor: AtomicU64::new(0),
            status_on_route: AtomicU64::new(0),
            status_yard: AtomicU64::new(0),
            status_running_defect: AtomicU64::new(0),
            connection_state: AtomicU64::new(CONNECTION_IDLE),
        }
    }

    /// Record a completed adapter fetch (success or failure)
    #[inline]
    pub fn record_fetch_latency(&self, latency_ms: u64) {
        self.fetches_since_report.fetch_add(1, Ordering::Relaxed);
        self.fetch_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        let bucket = bucket_index(latency_ms);
        self.fetch_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.fetch_latency_max_ms, latency_ms);
    }

    /// Record a batch that made it into the fleet
    #[inline]
    pub fn record_cycle_applied(&self, rows_fetched: usize, rows_dropped: usize) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.rows_fetched.fetch_add(rows_fetched as u64, Ordering::Relaxed);
        self.rows_dropped.fetch_add(rows_dropped as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle_discarded(&self) {
        self.cycles_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle_skipped(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish fleet gauges after any fleet mutation
    pub fn set_fleet(&self, size: usize, counts: &StatusCounts) {
        self.fleet_size.store(size as u64, Ordering::Relaxed);
        self.status_vor.store(counts.vor as u64, Ordering::Relaxed);
        self.status_on_route.store(counts.on_route as u64, Ordering::Relaxed);
        self.status_yard.store(counts.yard as u64, Ordering::Relaxed);
        self.status_running_defect.store(counts.running_defect as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_connection_state(&self, state: u64) {
        self.connection_state.store(state, Ordering::Relaxed);
    }

    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub fn cycles_discarded(&self) -> u64 {
        self.cycles_discarded.load(Ordering::Relaxed)
    }

    pub fn cycles_skipped(&self) -> u64 {
        self.cycles_skipped.load(Ordering::Relaxed)
    }

    pub fn connection_state(&self) -> u64 {
        self.connection_state.load(Ordering::Relaxed)
    }

    /// Generate a summary, resetting the periodic latency values
    pub fn report(&self) -> MetricsSummary {
        self.summarize(true)
    }

    /// Same as `report` but leaves the periodic values in place (scrapes)
    pub fn peek(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let fetches = read_value(&self.fetches_since_report, reset);
        let latency_sum = read_value(&self.fetch_latency_sum_ms, reset);
        let latency_max = read_value(&self.fetch_latency_max_ms, reset);
        let latency_buckets = read_buckets(&self.fetch_latency_buckets, reset);

        MetricsSummary {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            cycles_discarded: self.cycles_discarded.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            rows_fetched: self.rows_fetched.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            fetches,
            fetch_latency_sum_ms: latency_sum,
            avg_fetch_latency_ms: if fetches > 0 { latency_sum / fetches } else { 0 },
            max_fetch_latency_ms: latency_max,
            fetch_latency_p95_ms: percentile_from_buckets(&latency_buckets, 0.95),
            fetch_latency_buckets: latency_buckets,
            fleet_size: self.fleet_size.load(Ordering::Relaxed),
            status_vor: self.status_vor.load(Ordering::Relaxed),
            status_on_route: self.status_on_route.load(Ordering::Relaxed),
            status_yard: self.status_yard.load(Ordering::Relaxed),
            status_running_defect: self.status_running_defect.load(Ordering::Relaxed),
            connection_state: self.connection_state.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles_failed: u64,
    pub cycles_discarded: u64,
    pub cycles_skipped: u64,
    pub rows_fetched: u64,
    pub rows_dropped: u64,
    /// Fetches since the previous report
    pub fetches: u64,
    pub fetch_latency_sum_ms: u64,
    pub avg_fetch_latency_ms: u64,
    pub max_fetch_latency_ms: u64,
    pub fetch_latency_p95_ms: u64,
    /// Bounds: ≤50, ≤100, ... ≤25600, >25600 ms
    pub fetch_latency_buckets: [u64; NUM_BUCKETS],
    pub fleet_size: u64,
    pub status_vor: u64,
    pub status_on_route: u64,
    pub status_yard: u64,
    pub status_running_defect: u64,
    pub connection_state: u64,
}

impl MetricsSummary {
    /// Log the summary as a single structured line
    pub fn log(&self) {
        info!(
            cycles_total = %self.cycles_total,
            cycles_failed = %self.cycles_failed,
            cycles_discarded = %self.cycles_discarded,
            cycles_skipped = %self.cycles_skipped,
            rows_fetched = %self.rows_fetched,
            rows_dropped = %self.rows_dropped,
            avg_fetch_ms = %self.avg_fetch_latency_ms,
            max_fetch_ms = %self.max_fetch_latency_ms,
            p95_fetch_ms = %self.fetch_latency_p95_ms,
            fleet = %self.fleet_size,
            vor = %self.status_vor,
            on_route = %self.status_on_route,
            yard = %self.status_yard,
            running_defect = %self.status_running_defect,
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
        assert_eq!(metrics.cycles_total(), 0);
        assert_eq!(metrics.connection_state(), CONNECTION_IDLE);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(51), 1);
        assert_eq!(bucket_index(25600), 9);
        assert_eq!(bucket_index(90_000), 10);
    }

    #[test]
    fn test_report_resets_latency_only() {
        let metrics = Metrics::new();
        metrics.record_fetch_latency(30);
        metrics.record_fetch_latency(300);
        metrics.record_cycle_applied(10, 2);
        metrics.record_cycle_failed();

        let summary = metrics.report();
        assert_eq!(summary.fetches, 2);
        assert_eq!(summary.fetch_latency_sum_ms, 330);
        assert_eq!(summary.avg_fetch_latency_ms, 165);
        assert_eq!(summary.max_fetch_latency_ms, 300);
        assert_eq!(summary.rows_fetched, 10);
        assert_eq!(summary.rows_dropped, 2);
        assert_eq!(summary.cycles_failed, 1);

        let summary = metrics.report();
        assert_eq!(summary.fetches, 0);
        assert_eq!(summary.max_fetch_latency_ms, 0);
        assert_eq!(summary.cycles_total, 1);
    }

    #[test]
    fn test_peek_keeps_periodic_values() {
        let metrics = Metrics::new();
        metrics.record_fetch_latency(120);
        assert_eq!(metrics.peek().fetches, 1);
        assert_eq!(metrics.peek().max_fetch_latency_ms, 120);
        assert_eq!(metrics.report().fetches, 1);
        assert_eq!(metrics.peek().fetches, 0);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; NUM_BUCKETS];
        buckets[0] = 90;
        buckets[4] = 10;
        assert_eq!(percentile_from_buckets(&buckets, 0.50), 50);
        assert_eq!(percentile_from_buckets(&buckets, 0.95), 800);
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], 0.95), 0);
    }

    #[test]
    fn test_set_fleet_gauges() {
        let metrics = Metrics::new();
        let counts = StatusCounts { vor: 1, on_route: 2, yard: 3, running_defect: 4 };
        metrics.set_fleet(10, &counts);
        let summary = metrics.report();
        assert_eq!(summary.fleet_size, 10);
        assert_eq!(summary.status_running_defect, 4);
    }
}
