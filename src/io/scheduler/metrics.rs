//! Scheduler metrics
//!
//! Counters for each service path, failure counters for the isolation
//! boundary around callbacks and listeners, queue gauges, and time-in-system
//! histograms for completed requests.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use super::backpressure::BackpressureLevel;
use super::OpKind;

/// Number of histogram buckets
const HISTOGRAM_BUCKETS: usize = 8;

/// Upper bucket bounds in microseconds; the last bucket is open-ended
const BUCKET_BOUNDS_US: [u64; HISTOGRAM_BUCKETS] = [
    1_000,
    5_000,
    10_000,
    50_000,
    100_000,
    500_000,
    1_000_000,
    u64::MAX,
];

/// Latency histogram with fixed buckets
///
/// Buckets: <1ms, <5ms, <10ms, <50ms, <100ms, <500ms, <1s, >=1s
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; HISTOGRAM_BUCKETS],
    /// Sum of all latencies in microseconds
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    pub const fn new() -> Self {
        Self {
            buckets: [const { AtomicU64::new(0) }; HISTOGRAM_BUCKETS],
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a latency value
    pub fn record(&self, latency: Duration) {
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let bucket = BUCKET_BOUNDS_US
            .iter()
            .position(|&bound| us < bound)
            .unwrap_or(HISTOGRAM_BUCKETS - 1);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn average(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_us.load(Ordering::Relaxed) / count)
    }

    /// Estimate a percentile from the buckets.
    ///
    /// Returns the upper bound of the bucket containing the percentile; the
    /// open-ended bucket reports one second.
    pub fn percentile(&self, p: f64) -> Duration {
        let total = self.count();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = ((total as f64 * p / 100.0).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (bucket, bound) in self.buckets.iter().zip(BUCKET_BOUNDS_US) {
            cumulative += bucket.load(Ordering::Relaxed);
            if cumulative >= target && bound != u64::MAX {
                return Duration::from_micros(bound);
            }
        }
        Duration::from_secs(1)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }

    /// Bucket counts
    pub fn buckets(&self) -> [u64; HISTOGRAM_BUCKETS] {
        std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed))
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for one scheduler
#[derive(Debug)]
pub struct IoMetrics {
    // Counters
    /// Requests accepted into the queue
    pub requests_submitted: AtomicU64,
    /// Requests refused with `QueueFull`
    pub requests_rejected: AtomicU64,
    /// Requests completed on the read path
    pub reads_completed: AtomicU64,
    /// Requests completed on the write path
    pub writes_completed: AtomicU64,
    /// Requests completed on the seek path (`SeekPolicy::CompleteAfter`)
    pub seeks_completed: AtomicU64,
    /// Seek passes that put a request back in the queue
    pub seek_requeues: AtomicU64,
    /// Completion callbacks that panicked
    pub callback_failures: AtomicU64,
    /// Listener invocations that panicked
    pub listener_failures: AtomicU64,

    // Gauges
    /// Queue depth as of the last submit or dequeue
    pub queue_depth: AtomicU32,
    /// Backpressure level (0-2) as of the last submit or dequeue
    pub backpressure_level: AtomicU8,

    // Time from submission to completion
    pub read_latency: LatencyHistogram,
    pub write_latency: LatencyHistogram,
    pub seek_latency: LatencyHistogram,
}

impl IoMetrics {
    pub const fn new() -> Self {
        Self {
            requests_submitted: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            reads_completed: AtomicU64::new(0),
            writes_completed: AtomicU64::new(0),
            seeks_completed: AtomicU64::new(0),
            seek_requeues: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
            queue_depth: AtomicU32::new(0),
            backpressure_level: AtomicU8::new(0),
            read_latency: LatencyHistogram::new(),
            write_latency: LatencyHistogram::new(),
            seek_latency: LatencyHistogram::new(),
        }
    }

    /// Record a completed request on the given path
    pub fn record_completion(&self, kind: OpKind, latency: Duration) {
        let counter = match kind {
            OpKind::Read => &self.reads_completed,
            OpKind::Write => &self.writes_completed,
            OpKind::Seek => &self.seeks_completed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.latency_for(kind).record(latency);
    }

    /// Update the queue gauges
    pub fn record_depth(&self, depth: usize, capacity: usize) {
        self.queue_depth
            .store(u32::try_from(depth).unwrap_or(u32::MAX), Ordering::Relaxed);
        self.backpressure_level.store(
            BackpressureLevel::from_depth(depth, capacity) as u8,
            Ordering::Relaxed,
        );
    }

    pub fn latency_for(&self, kind: OpKind) -> &LatencyHistogram {
        match kind {
            OpKind::Read => &self.read_latency,
            OpKind::Write => &self.write_latency,
            OpKind::Seek => &self.seek_latency,
        }
    }

    /// Total requests completed on any path
    pub fn completed(&self) -> u64 {
        self.reads_completed.load(Ordering::Relaxed)
            + self.writes_completed.load(Ordering::Relaxed)
            + self.seeks_completed.load(Ordering::Relaxed)
    }

    /// Take a snapshot of current metrics
    pub fn snapshot(&self) -> IoMetricsSnapshot {
        IoMetricsSnapshot {
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            reads_completed: self.reads_completed.load(Ordering::Relaxed),
            writes_completed: self.writes_completed.load(Ordering::Relaxed),
            seeks_completed: self.seeks_completed.load(Ordering::Relaxed),
            seek_requeues: self.seek_requeues.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            backpressure_level: BackpressureLevel::from_u8(
                self.backpressure_level.load(Ordering::Relaxed),
            ),
            read_p99: self.read_latency.p99(),
            write_p99: self.write_latency.p99(),
        }
    }
}

impl Default for IoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of scheduler metrics
#[derive(Debug, Clone)]
pub struct IoMetricsSnapshot {
    pub requests_submitted: u64,
    pub requests_rejected: u64,
    pub reads_completed: u64,
    pub writes_completed: u64,
    pub seeks_completed: u64,
    pub seek_requeues: u64,
    pub callback_failures: u64,
    pub listener_failures: u64,
    pub queue_depth: u32,
    pub backpressure_level: BackpressureLevel,
    pub read_p99: Duration,
    pub write_p99: Duration,
}
