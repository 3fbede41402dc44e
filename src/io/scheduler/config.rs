//! Scheduler configuration

use std::time::Duration;

use super::backpressure::BackpressurePolicy;
use super::OpKind;

/// Default maximum number of pending requests
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default inclusive upper bound (in sectors) for the read path
pub const DEFAULT_READ_THRESHOLD: usize = 10;

/// Default inclusive lower bound (in sectors) for the write path
pub const DEFAULT_WRITE_THRESHOLD: usize = 100;

/// Default simulated service time for reads and writes
pub const DEFAULT_SERVICE_LATENCY_MS: u64 = 100;

/// Default simulated service time for a seek pass
pub const DEFAULT_SEEK_LATENCY_MS: u64 = 20;

/// Default bounded wait of the dispatch loop on an empty queue
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// What the dispatch loop does with a request classified as a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekPolicy {
    /// Put the request back at the tail every time. Thresholds never change,
    /// so a seek-sized request never completes.
    #[default]
    Requeue,
    /// Requeue until the request has made this many seek passes, then
    /// complete it on the seek path.
    CompleteAfter(u32),
}

/// Configuration for the scheduler
///
/// Everything is fixed at construction; there is no runtime reconfiguration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Extents at or below this are serviced as reads
    pub read_threshold: usize,

    /// Extents at or above this are serviced as writes
    pub write_threshold: usize,

    /// Simulated device time for a read or write
    pub service_latency: Duration,

    /// Simulated device time for a seek pass
    pub seek_latency: Duration,

    /// Maximum number of queued requests
    pub queue_capacity: usize,

    /// Behaviour of `schedule` when the queue is full
    pub backpressure: BackpressurePolicy,

    /// How long the dispatch loop waits for work before re-checking `stop()`
    pub poll_interval: Duration,

    /// Seek handling
    pub seek_policy: SeekPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            read_threshold: DEFAULT_READ_THRESHOLD,
            write_threshold: DEFAULT_WRITE_THRESHOLD,
            service_latency: Duration::from_millis(DEFAULT_SERVICE_LATENCY_MS),
            seek_latency: Duration::from_millis(DEFAULT_SEEK_LATENCY_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: BackpressurePolicy::Block,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            seek_policy: SeekPolicy::Requeue,
        }
    }
}

impl SchedulerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Service path for a request of this extent.
    ///
    /// The read bound is checked first, so overlapping thresholds favour reads.
    pub fn classify(&self, extent: usize) -> OpKind {
        if extent <= self.read_threshold {
            OpKind::Read
        } else if extent >= self.write_threshold {
            OpKind::Write
        } else {
            OpKind::Seek
        }
    }

    /// Set both classification thresholds
    pub fn with_thresholds(mut self, read: usize, write: usize) -> Self {
        self.read_threshold = read;
        self.write_threshold = write;
        self
    }

    /// Set the read/write service latency
    pub fn with_service_latency(mut self, latency: Duration) -> Self {
        self.service_latency = latency;
        self
    }

    /// Set the seek pass latency
    pub fn with_seek_latency(mut self, latency: Duration) -> Self {
        self.seek_latency = latency;
        self
    }

    /// Set the queue capacity (at least 1)
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the full-queue policy
    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    /// Set the idle poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the seek policy
    pub fn with_seek_policy(mut self, policy: SeekPolicy) -> Self {
        self.seek_policy = policy;
        self
    }
}
