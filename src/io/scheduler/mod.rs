//! Request scheduling for the simulated disk
//!
//! A single dispatcher drains a bounded FIFO of requests, classifies each one
//! by its extent against two thresholds and services it after a simulated
//! device latency.
//!
//! # Classification
//! - **Read**: `extent <= read_threshold`
//! - **Write**: `extent >= write_threshold`
//! - **Seek**: anything strictly between; the request goes back to the tail
//!   of the queue instead of completing (see [`SeekPolicy`])
//!
//! # Lifecycle
//! ```text
//! BlockDevice::read/write ──> Request ──> RequestQueue ──> dispatch loop
//!                                              ^              │
//!                                              └── seek ──────┤
//!                                                             v
//!                                         completion callback, then listeners
//! ```

pub mod backpressure;
pub mod config;
pub mod metrics;
pub mod queue;
#[allow(clippy::module_inception)]
pub mod scheduler;

pub use backpressure::{BackpressureLevel, BackpressurePolicy};
pub use config::{SchedulerConfig, SeekPolicy, DEFAULT_QUEUE_CAPACITY};
pub use metrics::{IoMetrics, IoMetricsSnapshot, LatencyHistogram};
pub use queue::RequestQueue;
pub use scheduler::Scheduler;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback invoked once when the dispatch loop finishes a request.
///
/// Runs on the dispatch thread.
pub type CompletionCallback = Box<dyn FnOnce(&Request) + Send + 'static>;

/// Listener notified of every completed request, after its own callback.
pub type Listener = Arc<dyn Fn(&Request) + Send + Sync + 'static>;

/// Unique request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Raw counter value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned by [`Scheduler::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service path chosen for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Small request, at or below the read threshold
    Read,
    /// Large request, at or above the write threshold
    Write,
    /// Mid-size request, strictly between the thresholds
    Seek,
}

impl OpKind {
    /// Lowercase label used in logs and console output
    pub const fn as_str(&self) -> &'static str {
        match self {
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::Seek => "seek",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending operation against a device.
///
/// Immutable once built: the only state the dispatch loop advances is its
/// private seek pass counter. Ownership moves from the submitter to the queue
/// and from the queue to the dispatch loop.
pub struct Request {
    id: RequestId,
    device_id: u32,
    sector: u64,
    extent: usize,
    completion: Option<CompletionCallback>,
    submitted_at: Instant,
    seek_passes: u32,
}

impl Request {
    /// Create a request with no completion callback
    pub fn new(device_id: u32, sector: u64, extent: usize) -> Self {
        Self {
            id: next_request_id(),
            device_id,
            sector,
            extent,
            completion: None,
            submitted_at: Instant::now(),
            seek_passes: 0,
        }
    }

    /// Attach a completion callback
    pub fn with_completion<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Request) + Send + 'static,
    {
        self.completion = Some(Box::new(callback));
        self
    }

    /// Attach an optional, already boxed completion callback
    pub fn with_callback(mut self, callback: Option<CompletionCallback>) -> Self {
        self.completion = callback;
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Identifier of the device that issued the request
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Starting sector
    pub fn sector(&self) -> u64 {
        self.sector
    }

    /// Sectors touched; the payload length for writes
    pub fn extent(&self) -> usize {
        self.extent
    }

    /// Whether a completion callback is still pending
    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    /// Times the dispatch loop has classified this request as a seek
    pub fn seek_passes(&self) -> u32 {
        self.seek_passes
    }

    /// Time since submission
    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Take the callback so it can run at most once
    pub(crate) fn take_completion(&mut self) -> Option<CompletionCallback> {
        self.completion.take()
    }

    pub(crate) fn record_seek_pass(&mut self) -> u32 {
        self.seek_passes = self.seek_passes.saturating_add(1);
        self.seek_passes
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("sector", &self.sector)
            .field("extent", &self.extent)
            .field("has_completion", &self.completion.is_some())
            .field("seek_passes", &self.seek_passes)
            .finish()
    }
}

/// Owned summary of a completed request, delivered through completion handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub request_id: RequestId,
    pub device_id: u32,
    pub sector: u64,
    pub extent: usize,
    /// Time from submission to completion
    pub elapsed: Duration,
}

impl Completion {
    pub fn from_request(request: &Request) -> Self {
        Self {
            request_id: request.id(),
            device_id: request.device_id(),
            sector: request.sector(),
            extent: request.extent(),
            elapsed: request.age(),
        }
    }
}

/// Atomic counter for generating unique request IDs
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique request ID
pub fn next_request_id() -> RequestId {
    RequestId(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}
