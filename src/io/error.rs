//! Scheduler and device error types

use thiserror::Error;

use super::scheduler::{ListenerId, RequestId};

/// Errors raised by the request queue, the scheduler and the block device
#[derive(Error, Debug)]
pub enum IoError {
    /// Sector index outside `[0, total)`
    #[error("Invalid sector {sector} (device has {total} sectors)")]
    InvalidSector { sector: i64, total: u64 },

    /// Enqueue attempted against a full queue in non-blocking mode
    #[error("Request queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Read or write issued on a device with no scheduler set
    #[error("Device {device} has no scheduler attached")]
    NoSchedulerAttached { device: u32 },

    /// A scheduler may only be attached to a device once
    #[error("Device {device} already has a scheduler attached")]
    SchedulerAlreadyAttached { device: u32 },

    /// A listener panicked while being notified
    #[error("Listener {listener} failed on request {request}: {reason}")]
    ListenerFailure {
        listener: ListenerId,
        request: RequestId,
        reason: String,
    },

    /// A request's completion callback panicked
    #[error("Completion callback for request {request} failed: {reason}")]
    CallbackFailure { request: RequestId, reason: String },

    /// `start()` called on a running scheduler
    #[error("Scheduler {scheduler} is already running")]
    AlreadyRunning { scheduler: String },

    /// The dispatch thread could not be spawned
    #[error("Failed to spawn dispatch thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for scheduler and device operations
pub type IoResult<T> = Result<T, IoError>;

/// Render a panic payload caught by `catch_unwind` as text
pub(crate) fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
