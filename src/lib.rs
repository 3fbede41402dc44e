//! disksim - a simulated disk I/O scheduler
//!
//! Features:
//! - Bounded, thread-safe FIFO request queue with explicit backpressure
//! - Single dispatch thread classifying requests as read, write or seek
//! - Completion callbacks plus broadcast to failure-isolated listeners
//! - In-memory block device with submission-time writes

pub mod device;
pub mod io;

pub use device::{BlockDevice, DeviceConfig};
pub use io::{IoError, IoResult, Request, Scheduler, SchedulerConfig};
