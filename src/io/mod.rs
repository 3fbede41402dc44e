//! Request queueing and dispatch for the simulated disk
//!
//! - `scheduler`: request values, the bounded queue and the dispatch loop
//! - `error`: error taxonomy shared with the device layer

pub mod error;
pub mod scheduler;

pub use error::{IoError, IoResult};
pub use scheduler::{
    BackpressureLevel, BackpressurePolicy, Completion, CompletionCallback, IoMetrics,
    IoMetricsSnapshot, Listener, ListenerId, OpKind, Request, RequestId, RequestQueue, Scheduler,
    SchedulerConfig, SeekPolicy,
};
