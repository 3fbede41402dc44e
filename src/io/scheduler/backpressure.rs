//! Backpressure policy and queue load levels
//!
//! The policy decides what a producer experiences when the request queue is
//! full; the level summarises how close the queue is to that point.

use std::time::Duration;

/// Fill ratio (in percent) at which the queue reports heavy pressure
const HEAVY_FILL_PERCENT: usize = 75;

/// What `enqueue` does when the queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Wait until the consumer frees a slot
    #[default]
    Block,
    /// Fail immediately with `QueueFull`
    Reject,
    /// Wait at most this long, then fail with `QueueFull`
    BlockFor(Duration),
}

/// Backpressure level derived from queue depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BackpressureLevel {
    /// Plenty of room
    Normal = 0,
    /// Queue is filling up
    Heavy = 1,
    /// Queue is full; producers block or get rejected
    Saturated = 2,
}

impl BackpressureLevel {
    /// Classify a queue depth against its capacity
    pub fn from_depth(depth: usize, capacity: usize) -> Self {
        if depth >= capacity {
            BackpressureLevel::Saturated
        } else if depth * 100 >= capacity * HEAVY_FILL_PERCENT {
            BackpressureLevel::Heavy
        } else {
            BackpressureLevel::Normal
        }
    }

    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => BackpressureLevel::Normal,
            1 => BackpressureLevel::Heavy,
            _ => BackpressureLevel::Saturated,
        }
    }
}
