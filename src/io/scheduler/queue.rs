//! Bounded FIFO of pending requests
//!
//! The structural lock guards only the `VecDeque` and is held for the
//! instant of an insert or remove. Waiting for space or for work happens on
//! separate condition variables, and `Condvar::wait` releases the lock, so a
//! producer blocked on a full queue never stops the consumer from draining it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::backpressure::{BackpressureLevel, BackpressurePolicy};
use super::Request;
use crate::io::error::{IoError, IoResult};

/// Thread-safe bounded request queue
pub struct RequestQueue {
    /// Pending requests, oldest first
    items: Mutex<VecDeque<Request>>,
    /// Signalled when a request is added
    not_empty: Condvar,
    /// Signalled when a slot frees up
    not_full: Condvar,
    /// Maximum number of pending requests
    capacity: usize,
    /// Full-queue behaviour of `enqueue`
    policy: BackpressurePolicy,
}

impl RequestQueue {
    /// Create a queue that blocks producers when full
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, BackpressurePolicy::Block)
    }

    /// Create a queue with an explicit full-queue policy
    pub fn with_policy(capacity: usize, policy: BackpressurePolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Add a request at the tail, applying the queue's backpressure policy
    pub fn enqueue(&self, request: Request) -> IoResult<()> {
        let mut items = self.items.lock();

        match self.policy {
            BackpressurePolicy::Block => {
                while items.len() >= self.capacity {
                    self.not_full.wait(&mut items);
                }
            }
            BackpressurePolicy::Reject => {
                if items.len() >= self.capacity {
                    return Err(self.full());
                }
            }
            BackpressurePolicy::BlockFor(timeout) => {
                let deadline = Instant::now() + timeout;
                while items.len() >= self.capacity {
                    if self.not_full.wait_until(&mut items, deadline).timed_out()
                        && items.len() >= self.capacity
                    {
                        return Err(self.full());
                    }
                }
            }
        }

        items.push_back(request);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Add a request without waiting.
    ///
    /// Hands the request back when the queue is full so the caller can retry.
    pub fn try_enqueue(&self, request: Request) -> Result<(), Request> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(request);
        }
        items.push_back(request);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest request, waiting as long as it takes
    pub fn dequeue(&self) -> Request {
        let mut items = self.items.lock();
        loop {
            if let Some(request) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return request;
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Remove the oldest request, waiting at most `timeout`
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Request> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(request) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return Some(request);
            }
            if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                let request = items.pop_front();
                drop(items);
                if request.is_some() {
                    self.not_full.notify_one();
                }
                return request;
            }
        }
    }

    /// Remove the oldest request if there is one
    pub fn try_dequeue(&self) -> Option<Request> {
        let request = self.items.lock().pop_front();
        if request.is_some() {
            self.not_full.notify_one();
        }
        request
    }

    /// Put a request the consumer already holds back at the tail.
    ///
    /// Never waits. If producers filled the queue while the request was out,
    /// the head is popped to make room and returned so the consumer services
    /// it next; the queue length is unchanged in that case.
    pub fn requeue(&self, request: Request) -> Option<Request> {
        let mut items = self.items.lock();
        if items.len() < self.capacity {
            items.push_back(request);
            drop(items);
            self.not_empty.notify_one();
            return None;
        }
        let head = items.pop_front();
        items.push_back(request);
        head
    }

    /// Whether the queue is empty; stale as soon as it returns
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Current depth; stale as soon as it returns
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Load level for the current depth
    pub fn backpressure_level(&self) -> BackpressureLevel {
        BackpressureLevel::from_depth(self.len(), self.capacity)
    }

    fn full(&self) -> IoError {
        IoError::QueueFull {
            capacity: self.capacity,
        }
    }
}
