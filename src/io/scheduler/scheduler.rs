//! Dispatcher that drains the request queue
//!
//! # Architecture
//!
//! ```text
//! Scheduler ── start() ──> dispatch thread ("<name>-dispatch")
//!     │                          │
//!     └── Arc<Shared> ───────────┤  queue, listeners, metrics
//!                                │
//!              dequeue_timeout ──┴─> classify ─> sleep ─> callback ─> listeners
//!                                                   └──> requeue (seek)
//! ```
//!
//! The thread only holds `Shared`, never the `Scheduler` itself, so dropping
//! the last `Scheduler` handle stops and joins the loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::config::{SchedulerConfig, SeekPolicy};
use super::metrics::IoMetrics;
use super::queue::RequestQueue;
use super::{Listener, ListenerId, OpKind, Request};
use crate::io::error::{panic_reason, IoError, IoResult};

/// A running dispatch thread and its private stop flag
struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// State shared between the scheduler handle and its dispatch thread
struct Shared {
    name: String,
    config: SchedulerConfig,
    queue: RequestQueue,
    /// Registered listeners in registration order
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    /// Request the loop was holding when it stopped; serviced first on restart
    in_hand: Mutex<Option<Request>>,
    /// Thread currently running the dispatch loop
    dispatcher: Mutex<Option<ThreadId>>,
    metrics: IoMetrics,
}

/// Single-consumer request scheduler.
///
/// State machine: `Stopped -> Running -> Stopped`, restartable.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    /// Create a stopped scheduler
    pub fn new(name: impl Into<String>, config: SchedulerConfig) -> Self {
        let queue = RequestQueue::with_policy(config.queue_capacity, config.backpressure);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                queue,
                listeners: RwLock::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                in_hand: Mutex::new(None),
                dispatcher: Mutex::new(None),
                metrics: IoMetrics::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> &IoMetrics {
        &self.shared.metrics
    }

    /// Pending requests; stale as soon as it returns
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Service path for a request of this extent
    pub fn classify(&self, extent: usize) -> OpKind {
        self.shared.config.classify(extent)
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.stop.load(Ordering::Acquire))
    }

    /// Queue a request, applying the configured backpressure policy.
    ///
    /// Accepted whether or not the dispatch loop is running. A callback or
    /// listener running on the dispatch thread never waits: the loop is the
    /// queue's only consumer, so a full queue fails with `QueueFull` there
    /// under every policy.
    pub fn schedule(&self, request: Request) -> IoResult<()> {
        let id = request.id();
        let extent = request.extent();
        let queue = &self.shared.queue;
        let metrics = &self.shared.metrics;

        let queued = if self.shared.on_dispatch_thread() {
            queue
                .try_enqueue(request)
                .map_err(|_| IoError::QueueFull { capacity: queue.capacity() })
        } else {
            queue.enqueue(request)
        };

        match queued {
            Ok(()) => {
                metrics.requests_submitted.fetch_add(1, Ordering::Relaxed);
                metrics.record_depth(queue.len(), queue.capacity());
                trace!(scheduler = %self.shared.name, request = %id, extent, "Request queued");
                Ok(())
            }
            Err(e) => {
                metrics.requests_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(scheduler = %self.shared.name, request = %id, error = %e, "Request refused");
                Err(e)
            }
        }
    }

    /// Spawn the dispatch loop.
    ///
    /// Returns `AlreadyRunning` without spawning anything if a loop is live.
    pub fn start(&self) -> IoResult<()> {
        let mut worker = self.worker.lock();

        if let Some(current) = worker.as_ref() {
            if !current.stop.load(Ordering::Acquire) {
                return Err(self.already_running());
            }
        }
        // A loop stopped from its own thread is still in the slot; wait for it
        // outside the lock since it may be inside a callback
        if let Some(old) = worker.take() {
            if old.handle.thread().id() != thread::current().id() {
                drop(worker);
                let _ = old.handle.join();
                worker = self.worker.lock();
                if worker.is_some() {
                    return Err(self.already_running());
                }
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let loop_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("{}-dispatch", self.shared.name))
            .spawn(move || shared.run(&loop_stop))?;

        *worker = Some(Worker { handle, stop });
        info!(
            scheduler = %self.shared.name,
            read_threshold = self.shared.config.read_threshold,
            write_threshold = self.shared.config.write_threshold,
            "Scheduler started"
        );
        Ok(())
    }

    /// Ask the dispatch loop to exit at its next poll.
    ///
    /// An in-flight simulated operation is allowed to finish. From any thread
    /// other than the dispatch thread this waits for the loop to exit; from a
    /// callback or listener it only signals.
    pub fn stop(&self) {
        let mut slot = self.worker.lock();
        let Some(worker) = slot.as_ref() else {
            return;
        };
        let was_stopped = worker.stop.swap(true, Ordering::AcqRel);
        if worker.handle.thread().id() == thread::current().id() {
            if !was_stopped {
                info!(scheduler = %self.shared.name, "Scheduler stopping from dispatch thread");
            }
            return;
        }

        let Some(worker) = slot.take() else {
            return;
        };
        drop(slot);
        if worker.handle.join().is_err() {
            warn!(scheduler = %self.shared.name, "Dispatch thread panicked");
        }
        if !was_stopped {
            info!(scheduler = %self.shared.name, "Scheduler stopped");
        }
    }

    /// Register a listener for completed requests.
    ///
    /// Listeners run on the dispatch thread after the request's own callback,
    /// in registration order.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        self.shared.listeners.write().push((id, listener));
        id
    }

    /// Unregister a listener. Returns false if the handle is unknown.
    ///
    /// A notification already in progress may still reach it.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }

    fn already_running(&self) -> IoError {
        IoError::AlreadyRunning {
            scheduler: self.shared.name.clone(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    /// Dispatch loop body
    fn run(&self, stop: &AtomicBool) {
        let me = thread::current().id();
        *self.dispatcher.lock() = Some(me);
        debug!(scheduler = %self.name, "Dispatch loop running");
        let mut carried = self.in_hand.lock().take();

        loop {
            if stop.load(Ordering::Acquire) {
                if let Some(request) = carried.take() {
                    *self.in_hand.lock() = Some(request);
                }
                break;
            }

            let request = match carried.take() {
                Some(request) => request,
                None => match self.queue.dequeue_timeout(self.config.poll_interval) {
                    Some(request) => request,
                    None => continue,
                },
            };
            self.metrics.record_depth(self.queue.len(), self.queue.capacity());

            carried = self.dispatch(request);
        }

        let mut dispatcher = self.dispatcher.lock();
        if *dispatcher == Some(me) {
            *dispatcher = None;
        }
        drop(dispatcher);
        debug!(scheduler = %self.name, "Dispatch loop exited");
    }

    fn on_dispatch_thread(&self) -> bool {
        *self.dispatcher.lock() == Some(thread::current().id())
    }

    /// Service one request.
    ///
    /// Returns a request that must be serviced next, when requeueing a seek
    /// into a full queue displaced its head.
    fn dispatch(&self, mut request: Request) -> Option<Request> {
        let kind = self.config.classify(request.extent());

        match kind {
            OpKind::Read | OpKind::Write => {
                thread::sleep(self.config.service_latency);
                self.complete(request, kind);
                None
            }
            OpKind::Seek => {
                thread::sleep(self.config.seek_latency);
                let passes = request.record_seek_pass();
                match self.config.seek_policy {
                    SeekPolicy::CompleteAfter(limit) if passes >= limit => {
                        self.complete(request, kind);
                        None
                    }
                    _ => {
                        self.metrics.seek_requeues.fetch_add(1, Ordering::Relaxed);
                        trace!(
                            scheduler = %self.name,
                            request = %request.id(),
                            passes,
                            "Seek requeued"
                        );
                        self.queue.requeue(request)
                    }
                }
            }
        }
    }

    /// Record, run the completion callback, then notify listeners
    fn complete(&self, mut request: Request, kind: OpKind) {
        debug!(
            scheduler = %self.name,
            request = %request.id(),
            device = request.device_id(),
            sector = request.sector(),
            extent = request.extent(),
            kind = %kind,
            "Request serviced"
        );
        self.metrics.record_completion(kind, request.age());

        if let Some(callback) = request.take_completion() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&request))) {
                let err = IoError::CallbackFailure {
                    request: request.id(),
                    reason: panic_reason(payload.as_ref()),
                };
                self.metrics.callback_failures.fetch_add(1, Ordering::Relaxed);
                warn!(scheduler = %self.name, error = %err, "Completion callback failed");
            }
        }

        self.notify_listeners(&request);
    }

    /// Deliver to a snapshot so listeners can (un)register during delivery
    fn notify_listeners(&self, request: &Request) {
        let listeners = self.listeners.read().clone();

        for (id, listener) in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(request))) {
                let err = IoError::ListenerFailure {
                    listener: id,
                    request: request.id(),
                    reason: panic_reason(payload.as_ref()),
                };
                self.metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
                warn!(scheduler = %self.name, error = %err, "Listener failed");
            }
        }
    }
}
