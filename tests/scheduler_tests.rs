//! Integration tests for the scheduler and block device

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use disksim::io::{BackpressurePolicy, IoError, OpKind, Request, RequestId, RequestQueue};
use disksim::{BlockDevice, DeviceConfig, Scheduler, SchedulerConfig};

fn fast_config() -> SchedulerConfig {
    SchedulerConfig::new()
        .with_thresholds(10, 100)
        .with_service_latency(Duration::from_millis(1))
        .with_seek_latency(Duration::from_millis(1))
        .with_poll_interval(Duration::from_millis(5))
}

fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn attached_device(config: SchedulerConfig) -> (Arc<BlockDevice>, Arc<Scheduler>) {
    let device = Arc::new(BlockDevice::new(
        DeviceConfig::new(1).with_total_sectors(100),
    ));
    let scheduler = Arc::new(Scheduler::new("integration", config));
    device.set_scheduler(Arc::clone(&scheduler)).unwrap();
    (device, scheduler)
}

/// Records `(request id, path)` for every completion
fn record_completions(scheduler: &Scheduler) -> Arc<Mutex<Vec<(RequestId, OpKind)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let thresholds = scheduler.config().clone();
    scheduler.add_listener(move |req| s.lock().push((req.id(), thresholds.classify(req.extent()))));
    seen
}

// ============ Classification ============

#[test]
fn test_small_requests_complete_once_on_read_path() {
    let (device, scheduler) = attached_device(fast_config());
    let seen = record_completions(&scheduler);

    let callbacks = Arc::new(AtomicUsize::new(0));
    let mut ids = Vec::new();
    for extent in [0, 1, 10] {
        let c = Arc::clone(&callbacks);
        ids.push(
            device
                .read(0, extent, Some(Box::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                })))
                .unwrap(),
        );
    }
    scheduler.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || seen.lock().len() == 3));
    thread::sleep(Duration::from_millis(20));
    scheduler.stop();

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert_eq!(callbacks.load(Ordering::SeqCst), 3);
    for ((id, kind), expected) in seen.iter().zip(&ids) {
        assert_eq!(id, expected);
        assert_eq!(*kind, OpKind::Read);
    }
}

#[test]
fn test_large_requests_complete_once_on_write_path() {
    let (device, scheduler) = attached_device(fast_config());
    let seen = record_completions(&scheduler);

    let first = device.write(1, vec![b'a'; 100], None).unwrap();
    let second = device.write(2, vec![b'b'; 250], None).unwrap();
    scheduler.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || seen.lock().len() == 2));
    scheduler.stop();

    assert_eq!(
        *seen.lock(),
        vec![(first, OpKind::Write), (second, OpKind::Write)]
    );
    assert_eq!(scheduler.metrics().snapshot().writes_completed, 2);
}

#[test]
fn test_mixed_requests_keep_fifo_order() {
    let (device, scheduler) = attached_device(fast_config());
    let seen = record_completions(&scheduler);

    let a = device.read(0, 1, None).unwrap();
    let b = device.write(1, vec![0u8; 128], None).unwrap();
    let c = device.read(2, 4, None).unwrap();
    let d = device.write(3, vec![0u8; 100], None).unwrap();
    scheduler.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || seen.lock().len() == 4));
    scheduler.stop();

    let order: Vec<_> = seen.lock().iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![a, b, c, d]);
}

#[test]
fn test_seek_request_never_completes() {
    let (device, scheduler) = attached_device(fast_config());
    let seen = record_completions(&scheduler);

    let callback_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&callback_ran);
    device
        .read(0, 50, Some(Box::new(move |_| flag.store(true, Ordering::SeqCst))))
        .unwrap();
    scheduler.start().unwrap();

    // Bounded number of loop iterations
    let metrics = scheduler.metrics();
    assert!(wait_for(Duration::from_secs(2), || {
        metrics.seek_requeues.load(Ordering::Relaxed) >= 25
    }));
    scheduler.stop();

    assert!(seen.lock().is_empty());
    assert!(!callback_ran.load(Ordering::SeqCst));
    // Still pending, either queued or held by the stopped loop
    assert!(scheduler.queue_len() <= 1);
}

// ============ Backpressure ============

#[test]
fn test_capacity_two_third_enqueue_blocks_until_dequeue() {
    let queue = Arc::new(RequestQueue::new(2));
    queue.enqueue(Request::new(1, 0, 5)).unwrap();
    queue.enqueue(Request::new(1, 0, 5)).unwrap();

    let finished = Arc::new(AtomicBool::new(false));
    let producer = {
        let queue = Arc::clone(&queue);
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            queue.enqueue(Request::new(1, 0, 5)).unwrap();
            finished.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!finished.load(Ordering::SeqCst));

    let _ = queue.dequeue();
    producer.join().unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_capacity_two_third_enqueue_fails_when_rejecting() {
    let config = fast_config()
        .with_queue_capacity(2)
        .with_backpressure(BackpressurePolicy::Reject);
    let (device, scheduler) = attached_device(config);

    device.read(0, 5, None).unwrap();
    device.read(1, 5, None).unwrap();
    assert!(matches!(
        device.read(2, 5, None),
        Err(IoError::QueueFull { capacity: 2 })
    ));

    scheduler.start().unwrap();
    assert!(wait_for(Duration::from_secs(2), || scheduler.queue_len() < 2));
    device.read(2, 5, None).unwrap();
    scheduler.stop();
}

#[test]
fn test_blocked_producers_do_not_deadlock_dispatch() {
    let config = fast_config()
        .with_queue_capacity(2)
        .with_service_latency(Duration::ZERO);
    let (device, scheduler) = attached_device(config);
    let completed = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&completed);
    scheduler.add_listener(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    scheduler.start().unwrap();

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                for i in 0..20u64 {
                    device.write((p * 20 + i) % 100, vec![1u8; 100], None).unwrap();
                    device.read(i, 1, None).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(wait_for(Duration::from_secs(5), || {
        completed.load(Ordering::SeqCst) == 160
    }));
    scheduler.stop();
}

#[test]
fn test_seeks_in_full_queue_do_not_stall_dispatch() {
    let config = fast_config()
        .with_queue_capacity(2)
        .with_service_latency(Duration::ZERO)
        .with_seek_latency(Duration::ZERO);
    let (device, scheduler) = attached_device(config);
    let completed = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&completed);
    scheduler.add_listener(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    device.read(0, 50, None).unwrap();
    scheduler.start().unwrap();

    let producer = {
        let device = Arc::clone(&device);
        thread::spawn(move || {
            for i in 0..30 {
                device.read(i, 1, None).unwrap();
            }
        })
    };
    producer.join().unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        completed.load(Ordering::SeqCst) == 30
    }));
    scheduler.stop();
}

#[test]
fn test_device_submit_from_callback_into_full_queue() {
    let config = fast_config()
        .with_queue_capacity(1)
        .with_service_latency(Duration::from_millis(50));
    let (device, scheduler) = attached_device(config);
    let completed = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&completed);
    scheduler.add_listener(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    let weak = Arc::downgrade(&device);
    device
        .read(0, 1, Some(Box::new(move |_| {
            if let Some(device) = weak.upgrade() {
                *slot.lock() = Some(device.write(1, b"late".to_vec(), None));
            }
        })))
        .unwrap();
    scheduler.start().unwrap();
    device.read(2, 1, None).unwrap();

    assert!(wait_for(Duration::from_secs(2), || {
        completed.load(Ordering::SeqCst) == 2
    }));
    scheduler.stop();

    assert!(matches!(
        outcome.lock().take(),
        Some(Err(IoError::QueueFull { capacity: 1 }))
    ));
    assert_eq!(device.read_sector(1), None);
}

// ============ Device ============

#[test]
fn test_write_visible_immediately() {
    let config = fast_config().with_service_latency(Duration::from_millis(200));
    let (device, scheduler) = attached_device(config);
    scheduler.start().unwrap();

    device.write(7, b"payload".to_vec(), None).unwrap();
    assert_eq!(device.read_sector(7), Some(b"payload".to_vec()));
    assert_eq!(scheduler.metrics().snapshot().writes_completed, 0);
    scheduler.stop();
}

#[test]
fn test_write_completion_observes_data() {
    let config = fast_config().with_thresholds(10, 3);
    let (device, scheduler) = attached_device(config);
    let observed = Arc::new(Mutex::new(None));

    let dev = Arc::clone(&device);
    let slot = Arc::clone(&observed);
    device
        .write(9, b"abcd".to_vec(), Some(Box::new(move |req| {
            *slot.lock() = dev.read_sector(req.sector());
        })))
        .unwrap();
    scheduler.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || observed.lock().is_some()));
    scheduler.stop();
    assert_eq!(*observed.lock(), Some(b"abcd".to_vec()));
}

#[test]
fn test_seek_sector_boundaries() {
    let device = BlockDevice::new(DeviceConfig::new(1).with_total_sectors(100));
    assert!(matches!(
        device.seek_sector(-1),
        Err(IoError::InvalidSector { .. })
    ));
    assert!(matches!(
        device.seek_sector(100),
        Err(IoError::InvalidSector { .. })
    ));
    assert_eq!(device.seek_sector(0).unwrap(), 0);
    assert_eq!(device.seek_sector(99).unwrap(), 99);
}

// ============ Listeners ============

#[test]
fn test_failing_listener_does_not_block_others() {
    let (device, scheduler) = attached_device(fast_config());
    scheduler.add_listener(|_| panic!("always fails"));
    let seen = record_completions(&scheduler);

    let id = device.read(0, 1, None).unwrap();
    scheduler.start().unwrap();

    assert!(wait_for(Duration::from_secs(2), || seen.lock().len() == 1));
    scheduler.stop();

    assert_eq!(*seen.lock(), vec![(id, OpKind::Read)]);
    assert_eq!(scheduler.metrics().snapshot().listener_failures, 1);
    assert!(!scheduler.is_running());
}

#[test]
fn test_listeners_notified_in_registration_order() {
    let (device, scheduler) = attached_device(fast_config());
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second", "third"] {
        let o = Arc::clone(&order);
        scheduler.add_listener(move |_| o.lock().push(tag));
    }

    device.read(0, 1, None).unwrap();
    scheduler.start().unwrap();
    assert!(wait_for(Duration::from_secs(2), || order.lock().len() == 3));
    scheduler.stop();

    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
}
