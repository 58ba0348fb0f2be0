//! Concrete blocking and close scenarios.
//!
//! Blocking is observed with `recv_timeout`: a call that should block must
//! not report within `BLOCKED`, and a call that should wake must report
//! within `WAKE`. A regression fails the test instead of hanging it.

#![cfg(not(loom))]

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bbq::{BlockingBoundedQueue, ParkingSemaphore, PutError, RawSemaphore, TakeError};

const BLOCKED: Duration = Duration::from_millis(100);
const WAKE: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAKE;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_capacity_two_walkthrough() {
    init_tracing();
    let queue: Arc<BlockingBoundedQueue<char>> = Arc::new(BlockingBoundedQueue::new(2).unwrap());

    assert_eq!(queue.put('A'), Ok(()));
    assert_eq!(queue.put('B'), Ok(()));

    let (put_tx, put_rx) = mpsc::channel();
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || put_tx.send(queue.put('C')).unwrap())
    };
    assert!(put_rx.recv_timeout(BLOCKED).is_err(), "put(C) did not block");

    assert_eq!(queue.take(), Ok('A'));
    assert_eq!(put_rx.recv_timeout(WAKE).unwrap(), Ok(()));
    producer.join().unwrap();

    assert_eq!(queue.take(), Ok('B'));
    assert_eq!(queue.take(), Ok('C'));

    let (take_tx, take_rx) = mpsc::channel();
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || take_tx.send(queue.take()).unwrap())
    };
    assert!(take_rx.recv_timeout(BLOCKED).is_err(), "take on empty queue did not block");

    wait_until("consumer registration", || queue.waiting_consumers() == 1);
    let summary = queue.close().unwrap();
    assert_eq!(summary.woken_consumers, 1);
    assert_eq!(take_rx.recv_timeout(WAKE).unwrap(), Err(TakeError));
    consumer.join().unwrap();
}

fn close_wakes_blocked_producers<S: RawSemaphore + 'static>() {
    init_tracing();
    let queue: Arc<BlockingBoundedQueue<u32, S>> = Arc::new(BlockingBoundedQueue::new(1).unwrap());
    queue.put(0).unwrap();

    let (tx, rx) = mpsc::channel();
    let producers: Vec<_> = (1..=5)
        .map(|i| {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            thread::spawn(move || tx.send(queue.put(i)).unwrap())
        })
        .collect();
    drop(tx);

    wait_until("5 blocked producers", || queue.waiting_producers() == 5);
    assert!(rx.recv_timeout(BLOCKED).is_err(), "a producer returned on a full queue");

    let summary = queue.close().unwrap();
    assert_eq!(summary.woken_producers, 5);

    // close returned, so every sampled producer has already left put.
    let mut rejected: Vec<u32> = rx
        .iter()
        .map(|result| result.map_err(PutError::into_inner).unwrap_err())
        .collect();
    rejected.sort_unstable();
    assert_eq!(rejected, vec![1, 2, 3, 4, 5]);
    for producer in producers {
        producer.join().unwrap();
    }

    // Nothing was enqueued past the original item.
    let mut leftovers = Vec::new();
    let queue = Arc::try_unwrap(queue).unwrap();
    assert_eq!(queue.destroy(|item| leftovers.push(item)), 1);
    assert_eq!(leftovers, vec![0]);
}

#[test]
fn test_close_wakes_all_blocked_producers() {
    close_wakes_blocked_producers::<bbq::StdSemaphore>();
}

#[test]
fn test_close_wakes_all_blocked_producers_parking() {
    close_wakes_blocked_producers::<ParkingSemaphore>();
}

#[test]
fn test_take_blocks_until_put() {
    init_tracing();
    let queue: Arc<BlockingBoundedQueue<u64>> = Arc::new(BlockingBoundedQueue::new(3).unwrap());

    let (tx, rx) = mpsc::channel();
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || tx.send(queue.take()).unwrap())
    };
    assert!(rx.recv_timeout(BLOCKED).is_err(), "take on empty queue returned");

    queue.put(42).unwrap();
    assert_eq!(rx.recv_timeout(WAKE).unwrap(), Ok(42));
    consumer.join().unwrap();
}

#[test]
fn test_put_blocks_while_full() {
    init_tracing();
    let capacity = 3;
    let queue: Arc<BlockingBoundedQueue<usize>> =
        Arc::new(BlockingBoundedQueue::new(capacity).unwrap());
    for i in 0..capacity {
        queue.put(i).unwrap();
    }

    let (tx, rx) = mpsc::channel();
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || tx.send(queue.put(capacity)).unwrap())
    };
    assert!(rx.recv_timeout(BLOCKED).is_err(), "put on full queue returned");
    assert_eq!(queue.size(), capacity);

    assert_eq!(queue.take(), Ok(0));
    assert_eq!(rx.recv_timeout(WAKE).unwrap(), Ok(()));
    producer.join().unwrap();

    let drained: Vec<usize> = (0..capacity).map(|_| queue.take().unwrap()).collect();
    assert_eq!(drained, vec![1, 2, 3]);
}

#[test]
fn test_admitted_items_survive_close() {
    init_tracing();
    let queue: BlockingBoundedQueue<String> = BlockingBoundedQueue::new(4).unwrap();
    for word in ["alpha", "beta", "gamma"] {
        queue.put(word.to_string()).unwrap();
    }
    assert_eq!(queue.take().unwrap(), "alpha");

    let mut reclaimed = Vec::new();
    let summary = queue.close_with(|item| reclaimed.push(item)).unwrap();
    assert_eq!(summary.reclaimed, 2);
    assert_eq!(reclaimed, vec!["beta", "gamma"]);
    assert_eq!(queue.take(), Err(TakeError));
}

#[test]
fn test_close_wakes_both_sides() {
    init_tracing();
    // Two queues: one full with blocked producers, one empty with
    // blocked consumers, each closed while the waiters are parked.
    let full: Arc<BlockingBoundedQueue<u8>> = Arc::new(BlockingBoundedQueue::new(1).unwrap());
    full.put(0).unwrap();
    let empty: Arc<BlockingBoundedQueue<u8>> = Arc::new(BlockingBoundedQueue::new(1).unwrap());

    let mut handles = Vec::new();
    for i in 1..=3 {
        let full = Arc::clone(&full);
        handles.push(thread::spawn(move || assert!(full.put(i).is_err())));
        let empty = Arc::clone(&empty);
        handles.push(thread::spawn(move || assert_eq!(empty.take(), Err(TakeError))));
    }

    wait_until("blocked producers", || full.waiting_producers() == 3);
    wait_until("blocked consumers", || empty.waiting_consumers() == 3);

    assert_eq!(full.close().unwrap().woken_producers, 3);
    assert_eq!(empty.close().unwrap().woken_consumers, 3);
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(full.size(), 1);
    assert!(empty.is_empty());
}
