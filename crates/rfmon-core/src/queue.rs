//! Bounded inter-stage queue with drop-oldest overflow
//!
//! The pipeline favors freshness over completeness: detecting a threat
//! late from a stale block is worse than missing one frame. When a stage
//! falls behind, the queue discards its oldest entry instead of ever
//! blocking the producer, and counts the drop. All reads time out so a
//! stalled upstream stage cannot wedge a consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

/// Outcome of a timed pop.
#[derive(Debug, PartialEq)]
pub enum PopResult<T> {
    Item(T),
    /// Nothing arrived within the timeout; caller should re-check its
    /// shutdown flag and try again.
    TimedOut,
    /// Queue closed and drained; the upstream stage is done.
    Closed,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    dropped: u64,
    closed: bool,
}

/// Bounded multi-producer queue that drops its oldest entry on overflow.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be nonzero");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                dropped: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue an item, discarding the oldest entry if full. Never blocks.
    /// Items pushed after `close` are silently discarded.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        if inner.items.len() == self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
            trace!(dropped = inner.dropped, "queue overflow, dropped oldest");
        }
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
    }

    /// Dequeue with a timeout. The deadline is fixed at entry, so repeated
    /// wakeups cannot extend the wait past one timeout.
    pub fn pop_timeout(&self, timeout: Duration) -> PopResult<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return PopResult::Item(item);
            }
            if inner.closed {
                return PopResult::Closed;
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) if d > Duration::ZERO => d,
                _ => return PopResult::TimedOut,
            };
            let (guard, _) = self.available.wait_timeout(inner, remaining).unwrap();
            inner = guard;
        }
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> PopResult<T> {
        let mut inner = self.inner.lock().unwrap();
        match inner.items.pop_front() {
            Some(item) => PopResult::Item(item),
            None if inner.closed => PopResult::Closed,
            None => PopResult::TimedOut,
        }
    }

    /// Mark the queue closed. Pending items remain poppable; waiters wake.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.available.notify_all();
    }

    /// Total entries discarded due to overflow.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
