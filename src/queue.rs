//! Bounded packet queue
//!
//! Fixed-capacity FIFO shared between the codec side and the socket side.
//! Producers and consumers either block or get a distinct `Full` / `Empty`
//! signal. `close()` is the only way to wake a blocked caller; afterwards
//! every operation reports `Closed`.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::QueueError;
use crate::protocol::MediaPacket;

/// Whether a queue operation may suspend the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Blocking,
    NonBlocking,
}

/// Rejected push; the item is handed back so nothing is dropped silently
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }

    pub fn kind(&self) -> QueueError {
        match self {
            PushError::Full(_) => QueueError::Full,
            PushError::Closed(_) => QueueError::Closed,
        }
    }
}

impl<T> From<PushError<T>> for QueueError {
    fn from(err: PushError<T>) -> Self {
        err.kind()
    }
}

struct Slots<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Blocking MPMC FIFO with a fixed capacity
pub struct PacketQueue<T> {
    slots: Mutex<Slots<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    /// Mirrors `slots.items.len()`, updated under the lock
    len: AtomicUsize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl<T> PacketQueue<T> {
    /// Create a queue; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(Slots {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            len: AtomicUsize::new(0),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Enqueue an item
    pub fn push(&self, item: T, mode: QueueMode) -> Result<(), PushError<T>> {
        let mut slots = self.slots.lock();

        loop {
            if slots.closed {
                return Err(PushError::Closed(item));
            }
            if slots.items.len() < self.capacity {
                break;
            }
            match mode {
                QueueMode::NonBlocking => {
                    self.overflow_count.fetch_add(1, Ordering::Relaxed);
                    return Err(PushError::Full(item));
                }
                QueueMode::Blocking => self.not_full.wait(&mut slots),
            }
        }

        slots.items.push_back(item);
        self.len.store(slots.items.len(), Ordering::Release);
        drop(slots);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the oldest item
    pub fn pop(&self, mode: QueueMode) -> Result<T, QueueError> {
        let mut slots = self.slots.lock();

        loop {
            if slots.closed {
                return Err(QueueError::Closed);
            }
            if let Some(item) = slots.items.pop_front() {
                self.len.store(slots.items.len(), Ordering::Release);
                drop(slots);
                self.not_full.notify_one();
                return Ok(item);
            }
            match mode {
                QueueMode::NonBlocking => {
                    self.underrun_count.fetch_add(1, Ordering::Relaxed);
                    return Err(QueueError::Empty);
                }
                QueueMode::Blocking => self.not_empty.wait(&mut slots),
            }
        }
    }

    /// Dequeue, waiting at most `timeout` for an item
    ///
    /// Returns `Empty` when the timeout elapses.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.slots.lock();

        loop {
            if slots.closed {
                return Err(QueueError::Closed);
            }
            if let Some(item) = slots.items.pop_front() {
                self.len.store(slots.items.len(), Ordering::Release);
                drop(slots);
                self.not_full.notify_one();
                return Ok(item);
            }
            if self.not_empty.wait_until(&mut slots, deadline).timed_out() && slots.items.is_empty() {
                return Err(if slots.closed {
                    QueueError::Closed
                } else {
                    QueueError::Empty
                });
            }
        }
    }

    pub fn push_blocking(&self, item: T) -> Result<(), PushError<T>> {
        self.push(item, QueueMode::Blocking)
    }

    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        self.push(item, QueueMode::NonBlocking)
    }

    pub fn pop_blocking(&self) -> Result<T, QueueError> {
        self.pop(QueueMode::Blocking)
    }

    pub fn try_pop(&self) -> Result<T, QueueError> {
        self.pop(QueueMode::NonBlocking)
    }

    /// Close the queue and wake every waiter
    ///
    /// Buffered items are discarded. Calling it again has no effect.
    pub fn close(&self) {
        let mut slots = self.slots.lock();
        if slots.closed {
            return;
        }
        slots.closed = true;
        slots.items.clear();
        self.len.store(0, Ordering::Release);
        drop(slots);

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.lock().closed
    }

    /// Current occupancy, read without taking the lock
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill level in `0.0..=1.0`
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }

    /// Non-blocking pushes rejected because the queue was full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Non-blocking pops that found the queue empty
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a packet queue
pub type SharedPacketQueue = Arc<PacketQueue<MediaPacket>>;

/// Create a new shared packet queue
pub fn create_shared_queue(capacity: usize) -> SharedPacketQueue {
    Arc::new(PacketQueue::new(capacity))
}
