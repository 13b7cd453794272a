// gw-ring: single-producer/single-consumer frame buffer.
//
// A fully lock-free circular slot array with cache-line-padded counters
// needs raw pointers and manual synchronization of the slot storage in safe
// Rust. This keeps the external contract (fixed power-of-two capacity,
// reserve/commit-style full/empty errors, `reset`) but backs it with a
// short-held `Mutex` plus a pair of `Notify` handles so the reader task
// (producer) and the dispatch task (consumer) can each `.await` instead of
// busy-polling. Capacity and full/empty behavior are unchanged; only the
// zero-lock property is traded away, and only one producer / one consumer
// are ever expected to call in.

use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    Full,
    Empty,
}

impl std::fmt::Display for RingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingError::Full => write!(f, "ring buffer full"),
            RingError::Empty => write!(f, "ring buffer empty"),
        }
    }
}

impl std::error::Error for RingError {}

struct Inner<T> {
    slots: Vec<Option<T>>,
    read: u64,
    write: u64,
    mask: u64,
}

/// A fixed-capacity SPSC frame buffer. Capacity is rounded up to the next
/// power of two.
pub struct Ring<T> {
    inner: Mutex<Inner<T>>,
    not_full: Notify,
    not_empty: Notify,
    cap: usize,
}

fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

impl<T> Ring<T> {
    pub fn new(requested_capacity: usize) -> Self {
        let cap = next_power_of_two(requested_capacity);
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, || None);
        Self {
            inner: Mutex::new(Inner {
                slots,
                read: 0,
                write: 0,
                mask: (cap - 1) as u64,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            cap,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("ring mutex poisoned");
        (inner.write - inner.read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset both counters to zero, dropping any buffered values.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("ring mutex poisoned");
        for slot in &mut inner.slots {
            *slot = None;
        }
        inner.read = 0;
        inner.write = 0;
    }

    /// Non-blocking push. Fails with `RingError::Full` when the ring is at
    /// capacity (`write - read == cap`).
    pub fn try_push(&self, value: T) -> Result<(), RingError> {
        let mut inner = self.inner.lock().expect("ring mutex poisoned");
        if inner.write - inner.read >= self.cap as u64 {
            return Err(RingError::Full);
        }
        let idx = (inner.write & inner.mask) as usize;
        inner.slots[idx] = Some(value);
        inner.write += 1;
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking pop. Fails with `RingError::Empty` when `write == read`.
    pub fn try_pop(&self) -> Result<T, RingError> {
        let mut inner = self.inner.lock().expect("ring mutex poisoned");
        if inner.read == inner.write {
            return Err(RingError::Empty);
        }
        let idx = (inner.read & inner.mask) as usize;
        let value = inner.slots[idx].take().expect("slot within [read, write) must be occupied");
        inner.read += 1;
        drop(inner);
        self.not_full.notify_one();
        Ok(value)
    }

    /// Push, waiting for space to free up if the ring is currently full.
    pub async fn push(&self, mut value: T) {
        loop {
            match self.try_push(value) {
                Ok(()) => return,
                Err(RingError::Full) => {
                    value = self.wait_and_retry_push(value).await;
                }
                Err(RingError::Empty) => unreachable!("try_push never returns Empty"),
            }
        }
    }

    async fn wait_and_retry_push(&self, value: T) -> T {
        let notified = self.not_full.notified();
        // Re-check under the lock before awaiting to avoid a missed wakeup
        // if a pop happened between the failed try_push and here.
        if self.len() < self.cap {
            return value;
        }
        notified.await;
        value
    }

    /// Pop, waiting for a value to arrive if the ring is currently empty.
    pub async fn pop(&self) -> T {
        loop {
            match self.try_pop() {
                Ok(value) => return value,
                Err(RingError::Empty) => {
                    let notified = self.not_empty.notified();
                    if !self.is_empty() {
                        continue;
                    }
                    notified.await;
                }
                Err(RingError::Full) => unreachable!("try_pop never returns Full"),
            }
        }
    }
}
