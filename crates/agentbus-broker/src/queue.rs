use crate::telemetry::{TelemetrySink, TracingTelemetry};
use agentbus_core::{BusError, BusResult, Message, Priority};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

struct Entry {
    priority: Priority,
    seq: u64,
    message: Message,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap pops the greatest entry: most urgent priority, then lowest sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

/// Capacity-limited queue ordered by priority, then arrival (FIFO).
///
/// `enqueue` never waits: a full queue is reported as
/// [`BusError::QueueFull`], which is the broker's backpressure signal.
/// `dequeue` suspends until a message arrives or the queue is closed.
pub struct BoundedPriorityQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    telemetry: Arc<dyn TelemetrySink>,
}

impl BoundedPriorityQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_telemetry(capacity, Arc::new(TracingTelemetry))
    }

    pub fn with_telemetry(capacity: usize, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            telemetry,
        }
    }

    /// Add a message. Fails with `QueueFull` at capacity and `Shutdown` once closed.
    pub fn enqueue(&self, message: Message) -> BusResult<()> {
        let depth = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(BusError::Shutdown);
            }
            if inner.heap.len() >= self.capacity {
                return Err(BusError::QueueFull {
                    capacity: self.capacity,
                });
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry {
                priority: message.priority,
                seq,
                message,
            });
            inner.heap.len()
        };
        self.telemetry.queue_depth(depth);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the most urgent message. Returns `None` once the queue is closed.
    ///
    /// Cancel-safe: dropping the future never loses a message.
    pub async fn dequeue(&self) -> Option<Message> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue in between still wakes us.
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                if let Some(entry) = inner.heap.pop() {
                    let depth = inner.heap.len();
                    drop(inner);
                    self.telemetry.queue_depth(depth);
                    if depth > 0 {
                        self.notify.notify_one();
                    }
                    return Some(entry.message);
                }
            }

            notified.await;
        }
    }

    /// Pop the most urgent message without waiting.
    pub fn try_dequeue(&self) -> Option<Message> {
        let (entry, depth) = {
            let mut inner = self.inner.lock();
            let entry = inner.heap.pop()?;
            (entry, inner.heap.len())
        };
        self.telemetry.queue_depth(depth);
        Some(entry.message)
    }

    /// Take a still-pending message out of the queue. `None` if a worker
    /// already dequeued it or it was never queued.
    pub fn remove(&self, id: Uuid) -> Option<Message> {
        let (message, depth) = {
            let mut inner = self.inner.lock();
            let mut entries = std::mem::take(&mut inner.heap).into_vec();
            let removed = entries
                .iter()
                .position(|e| e.message.id == id)
                .map(|pos| entries.swap_remove(pos).message);
            inner.heap = BinaryHeap::from(entries);
            (removed?, inner.heap.len())
        };
        self.telemetry.queue_depth(depth);
        Some(message)
    }

    /// Stop accepting messages and wake every waiting `dequeue`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Remove and return every pending message in dequeue order.
    pub fn drain(&self) -> Vec<Message> {
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.heap.len());
        while let Some(entry) = inner.heap.pop() {
            out.push(entry.message);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
