//! Thread-safe priority queue feeding the delivery worker.
//!
//! Ordering: higher priority first, FIFO by enqueue sequence within a
//! priority level. Producers push synchronously from any thread; the single
//! worker awaits `pop`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use tokio::sync::Notify;

use posco_common::error::{AppError, Result};
use posco_common::types::Priority;

use crate::message::Message;

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
    // BinaryHeap is a max-heap: greater priority wins, then the smaller sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

pub struct PriorityQueue {
    inner: Mutex<Inner>,
    capacity: Option<usize>,
    ready: Notify,
}

impl PriorityQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
            ready: Notify::new(),
        }
    }

    pub fn push(&self, message: Message) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(AppError::ShutDown);
            }
            if let Some(cap) = self.capacity
                && inner.heap.len() >= cap
            {
                return Err(AppError::QueueFull(inner.heap.len()));
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry {
                priority: message.priority(),
                seq,
                message,
            });
        }
        self.ready.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<Message> {
        self.lock().heap.pop().map(|e| e.message)
    }

    /// Wait until a message is available and take it.
    pub async fn pop(&self) -> Message {
        loop {
            let notified = self.ready.notified();
            if let Some(message) = self.try_pop() {
                return message;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject all further pushes, then drop what is pending. Returns the
    /// number dropped. The check in `push` shares this lock, so nothing
    /// lands after the close.
    pub fn close(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        let dropped = inner.heap.len();
        inner.heap.clear();
        dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
