//! Bounded activation queue.
//!
//! A thread-safe FIFO of update requests with three states: inactive (fresh),
//! active (accepting work) and deactivated (terminal for the current
//! activation). Producers block while the queue is full; consumers block while
//! it is empty; `deactivate` drops pending requests and wakes everyone with a
//! closed error, which is how workers learn to exit.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::UpdaterError;
use crate::request::UpdateRequest;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Inactive,
    Active,
    Deactivated,
}

struct Inner<T> {
    items: VecDeque<UpdateRequest<T>>,
    state: QueueState,
}

pub struct ActivationQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> ActivationQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                state: QueueState::Inactive,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Open the queue for enqueue/dequeue. Leftovers from a previous
    /// activation are discarded.
    pub fn activate(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.state = QueueState::Active;
    }

    /// Terminal for the current activation: drops all pending requests and
    /// wakes every blocked producer and consumer.
    pub fn deactivate(&self) {
        let mut inner = self.inner.lock();
        inner.state = QueueState::Deactivated;
        inner.items.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().state == QueueState::Active
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Append a request, blocking while the queue is full. Fails if the queue
    /// is not active, or becomes deactivated while waiting for space.
    pub fn enqueue(&self, request: UpdateRequest<T>) -> Result<()> {
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                QueueState::Inactive => return Err(UpdaterError::QueueInactive),
                QueueState::Deactivated => return Err(UpdaterError::QueueClosed),
                QueueState::Active => {
                    if inner.items.len() < self.capacity {
                        inner.items.push_back(request);
                        self.not_empty.notify_one();
                        return Ok(());
                    }
                    self.not_full.wait(&mut inner);
                }
            }
        }
    }

    /// Pop the oldest request, blocking while the queue is empty. Returns the
    /// closed sentinel once the queue is deactivated.
    pub fn dequeue(&self) -> Result<UpdateRequest<T>> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(request) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Ok(request);
            }
            if inner.state != QueueState::Active {
                return Err(UpdaterError::QueueClosed);
            }
            self.not_empty.wait(&mut inner);
        }
    }
}
