//! Unbounded FIFO of drained values with a blocking pop.

use crate::error::Result;
use crate::sync::{CondQueue, Interrupt, Monitor};
use std::collections::VecDeque;
use std::vec;

/// Values kept as the batches they arrived in, so appending a batch is a
/// single push and never copies the values already queued.
#[derive(Default)]
struct Batches {
    chunks: VecDeque<vec::IntoIter<u32>>,
    len: usize,
}

impl Batches {
    fn append(&mut self, batch: Vec<u32>) {
        if batch.is_empty() {
            return;
        }
        self.len += batch.len();
        self.chunks.push_back(batch.into_iter());
    }

    fn pop_front(&mut self) -> Option<u32> {
        let front = self.chunks.front_mut()?;
        let value = front.next();
        if front.as_slice().is_empty() {
            self.chunks.pop_front();
        }
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    fn clear(&mut self) -> usize {
        let dropped = self.len;
        self.chunks.clear();
        self.len = 0;
        dropped
    }
}

struct QueueState {
    items: Batches,
    readers: CondQueue,
}

pub struct ConsumerQueue {
    monitor: Monitor<QueueState>,
}

impl ConsumerQueue {
    pub fn new() -> Self {
        Self {
            monitor: Monitor::new(QueueState {
                items: Batches::default(),
                readers: CondQueue::new(),
            }),
        }
    }

    /// Appends a whole batch behind everything queued so far and wakes one
    /// blocked reader. Returns the number of values appended.
    pub fn append(&self, batch: Vec<u32>) -> usize {
        let count = batch.len();
        if count == 0 {
            return 0;
        }
        let mut state = self.monitor.lock();
        state.items.append(batch);
        state.readers.signal();
        count
    }

    /// Removes the oldest value, blocking while the queue is empty.
    pub fn pop(&self, interrupt: &Interrupt) -> Result<u32> {
        let mut state = self.monitor.lock();
        loop {
            if let Some(value) = state.items.pop_front() {
                return Ok(value);
            }
            state = self.monitor.wait(state, |s| &mut s.readers, interrupt)?;
        }
    }

    pub fn try_pop(&self) -> Option<u32> {
        self.monitor.lock().items.pop_front()
    }

    /// Drops every queued value. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        self.monitor.lock().items.clear()
    }

    pub fn len(&self) -> usize {
        self.monitor.lock().items.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Readers currently blocked in [`pop`](Self::pop).
    pub fn waiting(&self) -> usize {
        self.monitor.lock().readers.waiting()
    }
}

impl Default for ConsumerQueue {
    fn default() -> Self {
        Self::new()
    }
}
