//! Condition variables built from a mutex, a waiter count and a semaphore.
//!
//! A waiter bumps the count of its [`CondQueue`] while holding the monitor
//! lock, releases the lock, blocks on the queue's semaphore and re-acquires
//! the lock before testing its predicate again. A signaller only posts a
//! token when the count is positive, decrementing it, so every wait is
//! matched by exactly one wake-up and none is lost between the unlock and
//! the block.

use super::semaphore::{lock, Interrupt, Semaphore};
use crate::error::Result;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct CondQueue {
    waiting: usize,
    wakeups: Arc<Semaphore>,
}

impl CondQueue {
    pub fn new() -> Self {
        Self {
            waiting: 0,
            wakeups: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Wakes one waiter, if any. Returns whether somebody was woken.
    pub fn signal(&mut self) -> bool {
        if self.waiting > 0 {
            self.waiting -= 1;
            self.wakeups.up();
            true
        } else {
            false
        }
    }

    /// Wakes every current waiter and returns how many there were.
    pub fn broadcast(&mut self) -> usize {
        let woken = self.waiting;
        while self.signal() {}
        woken
    }

    // A cancelled waiter removes itself. If a signal already counted it
    // out, the token posted for it is absorbed instead.
    fn withdraw(&mut self) {
        if self.waiting > 0 {
            self.waiting -= 1;
        } else {
            self.wakeups.try_down();
        }
    }
}

impl Default for CondQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// State `S` guarded by one exclusion lock, waited on through the
/// [`CondQueue`]s it contains.
pub struct Monitor<S> {
    state: Mutex<S>,
}

impl<S> Monitor<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, S> {
        lock(&self.state)
    }

    /// Blocks on the queue chosen by `queue` until signalled, then returns
    /// the re-acquired guard. Callers re-test their predicate in a loop.
    ///
    /// On [`Error::Cancelled`](crate::Error::Cancelled) the lock is not
    /// held and the queue's waiter count is back to what it was.
    pub fn wait<'a, F>(
        &'a self,
        mut guard: MutexGuard<'a, S>,
        queue: F,
        interrupt: &Interrupt,
    ) -> Result<MutexGuard<'a, S>>
    where
        F: Fn(&mut S) -> &mut CondQueue,
    {
        let wakeups = {
            let cond = queue(&mut *guard);
            cond.waiting += 1;
            Arc::clone(&cond.wakeups)
        };
        drop(guard);

        match wakeups.down_interruptible(interrupt) {
            Ok(()) => Ok(self.lock()),
            Err(err) => {
                let mut guard = self.lock();
                queue(&mut *guard).withdraw();
                Err(err)
            }
        }
    }
}
