//! Counting semaphore whose waits can be interrupted from another thread.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Locks a std mutex, recovering the data if a panicking holder poisoned it.
///
/// Every critical section in this crate leaves its state consistent before
/// any call that could panic, so the inner value is always safe to reuse.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Tokens {
    count: usize,
    /// Tickets of blocked callers, oldest first.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

/// Counting semaphore that hands tokens to blocked callers in arrival
/// order. A caller arriving while others wait queues behind them even if a
/// token is free.
pub struct Semaphore {
    tokens: Mutex<Tokens>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            tokens: Mutex::new(Tokens {
                count: initial,
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Releases one token for the oldest blocked `down`.
    pub fn up(&self) {
        let mut tokens = lock(&self.tokens);
        tokens.count += 1;
        // Only the head of the queue may take it, and notify_one could
        // pick someone else.
        self.available.notify_all();
    }

    /// Takes a token without waiting, ahead of any queued caller.
    pub fn try_down(&self) -> bool {
        let mut tokens = lock(&self.tokens);
        if tokens.count > 0 {
            tokens.count -= 1;
            true
        } else {
            false
        }
    }

    /// Takes one token, blocking until one is available and every earlier
    /// caller has been served.
    ///
    /// Fails with [`Error::Cancelled`] if `interrupt` is raised before a
    /// token reaches this caller. A token that is already available wins
    /// over a pending interrupt.
    pub fn down_interruptible(self: &Arc<Self>, interrupt: &Interrupt) -> Result<()> {
        let _parked = interrupt.park(Arc::clone(self));
        let mut tokens = lock(&self.tokens);
        if tokens.count > 0 && tokens.queue.is_empty() {
            tokens.count -= 1;
            return Ok(());
        }

        let ticket = tokens.next_ticket;
        tokens.next_ticket += 1;
        tokens.queue.push_back(ticket);
        loop {
            if tokens.count > 0 && tokens.queue.front() == Some(&ticket) {
                tokens.count -= 1;
                tokens.queue.pop_front();
                if tokens.count > 0 && !tokens.queue.is_empty() {
                    self.available.notify_all();
                }
                return Ok(());
            }
            if interrupt.take() {
                tokens.queue.retain(|t| *t != ticket);
                // The next caller may now be at the head with a token ready.
                self.available.notify_all();
                return Err(Error::Cancelled);
            }
            tokens = self
                .available
                .wait(tokens)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn tokens(&self) -> usize {
        lock(&self.tokens).count
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        lock(&self.tokens).queue.len()
    }

    fn wake_all(&self) {
        let _tokens = lock(&self.tokens);
        self.available.notify_all();
    }
}

struct InterruptState {
    raised: AtomicBool,
    parked_on: Mutex<Option<Arc<Semaphore>>>,
}

/// A pending-signal flag shared between a blocked caller and whoever wants
/// to abort its wait.
///
/// Raising is sticky until a blocking wait observes it: the wait returns
/// [`Error::Cancelled`] and clears the flag, so the next call starts clean.
#[derive(Clone)]
pub struct Interrupt {
    state: Arc<InterruptState>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self {
            state: Arc::new(InterruptState {
                raised: AtomicBool::new(false),
                parked_on: Mutex::new(None),
            }),
        }
    }

    pub fn raise(&self) {
        self.state.raised.store(true, Ordering::SeqCst);
        // The slot and the semaphore count are never locked together.
        let parked = lock(&self.state.parked_on).clone();
        if let Some(semaphore) = parked {
            semaphore.wake_all();
        }
    }

    pub fn is_raised(&self) -> bool {
        self.state.raised.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.state.raised.swap(false, Ordering::SeqCst)
    }

    fn park(&self, semaphore: Arc<Semaphore>) -> Parked<'_> {
        *lock(&self.state.parked_on) = Some(semaphore);
        Parked { interrupt: self }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

struct Parked<'a> {
    interrupt: &'a Interrupt,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        lock(&self.interrupt.state.parked_on).take();
    }
}
