// Lock ordering, outermost first:
//   1. session lock of a timer module
//   2. channel / consumer-queue monitors
//   3. semaphore counts and interrupt slots (never nested with each other)
//   4. the fast lock around the sample buffer
//
// The fast lock is a spinlock and is only ever held for non-blocking work.

pub mod monitor;
pub mod semaphore;

pub use monitor::{CondQueue, Monitor};
pub use semaphore::{Interrupt, Semaphore};

pub(crate) use semaphore::lock;

pub type FastLock<T> = spin::Mutex<T>;
